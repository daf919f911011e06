//! The root catalog that links every export in a destination directory.

use crate::{
    Result,
    collection::{self, Link, STAC_VERSION},
    geoparquet::PartialFile,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The catalog id.
pub const ID: &str = "iSamples Catalog";

/// The catalog's file name.
pub const FILE_NAME: &str = "stac.json";

const DEFAULT_TITLE: &str = "iSamples STAC Catalog";
const DEFAULT_DESCRIPTION: &str = "STAC Catalog from iSamples Exports";

/// A STAC catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Always "Catalog".
    pub r#type: String,

    /// The catalog id.
    pub id: String,

    /// The catalog title.
    pub title: String,

    /// The catalog description.
    pub description: String,

    /// The STAC version.
    pub stac_version: String,

    /// Links.
    pub links: Vec<Link>,
}

impl Catalog {
    /// Builds the catalog for a destination directory.
    ///
    /// Every immediate subdirectory with a collection becomes a child link,
    /// in name order.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::catalog::Catalog;
    ///
    /// let directory = tempfile::tempdir().unwrap();
    /// let catalog = Catalog::from_directory(directory.path(), None, None).unwrap();
    /// assert_eq!(catalog.links.len(), 2);
    /// ```
    pub fn from_directory(
        directory: impl AsRef<Path>,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Catalog> {
        let mut links = vec![
            Link::new(FILE_NAME, "self").json(),
            Link::new(FILE_NAME, "root").json(),
        ];
        let mut children = Vec::new();
        for entry in std::fs::read_dir(directory)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && entry.path().join(collection::FILE_NAME).is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    children.push(name.to_string());
                }
            }
        }
        children.sort();
        links.extend(children.into_iter().map(|name| {
            Link::new(format!("{name}/{}", collection::FILE_NAME), "child")
                .json()
                .title(name)
        }));
        Ok(Catalog {
            r#type: "Catalog".to_string(),
            id: ID.to_string(),
            title: title.unwrap_or(DEFAULT_TITLE).to_string(),
            description: description.unwrap_or(DEFAULT_DESCRIPTION).to_string(),
            stac_version: STAC_VERSION.to_string(),
            links,
        })
    }

    /// Returns the hrefs of the child links.
    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.links
            .iter()
            .filter(|link| link.rel == "child")
            .map(|link| link.href.as_str())
    }
}

/// Rebuilds the catalog for a destination directory into a partial file.
///
/// The catalog itself is untouched until the returned file is committed.
pub fn stage(
    directory: impl AsRef<Path>,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<PartialFile> {
    let directory = directory.as_ref();
    let catalog = Catalog::from_directory(directory, title, description)?;
    let partial = PartialFile::new(directory.join(FILE_NAME));
    partial.write_json(&catalog)?;
    tracing::debug!(
        "staged catalog with {} children in {}",
        catalog.children().count(),
        partial.path().display()
    );
    Ok(partial)
}

/// Rebuilds and writes the catalog for a destination directory.
///
/// Returns the catalog path.
pub fn write(
    directory: impl AsRef<Path>,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<PathBuf> {
    let partial = stage(directory, title, description)?;
    let path = partial.destination().to_path_buf();
    partial.commit()?;
    Ok(path)
}
