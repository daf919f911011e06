//! The export manifest: one entry per export, appended in run order.

use crate::{Error, Result, geoparquet::PartialFile};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, ErrorKind},
    path::{Path, PathBuf},
};

/// The manifest's file name.
pub const FILE_NAME: &str = "manifest.json";

/// The data format recorded in manifest entries.
pub const FORMAT: &str = "geoparquet";

/// One export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// The query as given.
    pub query: String,

    /// The export id.
    pub export_id: String,

    /// The data format.
    pub format: String,

    /// When the export started, in solr time format.
    pub start_time: String,

    /// The number of exported records.
    pub num_results: usize,

    /// The server the records came from.
    #[serde(default)]
    pub export_server_url: Option<String>,

    /// The query with its refresh clause, for refreshes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_with_timestamp: Option<String>,
}

/// Returns the manifest path in a directory.
pub fn path(directory: impl AsRef<Path>) -> PathBuf {
    directory.as_ref().join(FILE_NAME)
}

/// Reads the manifest in a directory.
///
/// A missing manifest has no entries.
///
/// # Examples
///
/// ```
/// let directory = tempfile::tempdir().unwrap();
/// assert!(isamples_export::manifest::read(directory.path()).unwrap().is_empty());
/// ```
pub fn read(directory: impl AsRef<Path>) -> Result<Vec<ManifestEntry>> {
    let file = match File::open(path(directory)) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(Error::from(err)),
    };
    serde_json::from_reader(BufReader::new(file)).map_err(Error::from)
}

/// Writes the manifest with one more entry to a partial file next to it.
///
/// The manifest itself is untouched until the returned file is committed.
pub fn stage(directory: impl AsRef<Path>, entry: ManifestEntry) -> Result<PartialFile> {
    let directory = directory.as_ref();
    let mut entries = read(directory)?;
    entries.push(entry);
    let partial = PartialFile::new(path(directory));
    partial.write_json(&entries)?;
    tracing::debug!(
        "staged {} manifest entries in {}",
        entries.len(),
        partial.path().display()
    );
    Ok(partial)
}

/// Appends an entry to the manifest in a directory, creating it if needed.
///
/// The new manifest replaces the old one with a rename, so a failed append
/// leaves the old manifest as it was. Returns the manifest path.
pub fn append(directory: impl AsRef<Path>, entry: ManifestEntry) -> Result<PathBuf> {
    let partial = stage(directory, entry)?;
    let path = partial.destination().to_path_buf();
    partial.commit()?;
    Ok(path)
}
