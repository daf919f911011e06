//! Assemble the STAC collection that describes an export.

use crate::{
    DataFile, Error, Extent, QueryContext, Result,
    column::{Column, GEOMETRY_COLUMN},
    extent::{StacExtent, format_datetime},
    geoparquet::MEDIA_TYPE,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The STAC version of assembled collections.
pub const STAC_VERSION: &str = "1.0.0";

/// The table extension schema.
pub const TABLE_EXTENSION: &str = "https://stac-extensions.github.io/table/v1.2.0/schema.json";

/// The alternate assets extension schema.
pub const ALTERNATE_ASSETS_EXTENSION: &str =
    "https://stac-extensions.github.io/alternate-assets/v1.1.0/schema.json";

/// The default license.
pub const LICENSE: &str = "CC-BY-4.0";

/// The collection's file name.
pub const FILE_NAME: &str = "stac.json";

/// The key of the data asset.
pub const DATA_ASSET: &str = "data";

const ID_PREFIX: &str = "isamples-stac-collection-";
const TITLE_PREFIX: &str = "iSamples Stac Collection";
const VIEW_PREFIX: &str = "/ui/ds_view.html#/data/";

/// A STAC collection describing one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Always "Collection".
    pub r#type: String,

    /// The STAC version.
    pub stac_version: String,

    /// Extension schema urls.
    #[serde(default)]
    pub stac_extensions: Vec<String>,

    /// The collection id.
    pub id: String,

    /// The collection title.
    pub title: String,

    /// The collection description.
    pub description: String,

    /// The license.
    pub license: String,

    /// The spatial and temporal extent.
    pub extent: StacExtent,

    /// Links.
    pub links: Vec<Link>,

    /// The data file's columns.
    #[serde(rename = "table:columns", default)]
    pub table_columns: Vec<TableColumn>,

    /// The number of records in the data file.
    #[serde(rename = "table:row_count", default)]
    pub table_row_count: u64,

    /// The data file's geometry column.
    #[serde(rename = "table:primary_geometry", default)]
    pub table_primary_geometry: Option<String>,

    /// Assets.
    #[serde(default)]
    pub assets: IndexMap<String, Asset>,
}

/// A link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// The relationship.
    pub rel: String,

    /// The target.
    pub href: String,

    /// The target's media type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// The link title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// An asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// The asset location, relative to the collection.
    pub href: String,

    /// The media type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,

    /// The asset title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// The asset description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The asset roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Other ways to get at the asset.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub alternate: IndexMap<String, AlternateAsset>,
}

/// An alternate location for an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateAsset {
    /// The alternate location.
    pub href: String,

    /// The alternate title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A `table:columns` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    /// The column name.
    pub name: String,

    /// What the column holds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// The column type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
}

/// Overrides for assembled collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembleOptions {
    /// Replaces the generated title.
    pub title: Option<String>,

    /// Replaces the generated description.
    pub description: Option<String>,

    /// Replaces the default license.
    pub license: Option<String>,
}

impl Link {
    /// Creates a new link.
    pub fn new(href: impl ToString, rel: impl ToString) -> Link {
        Link {
            rel: rel.to_string(),
            href: href.to_string(),
            r#type: None,
            title: None,
        }
    }

    /// Sets the media type to JSON.
    pub fn json(mut self) -> Link {
        self.r#type = Some(mime::APPLICATION_JSON.to_string());
        self
    }

    /// Sets the title.
    pub fn title(mut self, title: impl Into<Option<String>>) -> Link {
        self.title = title.into();
        self
    }
}

impl From<&Column> for TableColumn {
    fn from(column: &Column) -> TableColumn {
        TableColumn {
            name: column.name.to_string(),
            description: Some(column.description.to_string()),
            r#type: Some(column.r#type.as_str().to_string()),
        }
    }
}

/// Assembles the collection for an export.
///
/// Empty extents are encoded as empty lists rather than placeholders, so a
/// collection for an export without locations or times won't validate.
///
/// # Examples
///
/// ```
/// use isamples_export::{DataFile, Extent, QueryContext, column::COLUMNS, collection};
///
/// let context = QueryContext::new("source:SESAR");
/// let data_file = DataFile {
///     path: context.data_file_name().into(),
///     size: 0,
///     rows: 0,
/// };
/// let collection = collection::assemble(
///     &context,
///     &Extent::default(),
///     &COLUMNS,
///     &data_file,
///     &Default::default(),
/// )
/// .unwrap();
/// assert_eq!(collection.table_columns.len(), COLUMNS.len());
/// ```
pub fn assemble(
    context: &QueryContext,
    extent: &Extent,
    columns: &[Column],
    data_file: &DataFile,
    options: &AssembleOptions,
) -> Result<Collection> {
    let file_name = data_file
        .path
        .file_name()
        .and_then(|file_name| file_name.to_str())
        .ok_or_else(|| Error::InvalidDataFile(data_file.path.display().to_string()))?;
    let export_id = context.export_id();
    let default_title = format!("{TITLE_PREFIX} {export_id}");
    let title = options.title.clone().unwrap_or_else(|| default_title.clone());
    let description = options.description.clone().unwrap_or_else(|| {
        format!(
            "iSamples Export Service results initiated at {}.  The solr query that produced this collection was  \n```{}```.  \n",
            format_datetime(context.started_at()),
            context.effective_query()
        )
    });
    let mut alternate = IndexMap::new();
    let _ = alternate.insert(
        "view".to_string(),
        AlternateAsset {
            href: format!("{VIEW_PREFIX}{export_id}/{file_name}"),
            title: Some("View parquet file".to_string()),
        },
    );
    let mut assets = IndexMap::new();
    let _ = assets.insert(
        DATA_ASSET.to_string(),
        Asset {
            href: format!("./{file_name}"),
            r#type: Some(MEDIA_TYPE.to_string()),
            title: Some(format!("{default_title} parquet export")),
            description: Some("GeoParquet representation of the collection.".to_string()),
            roles: vec!["data".to_string()],
            alternate,
        },
    );
    Ok(Collection {
        r#type: "Collection".to_string(),
        stac_version: STAC_VERSION.to_string(),
        stac_extensions: vec![
            TABLE_EXTENSION.to_string(),
            ALTERNATE_ASSETS_EXTENSION.to_string(),
        ],
        id: format!("{ID_PREFIX}{export_id}"),
        title: title.clone(),
        description,
        license: options.license.clone().unwrap_or_else(|| LICENSE.to_string()),
        extent: StacExtent::from(extent),
        links: vec![
            Link::new(format!("./{FILE_NAME}"), "self")
                .json()
                .title(title),
        ],
        table_columns: columns.iter().map(TableColumn::from).collect(),
        table_row_count: data_file.rows as u64,
        table_primary_geometry: Some(GEOMETRY_COLUMN.to_string()),
        assets,
    })
}
