//! Write export records as [GeoParquet](https://geoparquet.org/).
//!
//! Data goes to `<destination>.partial` and is renamed into place only when
//! the writer is closed. A writer that's dropped or fails removes its partial
//! file, so a data file at the destination path is always complete.

use crate::{
    Error, ExtentAccumulator, ReconciledRecord, Result,
    column::{self, COLUMNS, ColumnType, GEOMETRY_COLUMN},
    record::CellValue,
};
use arrow_array::{
    Array, ArrayRef, BinaryArray, RecordBatch, StringArray,
    builder::{ListBuilder, StringBuilder},
    cast::AsArray,
};
use arrow_schema::SchemaRef;
use geo_traits::{CoordTrait, GeometryTrait, GeometryType, PointTrait};
use geo_types::{Geometry, Point};
use indexmap::IndexMap;
pub use parquet::basic::{Compression, ZstdLevel};
use parquet::{
    arrow::{ArrowWriter, arrow_reader::ParquetRecordBatchReaderBuilder},
    file::{metadata::FileMetaData, properties::WriterProperties},
    format::KeyValue,
};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use wkb::{Endianness, writer::WriteOptions};

/// Default compression level for zstd.
pub const DEFAULT_ZSTD_LEVEL: i32 = 15;

/// Default number of records per batch, which is also the row group size.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// The geoparquet metadata key.
pub const METADATA_KEY: &str = "geo";

/// The geoparquet version.
pub const VERSION: &str = "1.0.0";

/// The media type of a data file.
pub const MEDIA_TYPE: &str = "application/x-parquet";

const PARTIAL_EXTENSION: &str = "partial";
const WKB_POINT_LENGTH: usize = 21;

/// Default data file compression.
pub fn default_compression() -> Compression {
    ZstdLevel::try_new(DEFAULT_ZSTD_LEVEL)
        .map(Compression::ZSTD)
        .unwrap_or(Compression::SNAPPY)
}

/// Options for writing data files.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct WriterOptions {
    /// Parquet compression codec
    pub compression: Option<Compression>,

    /// Number of records written per batch
    pub batch_size: usize,
}

/// A completed data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// Where the file was written.
    pub path: PathBuf,

    /// The file size in bytes.
    pub size: u64,

    /// The number of records in the file.
    pub rows: usize,
}

/// A file that's written under a temporary name and renamed on commit.
///
/// Dropping an uncommitted partial file removes it.
#[derive(Debug)]
pub struct PartialFile {
    partial: PathBuf,
    destination: PathBuf,
    committed: bool,
}

/// Writes [ReconciledRecord]s to a GeoParquet data file, batch by batch.
#[allow(missing_debug_implementations)]
pub struct TableWriter<W: Write + Send> {
    arrow_writer: ArrowWriter<W>,
    partial: Option<PartialFile>,
    schema: SchemaRef,
    rows: usize,
    extent: ExtentAccumulator,
}

/// What a data file's footer says about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// The number of rows.
    pub rows: i64,

    /// The number of row groups.
    pub row_groups: usize,

    /// The columns, in file order.
    pub columns: Vec<SummaryColumn>,

    /// The geoparquet metadata, if the file has any.
    pub geo: Option<GeoMetadata>,
}

/// One column of a data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryColumn {
    /// The column name.
    pub name: String,

    /// The arrow data type.
    pub data_type: String,

    /// Whether the column may hold nulls.
    pub nullable: bool,
}

/// The geoparquet file metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoMetadata {
    /// The geoparquet version.
    pub version: String,

    /// The name of the primary geometry column.
    pub primary_column: String,

    /// Metadata for each geometry column.
    pub columns: IndexMap<String, GeoColumn>,
}

/// Metadata for one geometry column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoColumn {
    /// The geometry encoding.
    pub encoding: String,

    /// The geometry types found in the column.
    pub geometry_types: Vec<String>,

    /// The bounding box of every geometry in the column, as
    /// `[xmin, ymin, xmax, ymax]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
}

impl WriterOptions {
    /// Creates a new WriterOptions with default values.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::geoparquet::WriterOptions;
    ///
    /// let options = WriterOptions::new();
    /// assert_eq!(options.batch_size, 10_000);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the compression codec.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::geoparquet::{WriterOptions, Compression};
    ///
    /// let options = WriterOptions::new().with_compression(Compression::SNAPPY);
    /// ```
    pub fn with_compression(mut self, compression: impl Into<Option<Compression>>) -> Self {
        self.compression = compression.into();
        self
    }

    /// Sets the batch size.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::geoparquet::WriterOptions;
    ///
    /// let options = WriterOptions::new().with_batch_size(500);
    /// ```
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            compression: Some(default_compression()),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl From<WriterOptions> for WriterProperties {
    fn from(options: WriterOptions) -> Self {
        let mut builder =
            WriterProperties::builder().set_max_row_group_size(options.batch_size.max(1));
        if let Some(compression) = options.compression {
            builder = builder.set_compression(compression);
        }
        builder.build()
    }
}

impl PartialFile {
    /// Creates a partial file for a destination path.
    ///
    /// Nothing is written until [PartialFile::create] is called.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::geoparquet::PartialFile;
    ///
    /// let partial = PartialFile::new("out/data.parquet");
    /// assert_eq!(partial.path().to_str().unwrap(), "out/data.parquet.partial");
    /// ```
    pub fn new(destination: impl AsRef<Path>) -> PartialFile {
        let destination = destination.as_ref().to_path_buf();
        let mut partial = destination.clone().into_os_string();
        partial.push(".");
        partial.push(PARTIAL_EXTENSION);
        PartialFile {
            partial: partial.into(),
            destination,
            committed: false,
        }
    }

    /// Creates (or truncates) the partial file on disk.
    pub fn create(&self) -> Result<File> {
        File::create(&self.partial).map_err(Error::from)
    }

    /// Writes a value as pretty-printed JSON to the partial file.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::geoparquet::PartialFile;
    /// use serde_json::json;
    ///
    /// let directory = tempfile::tempdir().unwrap();
    /// let destination = directory.path().join("stac.json");
    /// let partial = PartialFile::new(&destination);
    /// partial.write_json(&json!({"type": "Catalog"})).unwrap();
    /// assert!(!destination.exists());
    /// partial.commit().unwrap();
    /// assert!(destination.exists());
    /// ```
    pub fn write_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let mut writer = BufWriter::new(self.create()?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        Ok(())
    }

    /// The path being written to.
    pub fn path(&self) -> &Path {
        &self.partial
    }

    /// The path the file will have once it's committed.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Syncs the partial file and renames it to its destination.
    ///
    /// Returns the size of the committed file.
    pub fn commit(mut self) -> Result<u64> {
        File::open(&self.partial)?.sync_all()?;
        std::fs::rename(&self.partial, &self.destination)?;
        self.committed = true;
        let size = std::fs::metadata(&self.destination)?.len();
        tracing::debug!(
            "committed {} ({size} bytes)",
            self.destination.display()
        );
        Ok(size)
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.partial) {
            Ok(()) => tracing::debug!("removed {}", self.partial.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                "could not remove partial file {}: {err}",
                self.partial.display()
            ),
        }
    }
}

impl TableWriter<BufWriter<File>> {
    /// Opens a writer for a destination path.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::{ReconciledRecord, geoparquet::{TableWriter, WriterOptions}};
    ///
    /// let directory = tempfile::tempdir().unwrap();
    /// let path = directory.path().join("data.parquet");
    /// let mut writer = TableWriter::create(&path, WriterOptions::new()).unwrap();
    /// writer.write_batch(&[ReconciledRecord::new()]).unwrap();
    /// let data_file = writer.close().unwrap();
    /// assert_eq!(data_file.rows, 1);
    /// assert!(path.exists());
    /// ```
    pub fn create(
        destination: impl AsRef<Path>,
        options: WriterOptions,
    ) -> Result<TableWriter<BufWriter<File>>> {
        let partial = PartialFile::new(destination);
        let file = partial.create()?;
        TableWriter::with_partial(BufWriter::new(file), partial, options)
    }
}

impl<W: Write + Send> TableWriter<W> {
    /// Creates a writer without a destination path.
    ///
    /// Use [TableWriter::finish] to close it.
    pub fn new(writer: W, options: WriterOptions) -> Result<TableWriter<W>> {
        TableWriter::open(writer, None, options)
    }

    /// Creates a writer that writes the contents of a [PartialFile].
    ///
    /// `writer` must write to [PartialFile::path].
    pub fn with_partial(
        writer: W,
        partial: PartialFile,
        options: WriterOptions,
    ) -> Result<TableWriter<W>> {
        TableWriter::open(writer, Some(partial), options)
    }

    fn open(
        writer: W,
        partial: Option<PartialFile>,
        options: WriterOptions,
    ) -> Result<TableWriter<W>> {
        let schema = column::schema();
        let arrow_writer = ArrowWriter::try_new(writer, schema.clone(), Some(options.into()))?;
        Ok(TableWriter {
            arrow_writer,
            partial,
            schema,
            rows: 0,
            extent: ExtentAccumulator::new(),
        })
    }

    /// Writes one batch of records as a row group.
    pub fn write_batch(&mut self, records: &[ReconciledRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let record_batch = encode(self.schema.clone(), records)?;
        self.arrow_writer.write(&record_batch)?;
        for location in records.iter().filter_map(ReconciledRecord::location) {
            self.extent.observe_location(location);
        }
        self.arrow_writer.flush()?;
        self.rows += records.len();
        tracing::debug!("wrote {} records ({} total)", records.len(), self.rows);
        Ok(())
    }

    /// The number of records written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Writes the file footer, without committing anything.
    ///
    /// Returns the number of records written.
    pub fn finish(mut self) -> Result<usize> {
        self.write_footer()?;
        Ok(self.rows)
    }

    /// Writes the file footer and commits the data file to its destination.
    pub fn close(mut self) -> Result<DataFile> {
        let partial = self.partial.take().ok_or(Error::NoDestination)?;
        self.write_footer()?;
        let path = partial.destination().to_path_buf();
        let size = partial.commit()?;
        Ok(DataFile {
            path,
            size,
            rows: self.rows,
        })
    }

    fn write_footer(&mut self) -> Result<()> {
        let extent = std::mem::take(&mut self.extent).finalize();
        let metadata = GeoMetadata::default().with_bbox(extent.spatial);
        self.arrow_writer
            .append_key_value_metadata(KeyValue::new(
                METADATA_KEY.to_string(),
                serde_json::to_string(&metadata)?,
            ));
        let _ = self.arrow_writer.finish()?;
        Ok(())
    }
}

impl Default for GeoMetadata {
    fn default() -> Self {
        let mut columns = IndexMap::new();
        let _ = columns.insert(
            GEOMETRY_COLUMN.to_string(),
            GeoColumn {
                encoding: "WKB".to_string(),
                geometry_types: vec!["Point".to_string()],
                bbox: None,
            },
        );
        GeoMetadata {
            version: VERSION.to_string(),
            primary_column: GEOMETRY_COLUMN.to_string(),
            columns,
        }
    }
}

impl GeoMetadata {
    /// Sets the bounding box of the primary geometry column.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::geoparquet::GeoMetadata;
    ///
    /// let metadata = GeoMetadata::default().with_bbox([1.0, 2.0, 3.0, 4.0]);
    /// assert_eq!(metadata.bbox(), Some(&[1.0, 2.0, 3.0, 4.0][..]));
    /// ```
    pub fn with_bbox(mut self, bbox: impl Into<Option<[f64; 4]>>) -> GeoMetadata {
        let bbox = bbox.into();
        if let Some(column) = self.columns.get_mut(&self.primary_column) {
            column.bbox = bbox.map(|bbox| bbox.to_vec());
        }
        self
    }

    /// Returns the bounding box of the primary geometry column, if there is one.
    pub fn bbox(&self) -> Option<&[f64]> {
        self.columns
            .get(&self.primary_column)
            .and_then(|column| column.bbox.as_deref())
    }
}

/// Reads every record of a data file.
///
/// Event times aren't stored in data files, so they're always `None`.
///
/// # Examples
///
/// ```
/// use isamples_export::{ReconciledRecord, geoparquet::{self, TableWriter, WriterOptions}};
///
/// let directory = tempfile::tempdir().unwrap();
/// let path = directory.path().join("data.parquet");
/// let mut writer = TableWriter::create(&path, WriterOptions::new()).unwrap();
/// writer.write_batch(&[ReconciledRecord::new()]).unwrap();
/// let _ = writer.close().unwrap();
/// let records = geoparquet::read_records(&path).unwrap();
/// assert_eq!(records, vec![ReconciledRecord::new()]);
/// ```
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<ReconciledRecord>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let mut records = Vec::new();
    for result in reader {
        let record_batch = result?;
        decode(&record_batch, &mut records)?;
    }
    Ok(records)
}

/// Reads the geoparquet metadata of a data file.
pub fn read_metadata(path: impl AsRef<Path>) -> Result<Option<GeoMetadata>> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    geo_metadata(builder.metadata().file_metadata())
}

/// Reads a data file's row count, schema, and geoparquet metadata from its
/// footer, without reading any rows.
///
/// # Examples
///
/// ```
/// use isamples_export::{ReconciledRecord, geoparquet::{self, TableWriter, WriterOptions}};
///
/// let directory = tempfile::tempdir().unwrap();
/// let path = directory.path().join("data.parquet");
/// let mut writer = TableWriter::create(&path, WriterOptions::new()).unwrap();
/// writer.write_batch(&[ReconciledRecord::new()]).unwrap();
/// let _ = writer.close().unwrap();
/// let summary = geoparquet::read_summary(&path).unwrap();
/// assert_eq!(summary.rows, 1);
/// assert_eq!(summary.columns.len(), 15);
/// ```
pub fn read_summary(path: impl AsRef<Path>) -> Result<Summary> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let metadata = builder.metadata();
    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|field| SummaryColumn {
            name: field.name().to_string(),
            data_type: field.data_type().to_string(),
            nullable: field.is_nullable(),
        })
        .collect();
    Ok(Summary {
        rows: metadata.file_metadata().num_rows(),
        row_groups: metadata.num_row_groups(),
        columns,
        geo: geo_metadata(metadata.file_metadata())?,
    })
}

fn geo_metadata(file_metadata: &FileMetaData) -> Result<Option<GeoMetadata>> {
    file_metadata
        .key_value_metadata()
        .and_then(|key_values| {
            key_values
                .iter()
                .find(|key_value| key_value.key == METADATA_KEY)
        })
        .and_then(|key_value| key_value.value.as_deref())
        .map(|value| serde_json::from_str(value).map_err(Error::from))
        .transpose()
}

fn encode(schema: SchemaRef, records: &[ReconciledRecord]) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(COLUMNS.len() + 1);
    for (i, column) in COLUMNS.iter().enumerate() {
        let values = records.iter().map(|record| record.value(i));
        let array: ArrayRef = match column.r#type {
            ColumnType::String => Arc::new(StringArray::from_iter_values(
                values.map(|value| value.and_then(CellValue::as_str).unwrap_or_default()),
            )),
            ColumnType::StringArray => {
                let mut builder = ListBuilder::new(StringBuilder::new());
                for value in values {
                    for s in value.and_then(CellValue::as_array).unwrap_or_default() {
                        builder.values().append_value(s);
                    }
                    builder.append(true);
                }
                Arc::new(builder.finish())
            }
        };
        columns.push(array);
    }
    let geometry = records
        .iter()
        .map(|record| record.location().map(write_wkb).transpose())
        .collect::<Result<BinaryArray>>()?;
    columns.push(Arc::new(geometry));
    RecordBatch::try_new(schema, columns).map_err(Error::from)
}

fn decode(record_batch: &RecordBatch, records: &mut Vec<ReconciledRecord>) -> Result<()> {
    let mut batch: Vec<ReconciledRecord> = vec![ReconciledRecord::new(); record_batch.num_rows()];
    for column in COLUMNS.iter() {
        let array = record_batch
            .column_by_name(column.name)
            .ok_or_else(|| Error::UnknownColumn(column.name.to_string()))?;
        let type_error = || Error::ColumnType {
            column: column.name.to_string(),
            expected: column.r#type,
        };
        match column.r#type {
            ColumnType::String => {
                let strings = array.as_string_opt::<i32>().ok_or_else(type_error)?;
                for (record, value) in batch.iter_mut().zip(strings.iter()) {
                    record.set(column.name, value.unwrap_or_default())?;
                }
            }
            ColumnType::StringArray => {
                let lists = array.as_list_opt::<i32>().ok_or_else(type_error)?;
                for (row, record) in batch.iter_mut().enumerate() {
                    let values: Vec<String> = if lists.is_null(row) {
                        Vec::new()
                    } else {
                        let list = lists.value(row);
                        let strings = list.as_string_opt::<i32>().ok_or_else(type_error)?;
                        strings.iter().flatten().map(String::from).collect()
                    };
                    record.set(column.name, values)?;
                }
            }
        }
    }
    if let Some(geometry) = record_batch.column_by_name(GEOMETRY_COLUMN) {
        let geometry = geometry
            .as_binary_opt::<i32>()
            .ok_or_else(|| Error::UnknownColumn(GEOMETRY_COLUMN.to_string()))?;
        for (record, wkb) in batch.iter_mut().zip(geometry.iter()) {
            if let Some(point) = wkb.map(read_wkb).transpose()?.flatten() {
                *record = std::mem::take(record).with_location(point);
            }
        }
    }
    records.extend(batch);
    Ok(())
}

fn write_wkb(point: Point) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(WKB_POINT_LENGTH);
    wkb::writer::write_geometry(
        &mut buf,
        &Geometry::Point(point),
        &WriteOptions {
            endianness: Endianness::LittleEndian,
        },
    )?;
    Ok(buf)
}

/// Reads a WKB geometry, returning its coordinates if it's a non-empty point.
fn read_wkb(buf: &[u8]) -> Result<Option<Point>> {
    let geometry = wkb::reader::read_wkb(buf)?;
    let point = match geometry.as_type() {
        GeometryType::Point(point) => point
            .coord()
            .map(|coord| Point::new(coord.x(), coord.y())),
        _ => None,
    };
    Ok(point)
}
