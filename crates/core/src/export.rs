//! The export pipeline.
//!
//! Records flow from a [RecordSource] through [reconcile], then to both the
//! [TableWriter] and the [ExtentAccumulator]. Once the source is exhausted the
//! data file is committed, the collection is assembled and validated, and the
//! results are packaged into the destination directory.

use crate::{
    DataFile, Error, Extent, ExtentAccumulator, QueryContext, RawRecord, Result, Stage,
    catalog,
    collection::{self, AssembleOptions, Collection},
    column::COLUMNS,
    context,
    geoparquet::{PartialFile, TableWriter, WriterOptions},
    manifest::{self, ManifestEntry},
    reconcile::{AnomalyKind, Reconciliation, reconcile},
    source::{self, DEFAULT_PAGE_SIZE, DEFAULT_PREFETCH_DEPTH, RecordSource, RetryPolicy},
};
use futures_core::Stream;
use futures_util::StreamExt;
use isamples_export_validate::{ValidationResult, Validator};
use std::{
    collections::BTreeMap,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

/// How pages are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefetch {
    /// Fetch the next page only after the current one is consumed.
    Sequential,

    /// Fetch up to this many pages ahead on a background task.
    Pipelined(usize),
}

/// Options for an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    /// Records requested per page.
    pub page_size: usize,

    /// How pages are fetched.
    pub prefetch: Prefetch,

    /// How failed page fetches are retried.
    pub retry: RetryPolicy,

    /// Data file options.
    pub writer: WriterOptions,

    /// Collection overrides.
    pub assemble: AssembleOptions,

    /// The server recorded in the manifest.
    pub server_url: Option<String>,
}

/// Everything an export produced.
#[derive(Debug)]
pub struct ExportReport {
    /// The assembled collection.
    pub collection: Collection,

    /// Where the collection was written.
    pub collection_path: PathBuf,

    /// The committed data file.
    pub data_file: DataFile,

    /// The extent of the exported records.
    pub extent: Extent,

    /// The validation outcome.
    ///
    /// An invalid collection is still written.
    pub validation: ValidationResult,

    /// How many times each kind of anomaly was seen.
    pub anomalies: BTreeMap<AnomalyKind, usize>,

    /// The number of exported records.
    pub records: usize,

    /// The manifest path.
    pub manifest_path: PathBuf,

    /// The root catalog path.
    pub catalog_path: PathBuf,
}

/// Runs exports from a record source.
#[derive(Debug)]
pub struct Exporter<S> {
    source: Arc<S>,
    options: ExportOptions,
}

type RecordStream<'a> = Pin<Box<dyn Stream<Item = Result<RawRecord>> + Send + 'a>>;

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            page_size: DEFAULT_PAGE_SIZE,
            prefetch: Prefetch::Pipelined(DEFAULT_PREFETCH_DEPTH),
            retry: RetryPolicy::default(),
            writer: WriterOptions::default(),
            assemble: AssembleOptions::default(),
            server_url: None,
        }
    }
}

impl ExportOptions {
    /// Sets the page size.
    pub fn with_page_size(mut self, page_size: usize) -> ExportOptions {
        self.page_size = page_size;
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> ExportOptions {
        self.writer.batch_size = batch_size;
        self
    }

    /// Sets how pages are fetched.
    pub fn with_prefetch(mut self, prefetch: Prefetch) -> ExportOptions {
        self.prefetch = prefetch;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> ExportOptions {
        self.retry = retry;
        self
    }

    /// Sets the collection overrides.
    pub fn with_assemble(mut self, assemble: AssembleOptions) -> ExportOptions {
        self.assemble = assemble;
        self
    }

    /// Sets the server url recorded in the manifest.
    pub fn with_server_url(mut self, server_url: impl Into<Option<String>>) -> ExportOptions {
        self.server_url = server_url.into();
        self
    }

    /// Checks that every option is in range.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::{ExportOptions, Prefetch};
    ///
    /// assert!(ExportOptions::default().check().is_ok());
    /// assert!(ExportOptions::default().with_page_size(0).check().is_err());
    /// assert!(ExportOptions::default().with_prefetch(Prefetch::Pipelined(0)).check().is_err());
    /// ```
    pub fn check(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidOption("page size must be positive".to_string()));
        }
        if self.writer.batch_size == 0 {
            return Err(Error::InvalidOption("batch size must be positive".to_string()));
        }
        if self.prefetch == Prefetch::Pipelined(0) {
            return Err(Error::InvalidOption(
                "prefetch depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl ExportReport {
    /// Returns true if the collection passed validation.
    pub fn is_valid(&self) -> bool {
        self.validation.is_valid()
    }
}

impl<S: RecordSource + 'static> Exporter<S> {
    /// Creates a new exporter.
    pub fn new(source: S, options: ExportOptions) -> Exporter<S> {
        Exporter::from_arc(Arc::new(source), options)
    }

    /// Creates a new exporter from a shared source.
    pub fn from_arc(source: Arc<S>, options: ExportOptions) -> Exporter<S> {
        Exporter { source, options }
    }

    /// The export options.
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    /// Exports every record matching a query into a destination directory.
    ///
    /// The data file and collection are written to
    /// `<destination>/<export id>/`, the manifest is appended, and the root
    /// catalog is rebuilt. If the export fails, no data file is left behind.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::{ExportOptions, Exporter, QueryContext, source::MemorySource};
    /// use serde_json::json;
    ///
    /// # #[tokio::main]
    /// # async fn main() {
    /// let source = MemorySource::new([json!({
    ///     "sample_identifier": "IGSN:1",
    ///     "produced_by": {
    ///         "result_time": "2020-01-01",
    ///         "sampling_site": {"location": {"latitude": 1.0, "longitude": 2.0}}
    ///     }
    /// })]);
    /// let destination = tempfile::tempdir().unwrap();
    /// let report = Exporter::new(source, ExportOptions::default())
    ///     .export(&QueryContext::new("*:*"), destination.path())
    ///     .await
    ///     .unwrap();
    /// assert_eq!(report.records, 1);
    /// assert!(report.is_valid());
    /// # }
    /// ```
    pub async fn export(
        &self,
        context: &QueryContext,
        destination: impl AsRef<Path>,
    ) -> Result<ExportReport> {
        self.options.check()?;
        let destination = destination.as_ref();
        let directory = destination.join(context.export_id());
        std::fs::create_dir_all(destination).map_err(|err| Error::from(err).at(Stage::Write))?;
        match std::fs::create_dir(&directory) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::ExportExists(directory).at(Stage::Write));
            }
            Err(err) => return Err(Error::from(err).at(Stage::Write)),
        }
        let result = match TableWriter::create(
            directory.join(context.data_file_name()),
            self.options.writer,
        ) {
            Ok(writer) => self.export_to(context, destination, writer).await,
            Err(err) => Err(err.at(Stage::Write)),
        };
        if result.is_err() {
            // Only succeeds if nothing else is in there.
            let _ = std::fs::remove_dir(&directory);
        }
        result
    }

    /// Exports every record matching a query through an already-open writer.
    ///
    /// The writer must commit to `<destination>/<export id>/`.
    pub async fn export_to<W>(
        &self,
        context: &QueryContext,
        destination: impl AsRef<Path>,
        mut writer: TableWriter<W>,
    ) -> Result<ExportReport>
    where
        W: Write + Send,
    {
        self.options.check()?;
        let destination = destination.as_ref();
        let query = context.effective_query();
        tracing::info!(
            "exporting {query:?} as {} ({:?})",
            context.export_id(),
            self.options.prefetch
        );
        let mut records = self.records(&query);
        let batch_size = self.options.writer.batch_size;
        let mut accumulator = ExtentAccumulator::new();
        let mut anomalies: BTreeMap<AnomalyKind, usize> = BTreeMap::new();
        let mut batch = Vec::with_capacity(batch_size);
        while let Some(raw) = records.next().await {
            let raw = raw.map_err(|err| err.at(Stage::Source))?;
            let Reconciliation {
                record,
                anomalies: found,
            } = reconcile(&raw);
            for anomaly in found {
                *anomalies.entry(anomaly.kind).or_default() += 1;
            }
            accumulator.observe(&record);
            batch.push(record);
            if batch.len() >= batch_size {
                writer
                    .write_batch(&batch)
                    .map_err(|err| err.at(Stage::Write))?;
                batch.clear();
            }
        }
        writer
            .write_batch(&batch)
            .map_err(|err| err.at(Stage::Write))?;
        drop(batch);
        let data_file = writer.close().map_err(|err| err.at(Stage::Write))?;
        tracing::info!(
            "wrote {} records ({} located, {} timed) to {}",
            data_file.rows,
            accumulator.located(),
            accumulator.timed(),
            data_file.path.display()
        );
        for (kind, count) in &anomalies {
            tracing::warn!("{count} {kind}(s)");
        }
        let extent = accumulator.finalize();
        match self.package(context, destination, extent, &data_file).await {
            Ok((collection, collection_path, validation, manifest_path, catalog_path)) => {
                Ok(ExportReport {
                    collection,
                    collection_path,
                    records: data_file.rows,
                    data_file,
                    extent,
                    validation,
                    anomalies,
                    manifest_path,
                    catalog_path,
                })
            }
            Err(err) => {
                remove_file(&data_file.path);
                Err(err)
            }
        }
    }

    fn records(&self, query: &str) -> RecordStream<'_> {
        match self.options.prefetch {
            Prefetch::Sequential => Box::pin(source::records(
                self.source.as_ref(),
                query,
                self.options.page_size,
                self.options.retry,
            )),
            Prefetch::Pipelined(depth) => Box::pin(source::prefetched(
                self.source.clone(),
                query,
                self.options.page_size,
                self.options.retry,
                depth,
            )),
        }
    }

    #[allow(clippy::type_complexity)]
    async fn package(
        &self,
        context: &QueryContext,
        destination: &Path,
        extent: Extent,
        data_file: &DataFile,
    ) -> Result<(Collection, PathBuf, ValidationResult, PathBuf, PathBuf)> {
        let collection = collection::assemble(
            context,
            &extent,
            &COLUMNS,
            data_file,
            &self.options.assemble,
        )
        .map_err(|err| err.at(Stage::Assemble))?;
        let mut validator = Validator::new().map_err(|err| Error::from(err).at(Stage::Validate))?;
        let validation = validator
            .validate(&collection)
            .await
            .map_err(|err| Error::from(err).at(Stage::Validate))?;
        if validation.is_valid() {
            tracing::info!("collection {} is valid", collection.id);
        } else {
            for error in &validation.errors {
                tracing::warn!("collection {} is invalid: {error}", collection.id);
            }
        }
        let directory = data_file
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| destination.join(context.export_id()));
        let partial = PartialFile::new(directory.join(collection::FILE_NAME));
        let collection_path = partial.destination().to_path_buf();
        partial
            .write_json(&collection)
            .and_then(|()| partial.commit())
            .map_err(|err| err.at(Stage::Package))?;
        let (manifest_path, catalog_path) = self
            .publish(context, destination, data_file, &collection_path)
            .map_err(|err| err.at(Stage::Package))?;
        tracing::info!("wrote {}", collection_path.display());
        Ok((
            collection,
            collection_path,
            validation,
            manifest_path,
            catalog_path,
        ))
    }

    /// Rebuilds the catalog and appends the manifest entry, manifest last.
    ///
    /// On failure the collection is removed and the catalog is left without it.
    fn publish(
        &self,
        context: &QueryContext,
        destination: &Path,
        data_file: &DataFile,
        collection_path: &Path,
    ) -> Result<(PathBuf, PathBuf)> {
        let title = self.options.assemble.title.as_deref();
        let description = self.options.assemble.description.as_deref();
        let entry = ManifestEntry {
            query: context.query().to_string(),
            export_id: context.export_id().to_string(),
            format: manifest::FORMAT.to_string(),
            start_time: context::solr_time(context.started_at()),
            num_results: data_file.rows,
            export_server_url: self.options.server_url.clone(),
            query_with_timestamp: context.refresh_date().map(|_| context.effective_query()),
        };
        let staged = catalog::stage(destination, title, description).and_then(|catalog| {
            let manifest = manifest::stage(destination, entry)?;
            let catalog_path = catalog.destination().to_path_buf();
            catalog.commit()?;
            Ok((catalog_path, manifest))
        });
        let (catalog_path, manifest) = match staged {
            Ok(staged) => staged,
            Err(err) => {
                remove_file(collection_path);
                return Err(err);
            }
        };
        let manifest_path = manifest.destination().to_path_buf();
        if let Err(err) = manifest.commit() {
            remove_file(collection_path);
            if let Err(relink_err) = catalog::write(destination, title, description) {
                tracing::warn!("could not rebuild the catalog: {relink_err}");
            }
            return Err(err);
        }
        Ok((manifest_path, catalog_path))
    }
}

fn remove_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        tracing::warn!("could not remove {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportOptions, Exporter, Prefetch};
    use crate::{
        Error, QueryContext, Stage,
        geoparquet::{self, PartialFile, TableWriter, WriterOptions},
        reconcile::AnomalyKind,
        source::{MemorySource, RetryPolicy},
    };
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::{Value, json};
    use std::{
        fs::File,
        io::{self, Write},
        time::Duration,
    };
    use tempfile::TempDir;

    fn record(i: usize, latitude: f64, longitude: f64, year: i32) -> Value {
        json!({
            "sample_identifier": format!("IGSN:{i}"),
            "label": format!("sample {i}"),
            "keywords": [{"keyword": "rock"}],
            "produced_by": {
                "result_time": format!("{year}-06-01"),
                "sampling_site": {"location": {"latitude": latitude, "longitude": longitude}}
            }
        })
    }

    fn context() -> QueryContext {
        QueryContext::starting_at(
            "source:SESAR",
            Utc.with_ymd_and_hms(2024, 5, 8, 8, 57, 12).unwrap(),
        )
    }

    fn options() -> ExportOptions {
        ExportOptions::default()
            .with_page_size(2)
            .with_batch_size(2)
            .with_retry(RetryPolicy::default().with_initial_backoff(Duration::from_millis(1)))
    }

    #[rstest]
    #[tokio::test]
    async fn exports(#[values(Prefetch::Sequential, Prefetch::Pipelined(2))] prefetch: Prefetch) {
        let source = MemorySource::new([
            record(0, 10.0, 20.0, 2001),
            record(1, -5.0, 30.0, 1999),
            record(2, 40.0, -70.0, 2010),
        ]);
        let destination = TempDir::new().unwrap();
        let report = Exporter::new(source, options().with_prefetch(prefetch))
            .export(&context(), destination.path())
            .await
            .unwrap();
        assert_eq!(report.records, 3);
        assert!(report.is_valid(), "{:?}", report.validation.errors);
        assert_eq!(report.extent.spatial, Some([-70.0, -5.0, 30.0, 40.0]));
        let interval = report.extent.temporal.unwrap();
        assert_eq!(interval.start, Utc.with_ymd_and_hms(1999, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(interval.end, Utc.with_ymd_and_hms(2010, 6, 1, 0, 0, 0).unwrap());
        let directory = destination.path().join("2024_05_08_08_57_12");
        assert_eq!(
            report.data_file.path,
            directory.join("isamples_export_2024_05_08_08_57_12.parquet")
        );
        assert_eq!(report.collection_path, directory.join("stac.json"));
        let records = geoparquet::read_records(&report.data_file.path).unwrap();
        let ids: Vec<_> = records
            .iter()
            .map(|record| record.get("sample_identifier").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(ids, ["IGSN:0", "IGSN:1", "IGSN:2"]);
        assert!(destination.path().join("manifest.json").exists());
        assert!(destination.path().join("stac.json").exists());
        let collection: Value =
            serde_json::from_reader(File::open(&report.collection_path).unwrap()).unwrap();
        assert_eq!(collection["table:row_count"], 3);
    }

    #[tokio::test]
    async fn empty_result() {
        let destination = TempDir::new().unwrap();
        let report = Exporter::new(MemorySource::new(Vec::new()), options())
            .export(&context(), destination.path())
            .await
            .unwrap();
        assert_eq!(report.records, 0);
        assert!(report.extent.is_empty());
        assert!(!report.is_valid());
        assert!(report.data_file.path.exists());
        assert!(report.collection_path.exists());
        assert!(geoparquet::read_records(&report.data_file.path).unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failures() {
        let source = MemorySource::new((0..5).map(|i| record(i, 0.0, 0.0, 2000)))
            .with_failures(1, 2);
        let destination = TempDir::new().unwrap();
        let report = Exporter::new(source, options())
            .export(&context(), destination.path())
            .await
            .unwrap();
        assert_eq!(report.records, 5);
        let records = geoparquet::read_records(&report.data_file.path).unwrap();
        assert_eq!(records.len(), 5);
    }

    #[tokio::test]
    async fn source_failure_leaves_nothing() {
        let source = MemorySource::new((0..5).map(|i| record(i, 0.0, 0.0, 2000)))
            .with_failures(1, 10);
        let destination = TempDir::new().unwrap();
        let error = Exporter::new(source, options().with_retry(RetryPolicy::none()))
            .export(&context(), destination.path())
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Source));
        assert!(!destination.path().join("2024_05_08_08_57_12").exists());
        assert!(!destination.path().join("manifest.json").exists());
    }

    #[tokio::test]
    async fn catalog_failure_rolls_back() {
        let destination = TempDir::new().unwrap();
        std::fs::create_dir(destination.path().join("stac.json")).unwrap();
        let error = Exporter::new(MemorySource::new([record(0, 1.0, 1.0, 2000)]), options())
            .export(&context(), destination.path())
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Package));
        assert!(!destination.path().join("2024_05_08_08_57_12").exists());
        assert!(!destination.path().join("manifest.json").exists());
        assert!(destination.path().join("stac.json").is_dir());
        let names: Vec<_> = std::fs::read_dir(destination.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, ["stac.json"]);
    }

    #[tokio::test]
    async fn manifest_failure_rolls_back() {
        let destination = TempDir::new().unwrap();
        let exporter = Exporter::new(MemorySource::new([record(0, 1.0, 1.0, 2000)]), options());
        let first = QueryContext::starting_at(
            "source:SESAR",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        let _ = exporter.export(&first, destination.path()).await.unwrap();
        let manifest = std::fs::read(destination.path().join("manifest.json")).unwrap();
        std::fs::create_dir(destination.path().join("manifest.json.partial")).unwrap();
        let error = exporter
            .export(&context(), destination.path())
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Package));
        assert!(!destination.path().join("2024_05_08_08_57_12").exists());
        assert_eq!(
            std::fs::read(destination.path().join("manifest.json")).unwrap(),
            manifest
        );
        let catalog: Value =
            serde_json::from_reader(File::open(destination.path().join("stac.json")).unwrap())
                .unwrap();
        let children: Vec<_> = catalog["links"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|link| link["rel"] == "child")
            .map(|link| link["href"].as_str().unwrap())
            .collect();
        assert_eq!(children, ["2024_01_01_00_00_00/stac.json"]);
    }

    #[tokio::test]
    async fn existing_export_directory_is_refused() {
        let destination = TempDir::new().unwrap();
        let exporter = Exporter::new(
            MemorySource::new((0..3).map(|i| record(i, 1.0, 1.0, 2000))),
            options(),
        );
        let first = exporter.export(&context(), destination.path()).await.unwrap();
        let error = exporter
            .export(&context(), destination.path())
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Write));
        let Error::Stage { source, .. } = error else {
            panic!("untagged error");
        };
        assert!(matches!(*source, Error::ExportExists(_)));
        assert_eq!(
            geoparquet::read_records(&first.data_file.path).unwrap().len(),
            3
        );
        assert!(first.collection_path.exists());
        assert_eq!(crate::manifest::read(destination.path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn anomalies_are_counted() {
        let source = MemorySource::new([
            json!({"sample_identifier": "a", "registrant": "someone"}),
            json!({"sample_identifier": "b", "registrant": "someone", "label": 7}),
            json!({"sample_identifier": "c", "produced_by": {"sampling_site": {"location": {"latitude": 100.0, "longitude": 0.0}}}}),
        ]);
        let destination = TempDir::new().unwrap();
        let report = Exporter::new(source, options())
            .export(&context(), destination.path())
            .await
            .unwrap();
        assert_eq!(report.anomalies[&AnomalyKind::ExtraField], 2);
        assert_eq!(report.anomalies[&AnomalyKind::Coerced], 1);
        assert_eq!(report.anomalies[&AnomalyKind::OutOfRangeLocation], 1);
        assert!(report.extent.spatial.is_none());
    }

    #[tokio::test]
    async fn invalid_options() {
        let destination = TempDir::new().unwrap();
        let error = Exporter::new(MemorySource::new(Vec::new()), options().with_page_size(0))
            .export(&context(), destination.path())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidOption(_)));
        assert!(std::fs::read_dir(destination.path()).unwrap().next().is_none());
    }

    struct FailingWriter {
        file: File,
        written: usize,
        limit: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.written + buf.len() > self.limit {
                return Err(io::Error::other("disk full"));
            }
            self.written += buf.len();
            self.file.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    #[tokio::test]
    async fn write_failure_on_last_batch() {
        let records: Vec<_> = (0..5).map(|i| record(i, 1.0, 1.0, 2000)).collect();
        let writer_options = WriterOptions::new().with_batch_size(2);

        // Everything the first two batches put through the writer.
        let mut buf = Vec::new();
        {
            let reconciled: Vec<_> = records
                .iter()
                .map(|raw| crate::reconcile(raw.as_object().unwrap()).record)
                .collect();
            let mut writer = TableWriter::new(&mut buf, writer_options).unwrap();
            writer.write_batch(&reconciled[0..2]).unwrap();
            writer.write_batch(&reconciled[2..4]).unwrap();
        }
        let limit = buf.len();

        let context = context();
        let destination = TempDir::new().unwrap();
        let directory = destination.path().join(context.export_id());
        std::fs::create_dir(&directory).unwrap();
        let data_path = directory.join(context.data_file_name());
        let partial = PartialFile::new(&data_path);
        let partial_path = partial.path().to_path_buf();
        let writer = FailingWriter {
            file: partial.create().unwrap(),
            written: 0,
            limit,
        };
        let writer = TableWriter::with_partial(writer, partial, writer_options).unwrap();
        let error = Exporter::new(MemorySource::new(records), options())
            .export_to(&context, destination.path(), writer)
            .await
            .unwrap_err();
        assert_eq!(error.stage(), Some(Stage::Write));
        assert!(!data_path.exists());
        assert!(!partial_path.exists());
        assert!(!directory.join("stac.json").exists());
        assert!(!destination.path().join("manifest.json").exists());
    }
}
