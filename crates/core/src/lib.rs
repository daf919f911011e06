//! Export [iSamples](https://www.isamples.org/) search results as a
//! [STAC](https://stacspec.org) collection backed by
//! [GeoParquet](https://geoparquet.org/).
//!
//! An export asks the iSamples export service for every record that matches a
//! query, reads the result a page at a time, reconciles each record to a
//! fixed column set, and streams the records into a GeoParquet data file
//! while tracking their spatial and temporal extent. The result is described
//! by a STAC collection, which is validated and written next to the data.
//!
//! # Examples
//!
//! ```no_run
//! use isamples_export::{ExportOptions, Exporter, QueryContext, source::ExportServiceSource};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let source = ExportServiceSource::new(isamples_export::source::DEFAULT_URL)
//!     .unwrap()
//!     .with_jwt(std::env::var("ISAMPLES_JWT").ok());
//! let report = Exporter::new(source, ExportOptions::default())
//!     .export(&QueryContext::new("source:SESAR"), "exports")
//!     .await
//!     .unwrap();
//! println!("wrote {} records to {}", report.records, report.data_file.path.display());
//! # }
//! ```

#![warn(missing_docs, missing_debug_implementations, unused_crate_dependencies)]

pub mod catalog;
pub mod collection;
pub mod column;
pub mod context;
mod error;
mod export;
pub mod extent;
pub mod geoparquet;
pub mod manifest;
pub mod reconcile;
mod record;
pub mod source;

pub use {
    collection::Collection,
    context::QueryContext,
    error::{Error, Stage},
    export::{ExportOptions, ExportReport, Exporter, Prefetch},
    extent::{Extent, ExtentAccumulator},
    geoparquet::DataFile,
    reconcile::reconcile,
    record::{CellValue, RawRecord, ReconciledRecord},
};

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns a string suitable for use as a HTTP user agent.
pub fn user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
use {assert_json_diff as _, mockito as _, tempfile as _};
