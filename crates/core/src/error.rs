use crate::column::ColumnType;
use std::{path::PathBuf, time::Duration};
use thiserror::Error;

/// Error enum for crate-specific errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// [arrow_schema::ArrowError]
    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    /// The backend answered with a non-success status.
    #[error("backend returned {status} for {url}")]
    Backend {
        /// The HTTP status code.
        status: u16,

        /// The url that was requested.
        url: String,
    },

    /// [chrono::ParseError]
    #[error(transparent)]
    ChronoParse(#[from] chrono::ParseError),

    /// A value doesn't match its column's type.
    #[error("column {column} holds {expected} values")]
    ColumnType {
        /// The column name.
        column: String,

        /// The column's declared type.
        expected: ColumnType,
    },

    /// The export directory already exists.
    #[error("export directory already exists: {0}")]
    ExportExists(PathBuf),

    /// The export service reported that a job failed.
    #[error("export job {uuid} failed: {message}")]
    ExportJob {
        /// The job id.
        uuid: String,

        /// What the service said about the failure.
        message: String,
    },

    /// The data file path doesn't have a usable file name.
    #[error("invalid data file path: {0}")]
    InvalidDataFile(String),

    /// An export option is out of range.
    #[error("invalid export option: {0}")]
    InvalidOption(String),

    /// [std::io::Error]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A page couldn't be decoded.
    #[error("malformed page: {0}")]
    MalformedPage(String),

    /// There's no manifest entry to refresh from.
    #[error("no manifest entries in {0}")]
    MissingManifest(String),

    /// The table writer wasn't opened with a destination path.
    #[error("table writer has no destination")]
    NoDestination,

    /// [parquet::errors::ParquetError]
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    /// The prefetch task went away before delivering the last page.
    #[error("record prefetch ended before the last page")]
    PrefetchClosed,

    /// [reqwest::Error]
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// A page fetch kept failing.
    #[error("page fetch failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        /// How many times the page was requested.
        attempts: usize,

        /// The last failure.
        #[source]
        source: Box<Error>,
    },

    /// [serde_json::Error]
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// An export failed in a specific stage.
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// The stage that failed.
        stage: Stage,

        /// The underlying error.
        #[source]
        source: Box<Error>,
    },

    /// A page fetch took too long.
    #[error("page fetch timed out after {0:?}")]
    Timeout(Duration),

    /// There's no column with this name.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// [url::ParseError]
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    /// [isamples_export_validate::Error]
    #[error(transparent)]
    Validate(#[from] isamples_export_validate::Error),

    /// [wkb::error::WkbError]
    #[error(transparent)]
    Wkb(#[from] wkb::error::WkbError),
}

/// The stages of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Fetching pages of records.
    Source,

    /// Writing the data file.
    Write,

    /// Building the collection.
    Assemble,

    /// Validating the collection.
    Validate,

    /// Writing the collection, manifest, and catalog.
    Package,
}

impl Error {
    /// Tags this error with the stage it happened in.
    ///
    /// An error that's already tagged keeps its original stage.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::{Error, Stage};
    ///
    /// let error = Error::PrefetchClosed.at(Stage::Source).at(Stage::Write);
    /// assert_eq!(error.stage(), Some(Stage::Source));
    /// ```
    pub fn at(self, stage: Stage) -> Error {
        match self {
            Error::Stage { .. } => self,
            error => Error::Stage {
                stage,
                source: Box::new(error),
            },
        }
    }

    /// Returns false for failures that asking again won't fix.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::Error;
    ///
    /// assert!(Error::PrefetchClosed.is_retryable());
    /// assert!(!Error::ExportJob { uuid: "a".into(), message: "bad query".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::ExportJob { .. })
    }

    /// Returns the stage this error happened in, if it's been tagged.
    pub fn stage(&self) -> Option<Stage> {
        if let Error::Stage { stage, .. } = self {
            Some(*stage)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Source => "source",
            Stage::Write => "write",
            Stage::Assemble => "assemble",
            Stage::Validate => "validate",
            Stage::Package => "package",
        };
        f.write_str(name)
    }
}
