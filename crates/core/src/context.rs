use crate::{Error, Result, manifest};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::Path;

/// The solr field that records when a document was last indexed.
pub const INDEX_UPDATED_TIME: &str = "indexUpdatedTime";

/// How times are written in solr range queries and in the manifest.
pub const SOLR_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

const EXPORT_ID_FORMAT: &str = "%Y_%m_%d_%H_%M_%S";

/// Everything that identifies one export run.
///
/// A context is fixed once an export starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    query: String,
    export_id: String,
    started_at: DateTime<Utc>,
    refresh_date: Option<String>,
}

impl QueryContext {
    /// Creates a context for a query, started now.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::QueryContext;
    ///
    /// let context = QueryContext::new("source:SESAR");
    /// assert_eq!(context.query(), "source:SESAR");
    /// assert_eq!(context.effective_query(), "source:SESAR");
    /// ```
    pub fn new(query: impl ToString) -> QueryContext {
        QueryContext::starting_at(query, Utc::now())
    }

    /// Creates a context for a query with a fixed start time.
    ///
    /// The export id is derived from the start time.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use isamples_export::QueryContext;
    ///
    /// let started_at = Utc.with_ymd_and_hms(2024, 5, 8, 8, 57, 12).unwrap();
    /// let context = QueryContext::starting_at("source:SESAR", started_at);
    /// assert_eq!(context.export_id(), "2024_05_08_08_57_12");
    /// ```
    pub fn starting_at(query: impl ToString, started_at: DateTime<Utc>) -> QueryContext {
        QueryContext {
            query: query.to_string(),
            export_id: started_at.format(EXPORT_ID_FORMAT).to_string(),
            started_at,
            refresh_date: None,
        }
    }

    /// Sets the refresh date, restricting the export to records indexed since.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::QueryContext;
    ///
    /// let context = QueryContext::new("source:SESAR")
    ///     .with_refresh_date("2024-05-08T08:57:12.000000Z".to_string());
    /// assert_eq!(
    ///     context.effective_query(),
    ///     "source:SESAR AND indexUpdatedTime:[2024-05-08T08:57:12.000000Z TO *]"
    /// );
    /// ```
    pub fn with_refresh_date(mut self, refresh_date: impl Into<Option<String>>) -> QueryContext {
        self.refresh_date = refresh_date.into();
        self
    }

    /// Creates a context that refreshes the most recent export in a
    /// directory.
    ///
    /// The query comes from the last manifest entry, and its start time
    /// becomes the refresh date.
    pub fn refresh_from(directory: impl AsRef<Path>) -> Result<QueryContext> {
        let directory = directory.as_ref();
        let entry = manifest::read(directory)?
            .pop()
            .ok_or_else(|| Error::MissingManifest(directory.display().to_string()))?;
        Ok(QueryContext::new(entry.query).with_refresh_date(entry.start_time))
    }

    /// The query as given.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// The query that's sent to the backend.
    pub fn effective_query(&self) -> String {
        match &self.refresh_date {
            Some(refresh_date) => format!(
                "{} AND {INDEX_UPDATED_TIME}:[{refresh_date} TO *]",
                self.query
            ),
            None => self.query.clone(),
        }
    }

    /// The export id.
    pub fn export_id(&self) -> &str {
        &self.export_id
    }

    /// When the export started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The refresh date, if this is a refresh.
    pub fn refresh_date(&self) -> Option<&str> {
        self.refresh_date.as_deref()
    }

    /// The file name of the data file.
    pub fn data_file_name(&self) -> String {
        format!("isamples_export_{}.parquet", self.export_id)
    }
}

/// Formats a time for solr.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
///
/// let datetime = Utc.with_ymd_and_hms(2024, 5, 8, 8, 57, 12).unwrap();
/// assert_eq!(
///     isamples_export::context::solr_time(datetime),
///     "2024-05-08T08:57:12.000000Z"
/// );
/// ```
pub fn solr_time(datetime: DateTime<Utc>) -> String {
    datetime.format(SOLR_TIME_FORMAT).to_string()
}

/// Parses a time written by [solr_time].
pub fn parse_solr_time(s: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, SOLR_TIME_FORMAT)
        .map(|datetime| datetime.and_utc())
        .map_err(Error::from)
}
