use crate::{
    Error, Result,
    column::{self, COLUMN_COUNT, COLUMNS, Column, ColumnType},
};
use chrono::{DateTime, Utc};
use geo_types::Point;

/// A record as the backend sent it.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// The value of one column in a [ReconciledRecord].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// A string column value.
    String(String),

    /// A string-array column value.
    Array(Vec<String>),
}

/// A record that conforms to the documented column set.
///
/// Every column is present, in column order, with a value of its declared
/// type.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRecord {
    values: [CellValue; COLUMN_COUNT],
    location: Option<Point>,
    event_time: Option<DateTime<Utc>>,
}

impl CellValue {
    /// Returns the empty value of a column type.
    pub fn empty(r#type: ColumnType) -> CellValue {
        match r#type {
            ColumnType::String => CellValue::String(String::new()),
            ColumnType::StringArray => CellValue::Array(Vec::new()),
        }
    }

    /// Returns this value's column type.
    pub fn r#type(&self) -> ColumnType {
        match self {
            CellValue::String(_) => ColumnType::String,
            CellValue::Array(_) => ColumnType::StringArray,
        }
    }

    /// Returns the string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        if let CellValue::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    /// Returns the strings, if this is an array value.
    pub fn as_array(&self) -> Option<&[String]> {
        if let CellValue::Array(values) = self {
            Some(values)
        } else {
            None
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> CellValue {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> CellValue {
        CellValue::String(value)
    }
}

impl From<Vec<String>> for CellValue {
    fn from(values: Vec<String>) -> CellValue {
        CellValue::Array(values)
    }
}

impl From<Vec<&str>> for CellValue {
    fn from(values: Vec<&str>) -> CellValue {
        CellValue::Array(values.into_iter().map(String::from).collect())
    }
}

impl ReconciledRecord {
    /// Creates a record with every column empty, no location, and no time.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::ReconciledRecord;
    ///
    /// let record = ReconciledRecord::new();
    /// assert_eq!(record.get("label").unwrap().as_str(), Some(""));
    /// assert!(record.location().is_none());
    /// ```
    pub fn new() -> ReconciledRecord {
        ReconciledRecord {
            values: std::array::from_fn(|i| CellValue::empty(COLUMNS[i].r#type)),
            location: None,
            event_time: None,
        }
    }

    /// Sets a column's value.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::ReconciledRecord;
    ///
    /// let mut record = ReconciledRecord::new();
    /// record.set("keywords", vec!["rock"]).unwrap();
    /// assert!(record.set("keywords", "rock").is_err());
    /// assert!(record.set("registrant", "someone").is_err());
    /// ```
    pub fn set(&mut self, name: &str, value: impl Into<CellValue>) -> Result<()> {
        let i = column::position(name).ok_or_else(|| Error::UnknownColumn(name.to_string()))?;
        let value = value.into();
        if value.r#type() != COLUMNS[i].r#type {
            return Err(Error::ColumnType {
                column: name.to_string(),
                expected: COLUMNS[i].r#type,
            });
        }
        self.values[i] = value;
        Ok(())
    }

    /// Returns a column's value by name.
    pub fn get(&self, name: &str) -> Option<&CellValue> {
        column::position(name).map(|i| &self.values[i])
    }

    /// Returns the value at a column position.
    pub fn value(&self, i: usize) -> Option<&CellValue> {
        self.values.get(i)
    }

    /// Iterates over the columns and their values, in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static Column, &CellValue)> {
        COLUMNS.iter().zip(self.values.iter())
    }

    /// Returns the location, if one was found.
    pub fn location(&self) -> Option<Point> {
        self.location
    }

    /// Sets the location.
    pub fn with_location(mut self, location: impl Into<Option<Point>>) -> ReconciledRecord {
        self.location = location.into();
        self
    }

    /// Returns the event time, if one was found.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.event_time
    }

    /// Sets the event time.
    pub fn with_event_time(
        mut self,
        event_time: impl Into<Option<DateTime<Utc>>>,
    ) -> ReconciledRecord {
        self.event_time = event_time.into();
        self
    }

    pub(crate) fn set_at(&mut self, i: usize, value: CellValue) {
        debug_assert_eq!(value.r#type(), COLUMNS[i].r#type);
        self.values[i] = value;
    }
}

impl Default for ReconciledRecord {
    fn default() -> Self {
        ReconciledRecord::new()
    }
}
