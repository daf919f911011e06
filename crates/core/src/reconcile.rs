//! Turn raw backend records into [ReconciledRecord]s.
//!
//! Reconciliation never fails. Anything unexpected is coerced or dropped, and
//! reported as an [Anomaly] so the export can summarize what it saw.

use crate::{
    ReconciledRecord,
    column::{self, COLUMNS, ColumnType, GEOMETRY_COLUMN},
    record::{CellValue, RawRecord},
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use geo_types::Point;
use serde::Serialize;
use serde_json::Value;

/// Members used, in order, to name an object inside a string-array column.
const OBJECT_NAME_MEMBERS: [&str; 3] = ["label", "keyword", "identifier"];

/// Members of `produced_by.sampling_site` that hold a location, in order.
const LOCATION_MEMBERS: [&str; 2] = ["sample_location", "location"];

/// Naive datetime formats accepted for event times, assumed to be UTC.
const NAIVE_DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// The kind of an [Anomaly].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A value had the wrong type and was converted.
    Coerced,

    /// A field that isn't a documented column was dropped.
    ExtraField,

    /// The location's coordinates are outside of the valid range.
    OutOfRangeLocation,

    /// The location couldn't be read.
    UnparsableLocation,

    /// The event time couldn't be read.
    UnparsableTime,
}

/// Something unexpected about a raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    /// What kind of anomaly this is.
    pub kind: AnomalyKind,

    /// The field it was found in.
    pub field: String,
}

/// The outcome of reconciling one raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// The reconciled record.
    pub record: ReconciledRecord,

    /// Everything that was coerced or dropped along the way.
    pub anomalies: Vec<Anomaly>,
}

enum Coordinate {
    Absent,
    Value(f64),
    Invalid,
}

/// Reconciles a raw record to the documented column set.
///
/// # Examples
///
/// ```
/// use isamples_export::reconcile::{AnomalyKind, reconcile};
/// use serde_json::json;
///
/// let raw = json!({
///     "sample_identifier": "IGSN:123",
///     "keywords": "rock",
///     "registrant": "someone",
/// });
/// let reconciliation = reconcile(raw.as_object().unwrap());
/// let record = reconciliation.record;
/// assert_eq!(record.get("keywords").unwrap().as_array().unwrap(), ["rock"]);
/// assert_eq!(record.get("label").unwrap().as_str(), Some(""));
/// assert_eq!(reconciliation.anomalies[0].kind, AnomalyKind::ExtraField);
/// ```
pub fn reconcile(raw: &RawRecord) -> Reconciliation {
    let mut anomalies = Vec::new();
    let mut record = ReconciledRecord::new();
    for (i, column) in COLUMNS.iter().enumerate() {
        let value = raw.get(column.name).unwrap_or(&Value::Null);
        let (value, coerced) = match column.r#type {
            ColumnType::String => string_value(value),
            ColumnType::StringArray => array_value(value),
        };
        if coerced {
            anomalies.push(Anomaly::new(AnomalyKind::Coerced, column.name));
        }
        record.set_at(i, value);
    }
    for key in raw.keys() {
        if key != GEOMETRY_COLUMN && column::position(key).is_none() {
            anomalies.push(Anomaly::new(AnomalyKind::ExtraField, key));
        }
    }
    let location = match location(raw) {
        Ok(location) => location,
        Err(anomaly) => {
            anomalies.push(anomaly);
            None
        }
    };
    let event_time = match event_time(raw) {
        Ok(event_time) => event_time,
        Err(anomaly) => {
            anomalies.push(anomaly);
            None
        }
    };
    Reconciliation {
        record: record.with_location(location).with_event_time(event_time),
        anomalies,
    }
}

/// Parses an event time.
///
/// Accepts RFC 3339, naive datetimes (as UTC), dates, and bare years.
///
/// # Examples
///
/// ```
/// use isamples_export::reconcile::parse_time;
///
/// assert!(parse_time("2020-02-03T04:05:06Z").is_some());
/// assert!(parse_time("2020-02-03").is_some());
/// assert!(parse_time("1999").is_some());
/// assert!(parse_time("last tuesday").is_none());
/// ```
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(s) {
        return Some(datetime.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(s, format) {
            return Some(datetime.and_utc());
        }
    }
    let date = if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        date
    } else if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
        NaiveDate::from_ymd_opt(s.parse().ok()?, 1, 1)?
    } else {
        return None;
    };
    date.and_hms_opt(0, 0, 0).map(|datetime| datetime.and_utc())
}

impl Anomaly {
    fn new(kind: AnomalyKind, field: &str) -> Anomaly {
        Anomaly {
            kind,
            field: field.to_string(),
        }
    }
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalyKind::Coerced => "coerced value",
            AnomalyKind::ExtraField => "extra field",
            AnomalyKind::OutOfRangeLocation => "out-of-range location",
            AnomalyKind::UnparsableLocation => "unparsable location",
            AnomalyKind::UnparsableTime => "unparsable time",
        };
        f.write_str(s)
    }
}

// Structured values in string columns are stored as compact JSON, which is
// their documented encoding, so only scalars count as coerced.
fn string_value(value: &Value) -> (CellValue, bool) {
    match value {
        Value::Null => (CellValue::String(String::new()), false),
        Value::String(s) => (CellValue::String(s.clone()), false),
        Value::Bool(_) | Value::Number(_) => (CellValue::String(value.to_string()), true),
        Value::Array(_) | Value::Object(_) => (CellValue::String(value.to_string()), false),
    }
}

fn array_value(value: &Value) -> (CellValue, bool) {
    match value {
        Value::Null => (CellValue::Array(Vec::new()), false),
        Value::Array(items) => {
            let mut coerced = false;
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match element(item) {
                    Some((s, element_coerced)) => {
                        coerced |= element_coerced;
                        values.push(s);
                    }
                    None => coerced = true,
                }
            }
            (CellValue::Array(values), coerced)
        }
        _ => match element(value) {
            Some((s, coerced)) => (CellValue::Array(vec![s]), coerced),
            None => (CellValue::Array(Vec::new()), true),
        },
    }
}

fn element(value: &Value) -> Option<(String, bool)> {
    match value {
        Value::Null => None,
        Value::String(s) => Some((s.clone(), false)),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) => Some((value.to_string(), true)),
        Value::Object(object) => {
            let name = OBJECT_NAME_MEMBERS
                .iter()
                .find_map(|member| object.get(*member).and_then(Value::as_str));
            match name {
                Some(name) => Some((name.to_string(), false)),
                None => Some((value.to_string(), true)),
            }
        }
    }
}

fn location(raw: &RawRecord) -> Result<Option<Point>, Anomaly> {
    let site = raw
        .get("produced_by")
        .and_then(|produced_by| produced_by.get("sampling_site"));
    let site_location = site.and_then(|site| {
        LOCATION_MEMBERS.iter().find_map(|member| {
            site.get(*member)
                .filter(|location| !location.is_null())
                .map(|location| (*member, location))
        })
    });
    if let Some((member, location)) = site_location {
        let field = &format!("produced_by.sampling_site.{member}");
        let longitude = coordinate(location.get("longitude"));
        let latitude = coordinate(location.get("latitude"));
        match (longitude, latitude) {
            (Coordinate::Absent, Coordinate::Absent) => Ok(None),
            (Coordinate::Value(longitude), Coordinate::Value(latitude)) => {
                checked_point(longitude, latitude, field).map(Some)
            }
            _ => Err(Anomaly::new(AnomalyKind::UnparsableLocation, field)),
        }
    } else if let Some(geometry) = raw.get(GEOMETRY_COLUMN).filter(|value| !value.is_null()) {
        let anomaly = || Anomaly::new(AnomalyKind::UnparsableLocation, GEOMETRY_COLUMN);
        let geometry: geojson::Geometry =
            serde_json::from_value(geometry.clone()).map_err(|_| anomaly())?;
        match geometry.value {
            geojson::Value::Point(position) if position.len() >= 2 => {
                checked_point(position[0], position[1], GEOMETRY_COLUMN).map(Some)
            }
            _ => Err(anomaly()),
        }
    } else {
        Ok(None)
    }
}

fn coordinate(value: Option<&Value>) -> Coordinate {
    match value {
        None | Some(Value::Null) => Coordinate::Absent,
        Some(Value::Number(number)) => number
            .as_f64()
            .map(Coordinate::Value)
            .unwrap_or(Coordinate::Invalid),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Coordinate::Value)
            .unwrap_or(Coordinate::Invalid),
        Some(_) => Coordinate::Invalid,
    }
}

fn checked_point(longitude: f64, latitude: f64, field: &str) -> Result<Point, Anomaly> {
    if !longitude.is_finite() || !latitude.is_finite() {
        Err(Anomaly::new(AnomalyKind::UnparsableLocation, field))
    } else if (-180.0..=180.0).contains(&longitude) && (-90.0..=90.0).contains(&latitude) {
        Ok(Point::new(longitude, latitude))
    } else {
        Err(Anomaly::new(AnomalyKind::OutOfRangeLocation, field))
    }
}

fn event_time(raw: &RawRecord) -> Result<Option<DateTime<Utc>>, Anomaly> {
    let field = "produced_by.result_time";
    match raw
        .get("produced_by")
        .and_then(|produced_by| produced_by.get("result_time"))
    {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_time(s)
            .map(Some)
            .ok_or_else(|| Anomaly::new(AnomalyKind::UnparsableTime, field)),
        Some(_) => Err(Anomaly::new(AnomalyKind::UnparsableTime, field)),
    }
}
