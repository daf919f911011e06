//! Consistency checks that json-schema can't express.
//!
//! Each check returns its diagnostics in document order and never fails.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;

pub(crate) fn spatial_extent(value: &Value) -> Vec<String> {
    let Some(bbox) = value.pointer("/extent/spatial/bbox") else {
        return vec!["extent.spatial.bbox is missing: no spatial extent".to_string()];
    };
    let Some(bboxes) = bbox.as_array() else {
        return vec!["extent.spatial.bbox is not an array".to_string()];
    };
    if bboxes.is_empty() {
        return vec!["extent.spatial.bbox is empty: no spatial extent was observed".to_string()];
    }
    let mut errors = Vec::new();
    for (i, bbox) in bboxes.iter().enumerate() {
        let Some(numbers) = bbox
            .as_array()
            .and_then(|values| values.iter().map(Value::as_f64).collect::<Option<Vec<_>>>())
        else {
            errors.push(format!("extent.spatial.bbox[{i}] is not a list of numbers"));
            continue;
        };
        let (west, south, east, north) = match numbers.as_slice() {
            [west, south, east, north] => (*west, *south, *east, *north),
            [west, south, _, east, north, _] => (*west, *south, *east, *north),
            _ => {
                errors.push(format!(
                    "extent.spatial.bbox[{i}] has {} values, expected 4 or 6",
                    numbers.len()
                ));
                continue;
            }
        };
        for (name, longitude) in [("west", west), ("east", east)] {
            if !(-180.0..=180.0).contains(&longitude) {
                errors.push(format!(
                    "extent.spatial.bbox[{i}] {name} longitude {longitude} is out of range"
                ));
            }
        }
        for (name, latitude) in [("south", south), ("north", north)] {
            if !(-90.0..=90.0).contains(&latitude) {
                errors.push(format!(
                    "extent.spatial.bbox[{i}] {name} latitude {latitude} is out of range"
                ));
            }
        }
        if south > north {
            errors.push(format!(
                "extent.spatial.bbox[{i}] south ({south}) is greater than north ({north})"
            ));
        }
    }
    errors
}

pub(crate) fn temporal_extent(value: &Value) -> Vec<String> {
    let Some(interval) = value.pointer("/extent/temporal/interval") else {
        return vec!["extent.temporal.interval is missing: no temporal extent".to_string()];
    };
    let Some(intervals) = interval.as_array() else {
        return vec!["extent.temporal.interval is not an array".to_string()];
    };
    if intervals.is_empty() {
        return vec![
            "extent.temporal.interval is empty: no temporal extent was observed".to_string(),
        ];
    }
    let mut errors = Vec::new();
    for (i, interval) in intervals.iter().enumerate() {
        let Some([start, end]) = interval
            .as_array()
            .and_then(|values| <&[Value; 2]>::try_from(values.as_slice()).ok())
        else {
            errors.push(format!(
                "extent.temporal.interval[{i}] must have exactly two values"
            ));
            continue;
        };
        if start.is_null() && end.is_null() {
            errors.push(format!(
                "extent.temporal.interval[{i}] is open on both ends"
            ));
            continue;
        }
        let start = parse_datetime(start, i, "start", &mut errors);
        let end = parse_datetime(end, i, "end", &mut errors);
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                errors.push(format!(
                    "extent.temporal.interval[{i}] start ({}) is after end ({})",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                ));
            }
        }
    }
    errors
}

pub(crate) fn table_columns(value: &Value) -> Vec<String> {
    let Some(columns) = value.get("table:columns").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut names = HashSet::new();
    let mut errors = Vec::new();
    for column in columns {
        if let Some(name) = column.get("name").and_then(Value::as_str) {
            if !names.insert(name) {
                errors.push(format!("table:columns has a duplicate column: {name}"));
            }
        }
    }
    errors
}

pub(crate) fn assets(value: &Value) -> Vec<String> {
    let Some(assets) = value.get("assets").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut errors = Vec::new();
    for (key, asset) in assets {
        let has_roles = asset
            .get("roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| !roles.is_empty());
        if !has_roles {
            errors.push(format!("assets.{key} has no roles"));
        }
    }
    errors
}

fn parse_datetime(
    value: &Value,
    i: usize,
    name: &str,
    errors: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    let s = value.as_str()?;
    match DateTime::parse_from_rfc3339(s) {
        Ok(datetime) => Some(datetime.with_timezone(&Utc)),
        Err(err) => {
            errors.push(format!(
                "extent.temporal.interval[{i}] {name} is not an RFC 3339 datetime ({s}): {err}"
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::{Value, json};

    fn extent(bbox: Value, interval: Value) -> Value {
        json!({"extent": {"spatial": {"bbox": bbox}, "temporal": {"interval": interval}}})
    }

    #[test]
    fn degenerate_point_is_fine() {
        let value = extent(
            json!([[10.0, 20.0, 10.0, 20.0]]),
            json!([["2020-01-01T00:00:00Z", "2020-01-01T00:00:00Z"]]),
        );
        assert!(super::spatial_extent(&value).is_empty());
        assert!(super::temporal_extent(&value).is_empty());
    }

    #[rstest]
    #[case(json!([[0.0, 10.0, 1.0, 5.0]]), "greater than north")]
    #[case(json!([[0.0, 91.0, 1.0, 92.0]]), "latitude 91 is out of range")]
    #[case(json!([[-181.0, 0.0, 1.0, 1.0]]), "longitude -181 is out of range")]
    #[case(json!([[0.0, 1.0]]), "expected 4 or 6")]
    #[case(json!([]), "is empty")]
    fn bad_bbox(#[case] bbox: Value, #[case] message: &str) {
        let errors = super::spatial_extent(&extent(bbox, json!([])));
        assert!(
            errors.iter().any(|error| error.contains(message)),
            "{errors:?}"
        );
    }

    #[rstest]
    #[case(json!([["2021-01-01T00:00:00Z", "2020-01-01T00:00:00Z"]]), "is after end")]
    #[case(json!([[null, null]]), "open on both ends")]
    #[case(json!([["yesterday", null]]), "not an RFC 3339 datetime")]
    #[case(json!([["2020-01-01T00:00:00Z"]]), "exactly two values")]
    fn bad_interval(#[case] interval: Value, #[case] message: &str) {
        let errors = super::temporal_extent(&extent(json!([]), interval));
        assert!(
            errors.iter().any(|error| error.contains(message)),
            "{errors:?}"
        );
    }

    #[test]
    fn missing_extent() {
        let value = json!({});
        assert_eq!(super::spatial_extent(&value).len(), 1);
        assert_eq!(super::temporal_extent(&value).len(), 1);
    }

    #[test]
    fn duplicate_columns() {
        let value = json!({"table:columns": [{"name": "label"}, {"name": "label"}]});
        assert_eq!(
            super::table_columns(&value),
            vec!["table:columns has a duplicate column: label".to_string()]
        );
    }

    #[test]
    fn asset_without_roles() {
        let value = json!({"assets": {"data": {"href": "./a.parquet"}}});
        assert_eq!(
            super::assets(&value),
            vec!["assets.data has no roles".to_string()]
        );
    }
}
