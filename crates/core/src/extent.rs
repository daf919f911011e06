//! Single-pass spatial and temporal extent of an export.

use crate::ReconciledRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use geo_types::Point;
use serde::{Deserialize, Serialize};

/// A two-dimensional bounding box: `[west, south, east, north]`.
pub type Bbox = [f64; 4];

/// A closed time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// The earliest observed time.
    pub start: DateTime<Utc>,

    /// The latest observed time.
    pub end: DateTime<Utc>,
}

/// The extent of an export.
///
/// `None` means nothing was observed. It's never filled with a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extent {
    /// The bounding box of every located record.
    pub spatial: Option<Bbox>,

    /// The interval covering every timed record.
    pub temporal: Option<Interval>,
}

/// Folds records into an [Extent] in constant memory.
#[derive(Debug, Clone, Default)]
pub struct ExtentAccumulator {
    extent: Extent,
    records: u64,
    located: u64,
    timed: u64,
}

/// The STAC encoding of an [Extent].
///
/// An unobserved extent is an empty list, which validation rejects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StacExtent {
    /// The spatial extent.
    pub spatial: SpatialExtent,

    /// The temporal extent.
    pub temporal: TemporalExtent,
}

/// The spatial part of a [StacExtent].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialExtent {
    /// Bounding boxes; the first one covers the whole export.
    pub bbox: Vec<Vec<f64>>,
}

/// The temporal part of a [StacExtent].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemporalExtent {
    /// Intervals; the first one covers the whole export.
    pub interval: Vec<[Option<String>; 2]>,
}

impl Extent {
    /// Returns true if neither a location nor a time was observed.
    pub fn is_empty(&self) -> bool {
        self.spatial.is_none() && self.temporal.is_none()
    }
}

impl ExtentAccumulator {
    /// Creates an accumulator that hasn't observed anything.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::ExtentAccumulator;
    ///
    /// let extent = ExtentAccumulator::new().finalize();
    /// assert!(extent.is_empty());
    /// ```
    pub fn new() -> ExtentAccumulator {
        ExtentAccumulator::default()
    }

    /// Observes one record.
    ///
    /// # Examples
    ///
    /// ```
    /// use geo_types::Point;
    /// use isamples_export::{ExtentAccumulator, ReconciledRecord};
    ///
    /// let mut accumulator = ExtentAccumulator::new();
    /// accumulator.observe(&ReconciledRecord::new().with_location(Point::new(1.0, 2.0)));
    /// accumulator.observe(&ReconciledRecord::new().with_location(Point::new(-1.0, 4.0)));
    /// let extent = accumulator.finalize();
    /// assert_eq!(extent.spatial, Some([-1.0, 2.0, 1.0, 4.0]));
    /// assert!(extent.temporal.is_none());
    /// ```
    pub fn observe(&mut self, record: &ReconciledRecord) {
        self.records += 1;
        if let Some(location) = record.location() {
            self.observe_location(location);
        }
        if let Some(event_time) = record.event_time() {
            self.observe_time(event_time);
        }
    }

    /// Widens the spatial extent to include a point.
    ///
    /// Points that are not finite or that fall outside of WGS84 longitude and
    /// latitude bounds are ignored, and `false` is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use geo_types::Point;
    /// use isamples_export::ExtentAccumulator;
    ///
    /// let mut accumulator = ExtentAccumulator::new();
    /// assert!(accumulator.observe_location(Point::new(10.0, 20.0)));
    /// assert!(!accumulator.observe_location(Point::new(f64::NAN, 20.0)));
    /// assert!(!accumulator.observe_location(Point::new(200.0, 20.0)));
    /// assert_eq!(accumulator.finalize().spatial, Some([10.0, 20.0, 10.0, 20.0]));
    /// ```
    pub fn observe_location(&mut self, point: Point) -> bool {
        let (x, y) = (point.x(), point.y());
        if !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y) {
            return false;
        }
        self.located += 1;
        self.extent.spatial = Some(match self.extent.spatial {
            Some([west, south, east, north]) => {
                [west.min(x), south.min(y), east.max(x), north.max(y)]
            }
            None => [x, y, x, y],
        });
        true
    }

    /// Widens the temporal extent to include a time.
    pub fn observe_time(&mut self, time: DateTime<Utc>) {
        self.timed += 1;
        self.extent.temporal = Some(match self.extent.temporal {
            Some(interval) => Interval {
                start: interval.start.min(time),
                end: interval.end.max(time),
            },
            None => Interval {
                start: time,
                end: time,
            },
        });
    }

    /// The number of records observed.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// The number of observed records that had a location.
    pub fn located(&self) -> u64 {
        self.located
    }

    /// The number of observed records that had an event time.
    pub fn timed(&self) -> u64 {
        self.timed
    }

    /// Returns the extent of everything observed.
    pub fn finalize(self) -> Extent {
        self.extent
    }
}

impl From<&Extent> for StacExtent {
    fn from(extent: &Extent) -> StacExtent {
        StacExtent {
            spatial: SpatialExtent {
                bbox: extent.spatial.iter().map(|bbox| bbox.to_vec()).collect(),
            },
            temporal: TemporalExtent {
                interval: extent
                    .temporal
                    .iter()
                    .map(|interval| {
                        [
                            Some(format_datetime(interval.start)),
                            Some(format_datetime(interval.end)),
                        ]
                    })
                    .collect(),
            },
        }
    }
}

/// Formats a datetime the way STAC wants it, in UTC with a `Z`.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
///
/// let datetime = Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap();
/// assert_eq!(isamples_export::extent::format_datetime(datetime), "2020-01-02T03:04:05Z");
/// ```
pub fn format_datetime(datetime: DateTime<Utc>) -> String {
    datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
