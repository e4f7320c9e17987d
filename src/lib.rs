//! # Pegasus
//!
//! Imports running activities and their GPS traces from a remote fitness API
//! into a local JSON snapshot, and aggregates that snapshot into heatmaps.
//!
//! This library provides:
//! - Paginated, rate-limit aware activity import with incremental sync
//! - Concurrent per-activity GPS detail fetching
//! - A stable snapshot file format with atomic persistence
//! - Coordinate quantization and heatmap binning
//!
//! ## Features
//!
//! - **`http`** - Enable the HTTP client, pager, detail fetcher and importer
//! - **`parallel`** - Enable parallel heatmap aggregation with rayon
//! - **`cli`** - Build the `pegasus` binary (implies `http`)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use pegasus::{Run, Trace, Waypoint, HeatmapBounds, aggregate};
//!
//! let mut run = Run::new("a1");
//! run.gps = Trace {
//!     waypoints: vec![
//!         Waypoint::new(40.71234, -74.00123, 10.0),
//!         Waypoint::new(40.71245, -74.00119, 10.5),
//!     ],
//!     ..Trace::default()
//! };
//!
//! let bounds = HeatmapBounds::from_corners((40.8, -73.9), (40.6, -74.1));
//! let cells = aggregate(&[run], &bounds, 5e-4);
//!
//! assert_eq!(cells.len(), 1);
//! assert_eq!(cells[0].cnt, 2);
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod config;
pub mod error;
pub mod geo_utils;
pub mod heatmap;
pub mod snapshot;
pub mod sync_plan;
pub mod time_utils;

// HTTP modules for activity import
#[cfg(feature = "http")]
pub mod detail;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod importer;
#[cfg(feature = "http")]
pub mod pager;

pub use config::{DetailFailurePolicy, ImportConfig};
pub use error::{PegasusError, Result};
pub use heatmap::{aggregate, quantize, HeatmapBounds, HeatmapCell, DEFAULT_PRECISION};
pub use snapshot::{merge_runs, sort_runs, Snapshot, SnapshotMeta, SNAPSHOT_VERSION};
pub use sync_plan::{SyncMode, SyncPlan};

#[cfg(feature = "http")]
pub use detail::{DetailBatch, DetailFetcher};
#[cfg(feature = "http")]
pub use http::RateLimitedClient;
#[cfg(feature = "http")]
pub use importer::{ImportReport, Importer};
#[cfg(feature = "http")]
pub use pager::ActivityPager;

/// Kilometres per mile.
const KM_PER_MILE: f64 = 1.60934;

// ============================================================================
// Core Types
// ============================================================================

/// A single GPS sample.
///
/// Serialized as a compact `[lat, lon, elevation]` triple. Any other array
/// length is rejected when parsing.
///
/// # Example
/// ```
/// use pegasus::Waypoint;
/// let w: Waypoint = serde_json::from_str("[40.7, -74.0, 12.5]").unwrap();
/// assert_eq!(w, Waypoint::new(40.7, -74.0, 12.5));
/// assert!(serde_json::from_str::<Waypoint>("[40.7, -74.0]").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Waypoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

impl Waypoint {
    /// Create a new waypoint.
    pub fn new(latitude: f64, longitude: f64, elevation: f64) -> Self {
        Self { latitude, longitude, elevation }
    }
}

impl Serialize for Waypoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(3)?;
        tup.serialize_element(&self.latitude)?;
        tup.serialize_element(&self.longitude)?;
        tup.serialize_element(&self.elevation)?;
        tup.end()
    }
}

impl<'de> Deserialize<'de> for Waypoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct WaypointVisitor;

        impl<'de> Visitor<'de> for WaypointVisitor {
            type Value = Waypoint;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a [lat, lon, elevation] array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Waypoint, A::Error> {
                let mut values = [0.0f64; 3];
                let mut len = 0usize;
                while let Some(v) = seq.next_element::<f64>()? {
                    if len < 3 {
                        values[len] = v;
                    }
                    len += 1;
                }
                if len != 3 {
                    return Err(de::Error::custom(PegasusError::InvalidWaypoint(len)));
                }
                Ok(Waypoint::new(values[0], values[1], values[2]))
            }
        }

        deserializer.deserialize_seq(WaypointVisitor)
    }
}

/// Bounding box of a trace or a query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from waypoints. Returns `None` for an empty slice.
    pub fn from_waypoints(points: &[Waypoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        Some(geo_utils::compute_bounds(points))
    }

    /// Whether two boxes share at least one point (edges included).
    pub fn intersects(&self, other: &Bounds) -> bool {
        geo_utils::bounds_intersect(self, other)
    }
}

/// A free-form name/value label attached to a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

/// Distance in kilometres.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Distance(pub f64);

impl Distance {
    pub fn kilometers(self) -> f64 {
        self.0
    }

    pub fn miles(self) -> f64 {
        self.0 / KM_PER_MILE
    }
}

/// GPS detail of a run.
///
/// An empty trace is valid: the activity simply recorded no GPS data.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    #[serde(default)]
    pub elevation_loss: f64,
    #[serde(default)]
    pub elevation_gain: f64,
    /// Nominal sampling interval
    #[serde(default, with = "time_utils::duration_nanos")]
    pub interval: Duration,
    /// Time-ordered samples
    #[serde(default, deserialize_with = "null_as_default")]
    pub waypoints: Vec<Waypoint>,
}

impl Trace {
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Bounding box over all waypoints, `None` when there are none.
    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_waypoints(&self.waypoints)
    }

    /// Mean latitude, longitude and elevation. Zero for an empty trace.
    pub fn waypoint_average(&self) -> Waypoint {
        geo_utils::compute_center(&self.waypoints)
    }

    /// Great-circle length of the trace in metres.
    pub fn track_length_meters(&self) -> f64 {
        geo_utils::polyline_length(&self.waypoints)
    }
}

/// A completed running activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Remote activity identifier, unique within a snapshot
    pub id: String,
    /// Start time in the reference zone, `None` when the API value was unusable
    #[serde(default)]
    pub start_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub device: String,

    #[serde(default)]
    pub calories: i64,
    #[serde(default)]
    pub steps: i64,
    #[serde(default)]
    pub fuel: i64,
    #[serde(default)]
    pub distance: Distance,
    #[serde(default, with = "time_utils::duration_nanos")]
    pub duration: Duration,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub gps: Trace,
}

impl Run {
    /// Create an empty run with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            start_time: None,
            status: String::new(),
            device: String::new(),
            calories: 0,
            steps: 0,
            fuel: 0,
            distance: Distance::default(),
            duration: Duration::ZERO,
            tags: Vec::new(),
            gps: Trace::default(),
        }
    }

    /// Copy of this run with the GPS trace stripped.
    pub fn without_trace(&self) -> Run {
        Run {
            gps: Trace::default(),
            ..self.clone()
        }
    }

    /// Average pace per kilometre, `None` for a zero distance.
    pub fn pace(&self) -> Option<Duration> {
        pace_for(self.duration, self.distance.kilometers())
    }

    /// Average pace per mile, `None` for a zero distance.
    pub fn pace_mi(&self) -> Option<Duration> {
        pace_for(self.duration, self.distance.miles())
    }

    /// Average speed in km/h.
    pub fn speed(&self) -> f64 {
        speed_for(self.distance.kilometers(), self.duration)
    }

    /// Average speed in mph.
    pub fn speed_mi(&self) -> f64 {
        speed_for(self.distance.miles(), self.duration)
    }
}

fn pace_for(duration: Duration, distance: f64) -> Option<Duration> {
    if distance <= 0.0 || !distance.is_finite() {
        return None;
    }
    Duration::try_from_secs_f64(duration.as_secs_f64() / distance).ok()
}

/// Treat an explicit `null` like a missing field. Older snapshot writers
/// emit `null` for empty lists.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn speed_for(distance: f64, duration: Duration) -> f64 {
    let hours = duration.as_secs_f64() / 3600.0;
    if hours <= 0.0 {
        return 0.0;
    }
    distance / hours
}

fn format_clock(d: Duration) -> String {
    let secs = d.as_secs_f64().round() as u64;
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self
            .start_time
            .map(|t| t.format("%-m/%-d/%Y %-I:%M %p %:z").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let pace = self
            .pace_mi()
            .map(format_clock)
            .unwrap_or_else(|| "-".to_string());

        write!(
            f,
            "start: {}; distance: {:.2}mi, duration: {}, pace: {} min/mi, speed: {:.2} mph, calories: {}, {} waypoints",
            start,
            self.distance.miles(),
            format_clock(self.duration),
            pace,
            self.speed_mi(),
            self.calories,
            self.gps.waypoints.len()
        )
    }
}
