//! Heatmap aggregation over stored runs.
//!
//! Waypoints are snapped to a fixed-step coordinate grid and counted per
//! cell. Counting is per waypoint, not per run, so dense sampling in one
//! place weighs that cell more heavily.
//!
//! Only runs whose own bounding box intersects the query box contribute;
//! once a run qualifies, all of its waypoints are counted.

use std::collections::HashMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{Bounds, Run, Trace};

/// Default grid step in degrees (roughly 55m of latitude)
pub const DEFAULT_PRECISION: f64 = 5e-4;

/// Query box for heatmap computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatmapBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl HeatmapBounds {
    /// Build from north-east and south-west `(lat, lng)` corners.
    ///
    /// Swapped corners are normalized rather than rejected.
    pub fn from_corners(ne: (f64, f64), sw: (f64, f64)) -> Self {
        Self {
            min_lat: ne.0.min(sw.0),
            max_lat: ne.0.max(sw.0),
            min_lng: ne.1.min(sw.1),
            max_lng: ne.1.max(sw.1),
        }
    }

    fn as_bounds(&self) -> Bounds {
        Bounds {
            min_lat: self.min_lat,
            max_lat: self.max_lat,
            min_lng: self.min_lng,
            max_lng: self.max_lng,
        }
    }
}

/// A single grid cell and its hit count.
///
/// Serializes as `{"lat": .., "lng": .., "cnt": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    /// Quantized latitude
    pub lat: f64,
    /// Quantized longitude
    pub lng: f64,
    /// Number of waypoints that fell into this cell
    pub cnt: u64,
}

/// Grid index of a coordinate (truncated toward zero)
type CellCoord = (i64, i64);

fn grid_index(value: f64, precision: f64) -> i64 {
    (value / precision).trunc() as i64
}

/// Snap a coordinate to the grid.
///
/// Each component is divided by `precision`, truncated toward zero and
/// multiplied back, so `-74.00123` with a step of `5e-4` lands on `-74.0010`,
/// not `-74.0015`.
pub fn quantize(lat: f64, lng: f64, precision: f64) -> (f64, f64) {
    (
        grid_index(lat, precision) as f64 * precision,
        grid_index(lng, precision) as f64 * precision,
    )
}

/// Heatmap grid builder
#[derive(Debug)]
struct HeatmapGrid {
    precision: f64,
    cells: HashMap<CellCoord, u64>,
}

impl HeatmapGrid {
    fn new(precision: f64) -> Self {
        Self {
            precision,
            cells: HashMap::new(),
        }
    }

    fn add_trace(&mut self, trace: &Trace) {
        for w in &trace.waypoints {
            let key = (
                grid_index(w.latitude, self.precision),
                grid_index(w.longitude, self.precision),
            );
            *self.cells.entry(key).or_insert(0) += 1;
        }
    }

    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    fn merge(mut self, other: HeatmapGrid) -> HeatmapGrid {
        for (key, cnt) in other.cells {
            *self.cells.entry(key).or_insert(0) += cnt;
        }
        self
    }

    fn build(self) -> Vec<HeatmapCell> {
        let precision = self.precision;
        self.cells
            .into_iter()
            .map(|((row, col), cnt)| HeatmapCell {
                lat: row as f64 * precision,
                lng: col as f64 * precision,
                cnt,
            })
            .collect()
    }
}

fn overlaps(run: &Run, query: &Bounds) -> bool {
    run.gps.bounds().is_some_and(|b| b.intersects(query))
}

/// Aggregate the waypoints of every run overlapping `bounds` into grid cells.
///
/// Runs without waypoints never contribute. Output order is unspecified.
/// A non-positive or non-finite `precision` yields no cells.
pub fn aggregate(runs: &[Run], bounds: &HeatmapBounds, precision: f64) -> Vec<HeatmapCell> {
    if !(precision.is_finite() && precision > 0.0) {
        warn!("[Heatmap] Invalid precision {}, returning no cells", precision);
        return Vec::new();
    }

    let query = bounds.as_bounds();

    #[cfg(feature = "parallel")]
    let grid = {
        use rayon::prelude::*;
        runs.par_iter()
            .filter(|run| overlaps(run, &query))
            .fold(
                || HeatmapGrid::new(precision),
                |mut grid, run| {
                    grid.add_trace(&run.gps);
                    grid
                },
            )
            .reduce(|| HeatmapGrid::new(precision), HeatmapGrid::merge)
    };

    #[cfg(not(feature = "parallel"))]
    let grid = {
        let mut grid = HeatmapGrid::new(precision);
        for run in runs.iter().filter(|run| overlaps(run, &query)) {
            grid.add_trace(&run.gps);
        }
        grid
    };

    let cells = grid.build();
    debug!("[Heatmap] {} runs -> {} cells", runs.len(), cells.len());
    cells
}
