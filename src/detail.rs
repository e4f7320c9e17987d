//! Per-activity GPS detail fetching.
//!
//! Every run in a page gets its own GPS request. All requests for a page are
//! in flight together (or up to the configured cap), and [`DetailFetcher::attach`]
//! only returns once each of them has finished or failed, which makes it the
//! page barrier for the importer.

use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::Deserialize;

use crate::config::{DetailFailurePolicy, ImportConfig};
use crate::error::Result;
use crate::http::RateLimitedClient;
use crate::{Run, Trace, Waypoint};

/// GPS detail path for an activity, relative to the API root
pub fn gps_path(activity_id: &str) -> String {
    format!("/activities/{}/gps", activity_id)
}

/// API response for the GPS endpoint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GpsResponse {
    elevation_loss: f64,
    elevation_gain: f64,
    interval_metric: f64,
    interval_unit: String,
    waypoints: Vec<ApiWaypoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiWaypoint {
    latitude: f64,
    longitude: f64,
    elevation: f64,
}

fn sampling_interval(metric: f64, unit: &str) -> Duration {
    match unit {
        "SEC" if metric.is_finite() && metric >= 0.0 => Duration::from_secs_f64(metric),
        _ => Duration::ZERO,
    }
}

/// Parse a GPS body. Anything undecodable becomes an empty trace.
fn parse_trace(body: &[u8], activity_id: &str) -> Trace {
    let data: GpsResponse = match serde_json::from_slice(body) {
        Ok(d) => d,
        Err(e) => {
            warn!("[Detail] {}: unreadable GPS payload, keeping empty trace: {}", activity_id, e);
            return Trace::default();
        }
    };

    Trace {
        elevation_loss: data.elevation_loss,
        elevation_gain: data.elevation_gain,
        interval: sampling_interval(data.interval_metric, &data.interval_unit),
        waypoints: data
            .waypoints
            .into_iter()
            .map(|w| Waypoint::new(w.latitude, w.longitude, w.elevation))
            .collect(),
    }
}

/// Result of fetching details for one page
#[derive(Debug, Default)]
pub struct DetailBatch {
    /// Runs to keep, in completion order
    pub runs: Vec<Run>,
    /// IDs whose detail request failed
    pub failed: Vec<String>,
}

/// Concurrent GPS detail fetcher
pub struct DetailFetcher<'a> {
    client: &'a RateLimitedClient,
    max_concurrent: Option<usize>,
    policy: DetailFailurePolicy,
}

impl<'a> DetailFetcher<'a> {
    pub fn new(client: &'a RateLimitedClient, config: &ImportConfig) -> Self {
        Self {
            client,
            max_concurrent: config.max_concurrent_details,
            policy: config.detail_failure_policy,
        }
    }

    /// Fetch the GPS trace of one activity.
    ///
    /// Transport and HTTP errors are returned; a body that does not decode
    /// yields an empty trace.
    pub async fn fetch_trace(&self, activity_id: &str) -> Result<Trace> {
        let body = self.client.request(&gps_path(activity_id), &[]).await?;
        Ok(parse_trace(&body, activity_id))
    }

    /// Fetch traces for every run and attach them.
    ///
    /// Failed runs are dropped or kept with an empty trace depending on the
    /// failure policy. Either way a failure never affects sibling runs.
    pub async fn attach(&self, runs: Vec<Run>) -> DetailBatch {
        let total = runs.len();
        if total == 0 {
            return DetailBatch::default();
        }

        let limit = self.max_concurrent.unwrap_or(total).max(1);
        let start = Instant::now();

        let outcomes: Vec<(Run, Result<Trace>)> = stream::iter(runs)
            .map(|run| async move {
                let result = self.fetch_trace(&run.id).await;
                (run, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut batch = DetailBatch::default();
        for (mut run, result) in outcomes {
            match result {
                Ok(trace) => {
                    debug!("[Detail] {}: {} waypoints", run.id, trace.waypoints.len());
                    run.gps = trace;
                    batch.runs.push(run);
                }
                Err(e) => {
                    batch.failed.push(run.id.clone());
                    match self.policy {
                        DetailFailurePolicy::DropRecord => {
                            warn!("[Detail] {}: GPS request failed, dropping run: {}", run.id, e);
                        }
                        DetailFailurePolicy::KeepSummary => {
                            warn!("[Detail] {}: GPS request failed, keeping summary: {}", run.id, e);
                            run.gps = Trace::default();
                            batch.runs.push(run);
                        }
                    }
                }
            }
        }

        info!(
            "[Detail] {}/{} traces fetched ({} failed, max in flight {}) in {:.2}s",
            total - batch.failed.len(),
            total,
            batch.failed.len(),
            limit,
            start.elapsed().as_secs_f64()
        );

        batch
    }
}
