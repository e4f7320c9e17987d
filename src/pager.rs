//! Paginated activity listing.
//!
//! Pages are requested at offsets `1, 1 + n, 1 + 2n, ...` until the API
//! returns a page with no items. That empty page is the only stop signal;
//! paging links in the response are ignored.

use chrono_tz::Tz;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ImportConfig;
use crate::error::Result;
use crate::http::RateLimitedClient;
use crate::sync_plan::SyncPlan;
use crate::time_utils::{parse_clock_duration, resolve_start_time};
use crate::{Distance, Run, Tag};

/// Activity listing endpoint, relative to the API root
pub const ACTIVITIES_PATH: &str = "/activities";

/// First offset the API accepts
const FIRST_OFFSET: u32 = 1;

#[derive(Debug, Default, Deserialize)]
struct ActivityPage {
    #[serde(default)]
    data: Option<Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ApiActivity {
    activity_id: Option<String>,
    activity_type: Option<String>,
    status: Option<String>,
    #[serde(rename = "deviceType")]
    device: Option<String>,
    start_time: Option<String>,
    #[serde(rename = "activityTimeZone")]
    timezone: Option<String>,
    metric_summary: Option<MetricSummary>,
    tags: Option<Vec<ApiTag>>,
}

/// Metric values arrive as strings ("512") or numbers depending on the field
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetricSummary {
    calories: Option<Value>,
    fuel: Option<Value>,
    distance: Option<Value>,
    steps: Option<Value>,
    duration: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiTag {
    #[serde(rename = "tagType")]
    name: Option<String>,
    #[serde(rename = "tagValue")]
    value: Option<String>,
}

fn metric_f64(value: Option<&Value>, field: &str, id: &str) -> f64 {
    let parsed = match value {
        None | Some(Value::Null) => return 0.0,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    parsed.unwrap_or_else(|| {
        warn!("[Pager] Activity {}: unreadable {} {:?}, using 0", id, field, value);
        0.0
    })
}

fn metric_i64(value: Option<&Value>, field: &str, id: &str) -> i64 {
    match value {
        Some(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap_or_default(),
        Some(Value::String(s)) if s.trim().parse::<i64>().is_ok() => s.trim().parse().unwrap_or_default(),
        other => metric_f64(other, field, id).trunc() as i64,
    }
}

/// Convert a listing item into a run, leaving malformed fields at defaults.
fn to_run(activity: ApiActivity, id: String, reference: Tz) -> Run {
    let mut run = Run::new(id);
    run.status = activity.status.unwrap_or_default();
    run.device = activity.device.unwrap_or_default();

    let start = activity.start_time.unwrap_or_default();
    let zone = activity.timezone.unwrap_or_default();
    match resolve_start_time(&start, &zone, reference) {
        Ok(t) => run.start_time = Some(t),
        Err(e) => warn!("[Pager] Activity {}: leaving start time unset: {}", run.id, e),
    }

    let metrics = activity.metric_summary.unwrap_or_default();
    run.calories = metric_i64(metrics.calories.as_ref(), "calories", &run.id);
    run.fuel = metric_i64(metrics.fuel.as_ref(), "fuel", &run.id);
    run.steps = metric_i64(metrics.steps.as_ref(), "steps", &run.id);
    run.distance = Distance(metric_f64(metrics.distance.as_ref(), "distance", &run.id));

    match metrics.duration {
        None | Some(Value::Null) => {}
        Some(Value::String(raw)) => match parse_clock_duration(&raw) {
            Ok(d) => run.duration = d,
            Err(e) => warn!("[Pager] Activity {}: leaving duration at zero: {}", run.id, e),
        },
        Some(other) => warn!("[Pager] Activity {}: leaving duration at zero: {}", run.id, other),
    }

    run.tags = activity
        .tags
        .unwrap_or_default()
        .into_iter()
        .map(|t| Tag {
            name: t.name.unwrap_or_default(),
            value: t.value.unwrap_or_default(),
        })
        .collect();

    run
}

/// Parse a listing body into `(items on the page, qualifying runs)`.
///
/// An undecodable body is logged and counts as an empty page.
fn parse_page(body: &[u8], activity_type: &str, reference: Tz) -> (usize, Vec<Run>) {
    let page: ActivityPage = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => {
            warn!("[Pager] Could not decode activity page, treating as empty: {}", e);
            return (0, Vec::new());
        }
    };

    let items = page.data.unwrap_or_default();
    let total = items.len();

    let runs = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<ApiActivity>(item) {
            Ok(a) => Some(a),
            Err(e) => {
                debug!("[Pager] Skipping unreadable activity: {}", e);
                None
            }
        })
        .filter(|a| a.activity_type.as_deref() == Some(activity_type))
        .filter_map(|mut a| {
            let id = a.activity_id.take().filter(|id| !id.is_empty())?;
            Some(to_run(a, id, reference))
        })
        .collect();

    (total, runs)
}

/// Lazy, finite, non-restartable sequence of activity batches.
///
/// # Example
///
/// ```no_run
/// # async fn demo(client: &pegasus::RateLimitedClient) -> pegasus::Result<()> {
/// use pegasus::{ActivityPager, ImportConfig, SyncPlan};
///
/// let config = ImportConfig::default();
/// let plan = SyncPlan::plan(None, chrono::Utc::now());
/// let mut pager = ActivityPager::new(client, &config, &plan);
/// while let Some(batch) = pager.next_batch().await? {
///     println!("{} runs", batch.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct ActivityPager<'a> {
    client: &'a RateLimitedClient,
    page_size: u32,
    offset: u32,
    date_filter: Option<(String, String)>,
    activity_type: String,
    reference: Tz,
    pages: u32,
    done: bool,
}

impl<'a> ActivityPager<'a> {
    pub fn new(client: &'a RateLimitedClient, config: &ImportConfig, plan: &SyncPlan) -> Self {
        Self {
            client,
            page_size: config.page_size,
            offset: FIRST_OFFSET,
            date_filter: plan.date_filter(),
            activity_type: config.activity_type.clone(),
            reference: config.reference_timezone,
            pages: 0,
            done: false,
        }
    }

    /// Number of non-empty pages returned so far
    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("count", self.page_size.to_string()),
            ("offset", self.offset.to_string()),
        ];
        if let Some((since, until)) = &self.date_filter {
            query.push(("startDate", since.clone()));
            query.push(("endDate", until.clone()));
        }
        query
    }

    /// Fetch the next page.
    ///
    /// Returns `Ok(None)` once a page comes back empty, and on every call
    /// after that. A batch may be empty when the page only held activities
    /// of other types. A request error also ends the sequence.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<Run>>> {
        if self.done {
            return Ok(None);
        }

        let body = match self.client.request(ACTIVITIES_PATH, &self.query()).await {
            Ok(b) => b,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };

        let (total, runs) = parse_page(&body, &self.activity_type, self.reference);
        if total == 0 {
            debug!("[Pager] Empty page at offset {}, done", self.offset);
            self.done = true;
            return Ok(None);
        }

        info!(
            "[Pager] {} activities found, {} valid (count: {}, offset: {})",
            total,
            runs.len(),
            self.page_size,
            self.offset
        );

        self.pages += 1;
        self.offset = self.offset.saturating_add(self.page_size);
        Ok(Some(runs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::time::Duration;

    const NY: Tz = chrono_tz::America::New_York;

    #[test]
    fn test_parse_page_filters_type_and_id() {
        let body = br#"{"data":[
            {"activityId":"a1","activityType":"RUN","startTime":"2014-01-15T14:00:00Z","activityTimeZone":"America/New_York"},
            {"activityId":"w1","activityType":"WALK"},
            {"activityId":"","activityType":"RUN"},
            {"activityType":"RUN"}
        ]}"#;
        let (total, runs) = parse_page(body, "RUN", NY);
        assert_eq!(total, 4);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "a1");
    }

    #[test]
    fn test_parse_page_converts_fields() {
        let body = br#"{"data":[{
            "activityId":"a1","activityType":"RUN","status":"COMPLETE","deviceType":"IPOD",
            "startTime":"2014-01-15T14:00:00Z","activityTimeZone":"America/Denver",
            "metricSummary":{"calories":"512","fuel":"1800","distance":"8.0467","steps":"6200","duration":"00:40:00.000"},
            "tags":[{"tagType":"SHOES","tagValue":"Pegasus"},{"tagType":"WEATHER","tagValue":"SUNNY"}]
        }]}"#;
        let (_, runs) = parse_page(body, "RUN", NY);
        let run = &runs[0];

        assert_eq!(run.status, "COMPLETE");
        assert_eq!(run.device, "IPOD");
        assert_eq!(run.calories, 512);
        assert_eq!(run.fuel, 1800);
        assert_eq!(run.steps, 6200);
        assert!((run.distance.kilometers() - 8.0467).abs() < 1e-9);
        assert_eq!(run.duration, Duration::from_secs(2400));
        assert_eq!(run.start_time.unwrap().hour(), 7);
        assert_eq!(run.tags.len(), 2);
        assert_eq!(run.tags[1], Tag { name: "WEATHER".to_string(), value: "SUNNY".to_string() });
        assert!(run.gps.is_empty());
    }

    #[test]
    fn test_malformed_fields_default() {
        let body = br#"{"data":[{
            "activityId":"a1","activityType":"RUN",
            "startTime":"not a time","activityTimeZone":"Nowhere/Special",
            "metricSummary":{"calories":"lots","distance":5.5,"steps":120,"duration":"forever"}
        }]}"#;
        let (_, runs) = parse_page(body, "RUN", NY);
        let run = &runs[0];

        assert_eq!(run.start_time, None);
        assert_eq!(run.calories, 0);
        assert_eq!(run.steps, 120);
        assert_eq!(run.distance.kilometers(), 5.5);
        assert_eq!(run.duration, Duration::ZERO);
    }

    #[test]
    fn test_oversized_duration_defaults_to_zero() {
        let body = br#"{"data":[
            {"activityId":"a1","activityType":"RUN","metricSummary":{"duration":"9999999999999999999:00:00"}},
            {"activityId":"a2","activityType":"RUN","metricSummary":{"duration":"3000000:00:00"}},
            {"activityId":"a3","activityType":"RUN","metricSummary":{"duration":"00:30:00.000"}}
        ]}"#;
        let (total, runs) = parse_page(body, "RUN", NY);

        assert_eq!(total, 3);
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].duration, Duration::ZERO);
        assert_eq!(runs[1].duration, Duration::ZERO);
        assert_eq!(runs[2].duration, Duration::from_secs(1800));
    }

    #[test]
    fn test_bad_item_does_not_spoil_page() {
        let body = br#"{"data":[
            {"activityId":42,"activityType":"RUN"},
            {"activityId":"a2","activityType":"RUN"}
        ]}"#;
        let (total, runs) = parse_page(body, "RUN", NY);
        assert_eq!(total, 2);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, "a2");
    }

    #[test]
    fn test_empty_and_undecodable_pages() {
        assert_eq!(parse_page(br#"{"data":[]}"#, "RUN", NY).0, 0);
        assert_eq!(parse_page(br#"{"paging":{}}"#, "RUN", NY).0, 0);
        assert_eq!(parse_page(b"<html>", "RUN", NY).0, 0);
    }
}
