//! Integration tests for the importer
//!
//! These tests drive a real import against a wiremock server serving
//! recorded-style fixtures, with snapshots written to temp directories.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{FixedOffset, TimeZone, Utc};
use pegasus::{
    DetailFailurePolicy, ImportConfig, Importer, PegasusError, Run, Snapshot, SnapshotMeta, Trace,
    Waypoint, SNAPSHOT_VERSION,
};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, path_regex, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = include_str!("fixtures/activities_page.json");
const EMPTY_PAGE: &str = include_str!("fixtures/activities_empty.json");
const GPS_R1: &str = include_str!("fixtures/gps_r1.json");
const GPS_R2: &str = include_str!("fixtures/gps_r2.json");
const QUOTA_FAULT: &str = include_str!("fixtures/quota_fault.json");

/// Config pointing at the mock server with millisecond cooldowns
fn test_config(server: &MockServer, output: &Path) -> ImportConfig {
    ImportConfig {
        base_url: server.uri(),
        access_token: "test-token".to_string(),
        app_id: "test-app".to_string(),
        output_path: output.to_path_buf(),
        quota_cooldown: Duration::from_millis(20),
        request_timeout: Duration::from_secs(5),
        ..ImportConfig::default()
    }
}

fn json(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "application/json")
}

async fn mount_page(server: &MockServer, offset: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path("/activities"))
        .and(query_param("offset", offset))
        .respond_with(json(body))
        .mount(server)
        .await;
}

async fn mount_gps(server: &MockServer, id: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/activities/{}/gps", id)))
        .respond_with(response)
        .mount(server)
        .await;
}

/// One page with r1, w1 and r2, then an empty page
async fn mount_standard_listing(server: &MockServer) {
    mount_page(server, "1", PAGE).await;
    mount_page(server, "51", EMPTY_PAGE).await;
}

fn prior_run(id: &str, day: u32) -> Run {
    let mut run = Run::new(id);
    run.start_time = Some(
        FixedOffset::west_opt(5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2014, 12, day, 7, 0, 0)
            .unwrap(),
    );
    run.calories = 1;
    run.gps = Trace {
        waypoints: vec![Waypoint::new(41.0, -73.5, 20.0)],
        ..Trace::default()
    };
    run
}

/// A listing page of RUN activities with the given IDs
fn page_of(ids: &[&str]) -> String {
    let data: Vec<serde_json::Value> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            serde_json::json!({
                "activityId": id,
                "activityType": "RUN",
                "startTime": format!("2015-03-{:02}T12:00:00Z", i + 1),
                "activityTimeZone": "America/New_York"
            })
        })
        .collect();
    serde_json::json!({ "data": data }).to_string()
}

/// Write a snapshot with no watermark, so the next import is full
fn write_unstamped(path: &Path, runs: Vec<Run>) {
    let snapshot = Snapshot {
        runs,
        version: SNAPSHOT_VERSION,
        meta: SnapshotMeta::default(),
    };
    snapshot.save(path).unwrap();
}

fn ids(snapshot: &Snapshot) -> Vec<&str> {
    snapshot.runs.iter().map(|r| r.id.as_str()).collect()
}

mod full_import {
    use super::*;

    #[tokio::test]
    async fn test_imports_runs_with_traces() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        Mock::given(method("GET"))
            .and(path("/activities"))
            .and(query_param("count", "50"))
            .and(query_param("offset", "1"))
            .and(query_param_is_missing("startDate"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header("appid", "test-app"))
            .respond_with(json(PAGE))
            .expect(1)
            .mount(&server)
            .await;
        mount_page(&server, "51", EMPTY_PAGE).await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", json(GPS_R2)).await;

        let importer = Importer::new(test_config(&server, &output)).unwrap();
        let report = importer.run().await.expect("import failed");

        assert!(report.plan.is_full());
        assert_eq!(report.pages, 1);
        assert_eq!(report.fetched, 2);
        assert!(report.failed_details.is_empty());
        assert_eq!(report.total_runs, 2);
        assert_eq!(report.quota_hits, 0);

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert!(snapshot.watermark().is_some());
        // WALK activity is filtered, newest first
        assert_eq!(ids(&snapshot), vec!["r1", "r2"]);

        let r1 = &snapshot.runs[0];
        assert_eq!(r1.start_time.unwrap().to_rfc3339(), "2015-03-05T06:30:00-05:00");
        assert_eq!(r1.calories, 650);
        assert_eq!(r1.duration, Duration::from_secs(52 * 60 + 30));
        assert_eq!(r1.tags.len(), 2);
        assert_eq!(r1.gps.waypoints.len(), 3);
        assert_eq!(r1.gps.interval, Duration::from_secs(10));
        assert_eq!(r1.gps.waypoints[2], Waypoint::new(40.713377, -74.001921, 6.75));

        // Los Angeles wall clock relabelled in New York
        let r2 = &snapshot.runs[1];
        assert_eq!(r2.start_time.unwrap().to_rfc3339(), "2015-03-04T15:30:00-05:00");
        assert_eq!(r2.duration, Duration::from_millis(31 * 60 * 1000 + 12_500));
    }

    #[tokio::test]
    async fn test_stops_at_first_empty_page() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        mount_standard_listing(&server).await;
        Mock::given(method("GET"))
            .and(path("/activities"))
            .and(query_param("offset", "101"))
            .respond_with(json(PAGE))
            .expect(0)
            .mount(&server)
            .await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", json(GPS_R2)).await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.pages, 1);
    }

    #[tokio::test]
    async fn test_first_page_empty_writes_empty_snapshot() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        mount_page(&server, "1", EMPTY_PAGE).await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.pages, 0);

        let snapshot = Snapshot::load(&output).unwrap();
        assert!(snapshot.runs.is_empty());
        assert!(snapshot.watermark().is_some());
    }
}

mod quota {
    use super::*;

    #[tokio::test]
    async fn test_quota_violation_is_waited_out() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        Mock::given(method("GET"))
            .and(path("/activities"))
            .and(query_param("offset", "1"))
            .respond_with(ResponseTemplate::new(429).set_body_raw(QUOTA_FAULT, "application/json"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_standard_listing(&server).await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", json(GPS_R2)).await;

        let config = ImportConfig {
            quota_cooldown: Duration::from_millis(250),
            ..test_config(&server, &output)
        };
        let start = Instant::now();
        let report = Importer::new(config).unwrap().run().await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(report.quota_hits, 1);
        assert_eq!(report.fetched, 2);
    }

    #[tokio::test]
    async fn test_quota_on_detail_only_stalls_that_run() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        mount_standard_listing(&server).await;
        Mock::given(method("GET"))
            .and(path("/activities/r2/gps"))
            .respond_with(json(QUOTA_FAULT))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", json(GPS_R2)).await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.quota_hits, 2);
        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(snapshot.runs[1].gps.waypoints.len(), 2);
    }
}

mod incremental {
    use super::*;

    #[tokio::test]
    async fn test_window_and_retention() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        let watermark = Utc.with_ymd_and_hms(2015, 3, 5, 12, 0, 0).unwrap();
        Snapshot::new(vec![prior_run("old", 1), prior_run("older", 2)], watermark)
            .save(&output)
            .unwrap();

        Mock::given(method("GET"))
            .and(path("/activities"))
            .and(query_param("offset", "1"))
            .and(query_param("startDate", "2015-03-04"))
            .respond_with(json(PAGE))
            .expect(1)
            .mount(&server)
            .await;
        mount_page(&server, "51", EMPTY_PAGE).await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", json(GPS_R2)).await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert!(!report.plan.is_full());
        assert_eq!(report.plan.since, Some(watermark - chrono::Duration::days(1)));
        assert!(report.plan.until.unwrap() >= Utc::now());

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(ids(&snapshot), vec!["r1", "r2", "older", "old"]);
        // Prior-only runs are untouched
        assert_eq!(snapshot.runs[3], prior_run("old", 1));
        assert!(snapshot.watermark().unwrap() > watermark);
    }

    #[tokio::test]
    async fn test_reimport_replaces_by_id() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        write_unstamped(&output, vec![prior_run("r1", 3), prior_run("keep", 4)]);

        mount_standard_listing(&server).await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", json(GPS_R2)).await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert!(report.plan.is_full());

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(ids(&snapshot), vec!["r1", "r2", "keep"]);

        let r1 = &snapshot.runs[0];
        assert_eq!(r1.calories, 650);
        assert_eq!(r1.gps.waypoints.len(), 3);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_means_full_import() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");
        fs::write(&output, "{ definitely not a snapshot").unwrap();

        Mock::given(method("GET"))
            .and(path("/activities"))
            .and(query_param("offset", "1"))
            .and(query_param_is_missing("startDate"))
            .respond_with(json(EMPTY_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert!(report.plan.is_full());
        assert!(Snapshot::load(&output).is_ok());
    }
}

mod details {
    use super::*;

    #[tokio::test]
    async fn test_failed_detail_drops_only_that_run() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        mount_standard_listing(&server).await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", ResponseTemplate::new(500).set_body_string("boom")).await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();

        assert_eq!(report.failed_details, vec!["r2".to_string()]);
        assert_eq!(report.fetched, 1);

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(ids(&snapshot), vec!["r1"]);
    }

    #[tokio::test]
    async fn test_keep_summary_policy() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        mount_standard_listing(&server).await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", ResponseTemplate::new(500).set_body_string("boom")).await;

        let config = ImportConfig {
            detail_failure_policy: DetailFailurePolicy::KeepSummary,
            max_concurrent_details: Some(1),
            ..test_config(&server, &output)
        };
        let report = Importer::new(config).unwrap().run().await.unwrap();
        assert_eq!(report.failed_details, vec!["r2".to_string()]);

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(ids(&snapshot), vec!["r1", "r2"]);
        assert!(snapshot.runs[1].gps.is_empty());
        assert_eq!(snapshot.runs[1].calories, 420);
    }

    #[tokio::test]
    async fn test_unparsable_detail_keeps_run_with_empty_trace() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        mount_standard_listing(&server).await;
        mount_gps(&server, "r1", json(GPS_R1)).await;
        mount_gps(&server, "r2", ResponseTemplate::new(200).set_body_string("<html>maintenance</html>")).await;

        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert!(report.failed_details.is_empty());

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(ids(&snapshot), vec!["r1", "r2"]);
        assert!(snapshot.runs[1].gps.is_empty());
    }
}

mod transport {
    use super::*;

    /// r2's GPS response outlives the request timeout
    async fn mount_slow_r2(server: &MockServer) {
        mount_standard_listing(server).await;
        mount_gps(server, "r1", json(GPS_R1)).await;
        mount_gps(server, "r2", json(GPS_R2).set_delay(Duration::from_secs(3))).await;
    }

    fn short_timeout(server: &MockServer, output: &Path) -> ImportConfig {
        ImportConfig {
            request_timeout: Duration::from_millis(300),
            ..test_config(server, output)
        }
    }

    #[tokio::test]
    async fn test_timed_out_detail_is_dropped() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");
        mount_slow_r2(&server).await;

        let report = Importer::new(short_timeout(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(report.failed_details, vec!["r2".to_string()]);

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(ids(&snapshot), vec!["r1"]);
        assert_eq!(snapshot.runs[0].gps.waypoints.len(), 3);
    }

    #[tokio::test]
    async fn test_timed_out_detail_kept_as_summary() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");
        mount_slow_r2(&server).await;

        let config = ImportConfig {
            detail_failure_policy: DetailFailurePolicy::KeepSummary,
            ..short_timeout(&server, &output)
        };
        let report = Importer::new(config).unwrap().run().await.unwrap();
        assert_eq!(report.failed_details, vec!["r2".to_string()]);

        let snapshot = Snapshot::load(&output).unwrap();
        assert_eq!(ids(&snapshot), vec!["r1", "r2"]);
        assert!(snapshot.runs[1].gps.is_empty());
        assert_eq!(snapshot.runs[0].gps.waypoints.len(), 3);
    }
}

mod fan_out {
    use super::*;

    const RUNS: [&str; 6] = ["f1", "f2", "f3", "f4", "f5", "f6"];
    const DELAY: Duration = Duration::from_millis(200);

    async fn mount_slow_page(server: &MockServer) {
        mount_page(server, "1", &page_of(&RUNS)).await;
        mount_page(server, "51", EMPTY_PAGE).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/activities/[^/]+/gps$"))
            .respond_with(json(GPS_R1).set_delay(DELAY))
            .expect(RUNS.len() as u64)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_page_details_run_concurrently() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");
        mount_slow_page(&server).await;

        let start = Instant::now();
        let report = Importer::new(test_config(&server, &output))
            .unwrap()
            .run()
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(report.fetched, RUNS.len());
        assert!(elapsed >= DELAY);
        // Six sequential fetches would take 6 * DELAY
        assert!(elapsed < DELAY * 3, "page took {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_capped_fan_out_limits_requests_in_flight() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");
        mount_slow_page(&server).await;

        let config = ImportConfig {
            max_concurrent_details: Some(2),
            ..test_config(&server, &output)
        };
        let start = Instant::now();
        let report = Importer::new(config).unwrap().run().await.unwrap();

        assert_eq!(report.fetched, RUNS.len());
        assert!(start.elapsed() >= DELAY * 3);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_page_error_leaves_snapshot_untouched() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("output.json");

        let watermark = Utc.with_ymd_and_hms(2015, 3, 5, 12, 0, 0).unwrap();
        Snapshot::new(vec![prior_run("old", 1)], watermark)
            .save(&output)
            .unwrap();
        let before = fs::read(&output).unwrap();

        Mock::given(method("GET"))
            .and(path("/activities"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let result = Importer::new(test_config(&server, &output)).unwrap().run().await;
        assert!(matches!(result, Err(PegasusError::Api { status: 503, .. })));
        assert_eq!(fs::read(&output).unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let config = ImportConfig {
            access_token: String::new(),
            ..test_config(&server, &dir.path().join("output.json"))
        };
        assert!(matches!(Importer::new(config), Err(PegasusError::Config(_))));
    }
}
