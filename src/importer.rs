//! Import orchestration.
//!
//! One import is a linear pass:
//!
//! ```text
//! load snapshot -> plan window -> (page -> details -> barrier)* -> merge -> sort -> persist
//! ```
//!
//! Pages are strictly sequential. Page N+1 is not requested until every
//! detail request of page N has finished or failed.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::Utc;
use log::info;

use crate::config::ImportConfig;
use crate::detail::DetailFetcher;
use crate::error::Result;
use crate::http::RateLimitedClient;
use crate::pager::ActivityPager;
use crate::snapshot::{merge_runs, Snapshot};
use crate::sync_plan::SyncPlan;
use crate::Run;

/// Summary of a finished import
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub plan: SyncPlan,
    /// Non-empty listing pages walked
    pub pages: u32,
    /// Runs fetched by this import (after detail failures)
    pub fetched: usize,
    /// IDs whose GPS detail request failed
    pub failed_details: Vec<String>,
    /// Runs in the persisted snapshot
    pub total_runs: usize,
    /// Quota violations waited out
    pub quota_hits: u32,
    pub output_path: PathBuf,
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} pages, {} runs fetched, {} detail failures, {} quota waits; {} runs written to {}",
            self.plan,
            self.pages,
            self.fetched,
            self.failed_details.len(),
            self.quota_hits,
            self.total_runs,
            self.output_path.display()
        )
    }
}

/// Runs imports against the remote API
pub struct Importer {
    config: ImportConfig,
    client: RateLimitedClient,
}

impl Importer {
    /// Validate `config` and build the HTTP client.
    pub fn new(config: ImportConfig) -> Result<Self> {
        config.validate()?;
        let client = RateLimitedClient::new(&config)?;
        Ok(Self { config, client })
    }

    /// Run one import and persist the merged snapshot.
    ///
    /// A failed listing request aborts before anything is written, leaving
    /// the previous snapshot in place.
    pub async fn run(&self) -> Result<ImportReport> {
        let start = Instant::now();

        let prior = Snapshot::load_or_default(&self.config.output_path);
        let plan = SyncPlan::plan(prior.watermark(), Utc::now());
        info!("[Importer] Starting {}", plan);

        let (fresh, failed_details, pages) = self.fetch_all(&plan).await?;
        let fetched = fresh.len();

        let merged = merge_runs(prior.runs, fresh);
        let snapshot = Snapshot::new(merged, Utc::now());
        snapshot.save(&self.config.output_path)?;

        let report = ImportReport {
            plan,
            pages,
            fetched,
            failed_details,
            total_runs: snapshot.runs.len(),
            quota_hits: self.client.quota_hits(),
            output_path: self.config.output_path.clone(),
        };
        info!(
            "[Importer] Done in {:.2}s: {}",
            start.elapsed().as_secs_f64(),
            report
        );
        Ok(report)
    }

    async fn fetch_all(&self, plan: &SyncPlan) -> Result<(Vec<Run>, Vec<String>, u32)> {
        let mut pager = ActivityPager::new(&self.client, &self.config, plan);
        let fetcher = DetailFetcher::new(&self.client, &self.config);

        let mut runs = Vec::new();
        let mut failed = Vec::new();

        while let Some(batch) = pager.next_batch().await? {
            // Barrier: attach resolves only after the whole page settles
            let details = fetcher.attach(batch).await;
            runs.extend(details.runs);
            failed.extend(details.failed);
        }

        info!(
            "[Importer] {} runs fetched over {} pages ({} detail failures)",
            runs.len(),
            pager.pages_fetched(),
            failed.len()
        );
        Ok((runs, failed, pager.pages_fetched()))
    }
}
