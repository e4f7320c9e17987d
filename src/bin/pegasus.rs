use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use pegasus::config::{DEFAULT_BASE_URL, DEFAULT_OUTPUT};
use pegasus::{
    aggregate, DetailFailurePolicy, HeatmapBounds, ImportConfig, Importer, PegasusError, Result,
    Run, Snapshot, DEFAULT_PRECISION,
};

#[derive(Parser)]
#[command(name = "pegasus")]
#[command(author, version, about = "Import runs and GPS traces into a local snapshot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Snapshot file
    #[arg(short, long, global = true, env = "PEGASUS_FILENAME", default_value = DEFAULT_OUTPUT)]
    file: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch new runs from the API and update the snapshot
    Import {
        /// Bearer access token
        #[arg(long, env = "PEGASUS_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,
        /// Application identifier sent in the appid header
        #[arg(long, env = "PEGASUS_APP_ID", default_value = "")]
        app_id: String,
        /// API root URL
        #[arg(long, env = "PEGASUS_BASE_URL", default_value = DEFAULT_BASE_URL)]
        base_url: String,
        /// Activities per page
        #[arg(long, default_value = "50")]
        page_size: u32,
        /// Cap on concurrent GPS requests per page (default: whole page)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Seconds to wait after a quota violation
        #[arg(long, default_value = "3600")]
        cooldown: u64,
        /// Keep runs whose GPS request failed, with an empty trace
        #[arg(long)]
        keep_summary: bool,
    },
    /// Print heatmap cells for a bounding box as JSON
    Heatmap {
        #[arg(long, allow_hyphen_values = true)]
        ne_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        ne_lng: f64,
        #[arg(long, allow_hyphen_values = true)]
        sw_lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        sw_lng: f64,
        /// Grid step in degrees
        #[arg(short, long, default_value_t = DEFAULT_PRECISION)]
        precision: f64,
    },
    /// Print all runs without GPS traces as JSON
    Runs,
    /// Print waypoint averages of the most recent runs
    Averages {
        /// Number of runs
        #[arg(short, default_value = "30")]
        n: usize,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import {
            access_token,
            app_id,
            base_url,
            page_size,
            concurrency,
            cooldown,
            keep_summary,
        } => {
            let config = ImportConfig {
                base_url,
                access_token,
                app_id,
                output_path: cli.file,
                page_size,
                quota_cooldown: Duration::from_secs(cooldown),
                max_concurrent_details: concurrency,
                detail_failure_policy: if keep_summary {
                    DetailFailurePolicy::KeepSummary
                } else {
                    DetailFailurePolicy::DropRecord
                },
                ..ImportConfig::default()
            };
            import(config).await
        }
        Commands::Heatmap {
            ne_lat,
            ne_lng,
            sw_lat,
            sw_lng,
            precision,
        } => heatmap(&cli.file, (ne_lat, ne_lng), (sw_lat, sw_lng), precision),
        Commands::Runs => runs(&cli.file),
        Commands::Averages { n } => averages(&cli.file, n),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn import(config: ImportConfig) -> Result<()> {
    let importer = Importer::new(config)?;
    let report = importer.run().await?;
    println!("{}", report);
    Ok(())
}

fn heatmap(file: &Path, ne: (f64, f64), sw: (f64, f64), precision: f64) -> Result<()> {
    if !(precision.is_finite() && precision > 0.0) {
        return Err(PegasusError::invalid_param(format!(
            "precision must be a positive number, got {}",
            precision
        )));
    }

    let snapshot = Snapshot::load(file)?;
    let bounds = HeatmapBounds::from_corners(ne, sw);
    let cells = aggregate(&snapshot.runs, &bounds, precision);
    println!("{}", serde_json::to_string(&cells)?);
    Ok(())
}

fn runs(file: &Path) -> Result<()> {
    let snapshot = Snapshot::load(file)?;
    let runs: Vec<Run> = snapshot.runs.iter().map(Run::without_trace).collect();
    println!("{}", serde_json::to_string(&runs)?);
    Ok(())
}

fn averages(file: &Path, n: usize) -> Result<()> {
    let snapshot = Snapshot::load(file)?;
    for run in snapshot.runs.iter().take(n) {
        let avg = run.gps.waypoint_average();
        let start = run
            .start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "{}  {:.6}, {:.6}, {:.1}m  ({:.2} km tracked)",
            start,
            avg.latitude,
            avg.longitude,
            avg.elevation,
            run.gps.track_length_meters() / 1000.0
        );
    }
    Ok(())
}
