//! Two-view meal volume and nutrition estimation.
//!
//! A [`CaptureSession`] walks the user through a top-down and a side capture, has each
//! segmented, reconstructs a partial observation per view, fuses them into a volume
//! and projects that volume to mass and macros.

pub mod collaborators;
pub mod config;
pub mod error;
pub mod fusion;
pub mod models;
pub mod nutrition;
pub mod reconstruction;
pub mod session;
mod utils;

use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};

use collaborators::{BundleDirs, FileCaptureSource, MaskFileSegmenter};
use config::ConfigStore;
use models::Viewpoint;
use nutrition::NutritionTable;

pub use error::{PipelineError, PipelineResult};
pub use session::{CaptureSession, Collaborators, RequestOutcome, SessionStage};

const ENABLE_LOGS: bool = true;

const USAGE: &str = "usage: mealscan <top-bundle-dir> <side-bundle-dir> [--config config.json] [--nutrition table.json] [--class label]";

struct CliArgs {
    top: PathBuf,
    side: PathBuf,
    config: Option<PathBuf>,
    nutrition: Option<PathBuf>,
    class: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut args = args.into_iter();
    let mut positional = Vec::new();
    let mut config = std::env::var_os("MEALSCAN_CONFIG").map(PathBuf::from);
    let mut nutrition = None;
    let mut class = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                config = Some(PathBuf::from(args.next().context("Missing --config argument")?));
            }
            "--nutrition" => {
                nutrition = Some(PathBuf::from(
                    args.next().context("Missing --nutrition argument")?,
                ));
            }
            "--class" => {
                class = Some(args.next().context("Missing --class argument")?);
            }
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let [top, side]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| anyhow!("expected two bundle directories\n{USAGE}"))?;

    Ok(CliArgs {
        top,
        side,
        config,
        nutrition,
        class,
    })
}

/// Run one two-view session over capture bundles on disk and print the estimate as
/// JSON.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = parse_args(std::env::args().skip(1))?;

    let config = match &args.config {
        Some(path) => ConfigStore::new(path.clone())?.config(),
        None => config::PipelineConfig::default(),
    };
    let table = match &args.nutrition {
        Some(path) => NutritionTable::load(path)?,
        None => NutritionTable::builtin(),
    };

    let dirs = BundleDirs {
        top: args.top.clone(),
        side: args.side.clone(),
    };
    let session = CaptureSession::new(
        Collaborators {
            capture: Arc::new(FileCaptureSource::new(dirs.clone())),
            segmenter: Arc::new(MaskFileSegmenter::new(dirs)),
            nutrition: Arc::new(table),
        },
        &config,
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(drive(session, args.class))
}

async fn drive(session: CaptureSession, class: Option<String>) -> Result<()> {
    log_info!("Starting two-view session {}", session.snapshot().await.attempt_id);
    for viewpoint in Viewpoint::ALL {
        session.capture(viewpoint).await?;
        if let Some(report) = session.segment(viewpoint).await?.applied() {
            if let Some(shortfall) = report.retake_advised {
                log_warn!("{shortfall}; continuing with single-view fallback");
            }
        }
    }
    if class.is_some() {
        session.set_class_override(class).await;
    }

    match session.finalize().await {
        Ok(RequestOutcome::Applied(estimate)) => {
            println!("{}", serde_json::to_string_pretty(&estimate)?);
            Ok(())
        }
        Ok(RequestOutcome::Superseded) => bail!("session was reset before finalizing"),
        Err(PipelineError::UnknownClass { class }) => {
            let volume = session.volume_estimate().await;
            println!("{}", serde_json::to_string_pretty(&volume)?);
            log_error!(
                "no nutrition entry for {}; enter mass manually or pass --class",
                class.as_deref().unwrap_or("unlabelled food")
            );
            Err(PipelineError::UnknownClass { class }.into())
        }
        Err(err) => Err(err.into()),
    }
}
