//! slicelink engine binary
//!
//! Binds the scanner-facing and results endpoints and runs until killed.
//! Settings come from an optional TOML file with command-line overrides;
//! logging is controlled through `RUST_LOG`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use slicelink::analysis::{RoiAverage, RoiMask, RoiMedian, VolumeAnalysis};
use slicelink::config::Config;
use slicelink::engine::ScanEngine;
use slicelink::error::{Result, SliceLinkError};

#[derive(Parser, Debug)]
#[command(name = "slicelink", about = "Real-time MRI slice ingestion and results serving")]
struct Args {
    /// Path to a TOML settings file
    #[arg(long, env = "SLICELINK_CONFIG")]
    config: Option<PathBuf>,

    /// Scanner-facing bind address (overrides the settings file)
    #[arg(long)]
    scanner_addr: Option<String>,

    /// Results-endpoint bind address (overrides the settings file)
    #[arg(long)]
    results_addr: Option<String>,

    /// Built-in analysis: "mean" or "median"
    #[arg(long, default_value = "mean")]
    analysis: String,

    /// JSON mask file selecting the region of interest; whole volume if
    /// omitted (requires pinned dims in the settings file)
    #[arg(long)]
    mask: Option<PathBuf>,

    /// Weight voxels by their mask value
    #[arg(long)]
    weighted: bool,
}

fn load_mask(args: &Args, config: &Config) -> Result<RoiMask> {
    if let Some(path) = &args.mask {
        let text = std::fs::read_to_string(path).map_err(|err| {
            SliceLinkError::Config(format!("cannot read {}: {}", path.display(), err))
        })?;
        return serde_json::from_str(&text)
            .map_err(|err| SliceLinkError::Config(format!("{}: {}", path.display(), err)));
    }
    let dims = config.expected_dims.ok_or_else(|| {
        SliceLinkError::Config(
            "whole-volume analysis needs expected_dims in the settings file, or pass --mask"
                .to_string(),
        )
    })?;
    Ok(RoiMask::full(dims))
}

fn build_analysis(args: &Args, config: &Config) -> Result<Arc<dyn VolumeAnalysis>> {
    let mask = load_mask(args, config)?;
    match args.analysis.as_str() {
        "mean" => Ok(Arc::new(RoiAverage::new(mask, args.weighted))),
        "median" => Ok(Arc::new(RoiMedian::new(mask, args.weighted))),
        other => Err(SliceLinkError::Config(format!(
            "unknown analysis {:?}; expected \"mean\" or \"median\"",
            other
        ))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(addr) = &args.scanner_addr {
        config.scanner_addr = addr.clone();
    }
    if let Some(addr) = &args.results_addr {
        config.results_addr = addr.clone();
    }

    let analysis = build_analysis(&args, &config)?;

    info!(
        scanner_addr = %config.scanner_addr,
        results_addr = %config.results_addr,
        analysis = %args.analysis,
        weighted = args.weighted,
        "starting engine"
    );

    let engine = ScanEngine::new(config, analysis);
    engine.bind().await?.run().await
}
