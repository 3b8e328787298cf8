//! Recommendation service binary entry point.
//!
//! Loads the dataset and vector file, then answers line-delimited JSON
//! requests on stdin until it closes. Logs go to stderr so stdout carries
//! responses only.

use anyhow::{Context, Result};
use book_recommender::{
    config::RecommenderConfig,
    embedding::EncoderKind,
    engine::RecommendationEngine,
    index::Metric,
    server::{RecommendationService, ServiceConfig},
};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{stdin, stdout, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Recommendation service over stdin/stdout
#[derive(Parser, Debug)]
#[command(name = "serve", version, about = "Serve book recommendations as JSON lines on stdio")]
struct ServeArgs {
    /// TOML config file; flags override its values
    #[arg(long, value_name = "FILE", env = "BOOK_RECOMMENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Book dataset CSV
    #[arg(long, value_name = "PATH")]
    dataset: Option<PathBuf>,

    /// Vector file written by build_index
    #[arg(long, value_name = "PATH")]
    vectors: Option<PathBuf>,

    /// Distance metric: cosine or l2
    #[arg(long, value_name = "METRIC")]
    metric: Option<Metric>,

    /// Query encoder; inferred from the vector file when omitted
    #[arg(long, value_enum)]
    encoder: Option<EncoderKind>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Per-request deadline in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Maximum requests processed at once
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServeArgs::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .init();

    let mut config = RecommenderConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(dataset) = args.dataset {
        config.dataset_path = dataset;
    }
    if let Some(vectors) = args.vectors {
        config.vectors_path = vectors;
    }
    if let Some(metric) = args.metric {
        config.metric = metric;
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    if let Some(max_concurrent) = args.max_concurrent {
        config.max_concurrent_requests = max_concurrent;
    }
    config.cache_dir = args
        .cache_dir
        .or(config.cache_dir)
        .or_else(|| dirs::cache_dir().map(|p| p.join("fastembed")));
    config.validate().context("Invalid settings")?;

    let engine = RecommendationEngine::from_config(&config, args.encoder)
        .context("Failed to load recommender")?;

    info!("Starting recommendation service on stdio");
    RecommendationService::new(engine, ServiceConfig::from(&config))
        .run(BufReader::new(stdin()), stdout())
        .await
        .context("Service failed")?;

    Ok(())
}
