//! Index build binary entry point.
//!
//! Loads the book dataset, embeds every description with the chosen encoder,
//! and writes the vector file that `recommend` and `serve` search.
//!
//! # Examples
//!
//! Build with the default FastEmbed model:
//! ```bash
//! build_index --dataset books_with_emotions.csv --output book_vectors.json
//! ```
//!
//! Build offline with the hashing encoder:
//! ```bash
//! build_index --encoder hash --output book_vectors.json
//! ```

use anyhow::{Context, Result};
use book_recommender::{
    catalog::Catalog,
    config::RecommenderConfig,
    embedding::{AnyEncoder, EmbeddingProvider, EncoderKind},
    index::embed_catalog,
};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Index build CLI
#[derive(Parser, Debug)]
#[command(
    name = "build_index",
    version,
    about = "Embed book descriptions and write the vector file",
    long_about = "Offline pass that embeds every description in the dataset and stores the \
                  vectors with the model that produced them.

EXAMPLES:
  Default FastEmbed model:
    build_index --dataset books_with_emotions.csv --output book_vectors.json

  Another FastEmbed model:
    build_index --embedding-model BGESmallENV15

  No model download:
    build_index --encoder hash --hash-dimension 512"
)]
struct BuildArgs {
    /// TOML config file; flags override its values
    #[arg(long, value_name = "FILE", env = "BOOK_RECOMMENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Book dataset CSV
    #[arg(long, value_name = "PATH")]
    dataset: Option<PathBuf>,

    /// Vector file to write
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Encoder used for the descriptions
    #[arg(long, value_enum, default_value = "fast-embed")]
    encoder: EncoderKind,

    /// FastEmbed model name (e.g. AllMiniLML6V2)
    #[arg(long, value_name = "MODEL")]
    embedding_model: Option<String>,

    /// Vector size for the hash encoder
    #[arg(long, value_name = "N")]
    hash_dimension: Option<usize>,

    /// Number of descriptions per embedding batch
    #[arg(long, value_name = "N", default_value = "64")]
    batch_size: usize,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn create_progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} books ({eta})")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = BuildArgs::parse();
    init_logging(&args.log_level);
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();

    let config = RecommenderConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    let dataset = args.dataset.clone().unwrap_or(config.dataset_path);
    let output = args.output.clone().unwrap_or(config.vectors_path);
    let model = args.embedding_model.clone().or(config.embedding_model);
    let cache_dir = args
        .cache_dir
        .clone()
        .or(config.cache_dir)
        .or_else(|| dirs::cache_dir().map(|p| p.join("fastembed")));

    if args.batch_size == 0 {
        anyhow::bail!("--batch-size must be at least 1");
    }

    let catalog = Catalog::load(&dataset)
        .with_context(|| format!("Failed to load dataset {}", dataset.display()))?;

    info!("Initializing {:?} encoder", args.encoder);
    let encoder = AnyEncoder::build(args.encoder, model.as_deref(), args.hash_dimension, cache_dir)
        .context("Failed to create encoder")?;
    info!(
        "Encoder ready: model={}, dimension={}",
        encoder.model_name(),
        encoder.dimension()
    );

    let progress = create_progress_bar(catalog.len())?;
    let store = embed_catalog(&encoder, &catalog, args.batch_size, |done| {
        progress.set_position(done as u64)
    })
    .await
    .context("Failed to embed descriptions")?;
    progress.finish();

    store
        .save(&output)
        .with_context(|| format!("Failed to write vector file {}", output.display()))?;

    let stats = catalog.stats();
    let elapsed = start_time.elapsed();
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Index Build Completed             ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Rows read:            {:>16} ║", stats.rows_read);
    println!("║ Books embedded:       {:>16} ║", store.entries.len());
    println!("║ Invalid rows dropped: {:>16} ║", stats.dropped_invalid);
    println!("║ Duplicates dropped:   {:>16} ║", stats.dropped_duplicate);
    println!("║ Dimension:            {:>16} ║", store.config.dimension);
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");

    info!("Vectors written to {}", output.display());
    Ok(())
}
