//! Recommendation CLI entry point.
//!
//! Answers free-text book requests against a dataset and a vector file built
//! by `build_index`. Supports single-query and interactive REPL modes, with
//! table or JSON output.
//!
//! # Examples
//!
//! Single query:
//! ```bash
//! recommend --dataset books_with_emotions.csv --vectors book_vectors.json \
//!     --query "a story about forgiveness"
//! ```
//!
//! Filtered by category and tone:
//! ```bash
//! recommend --query "a dark story about revenge" --category Fiction --tone Suspenseful
//! ```
//!
//! Interactive mode:
//! ```bash
//! recommend --interactive
//! ```

use anyhow::{Context, Result};
use book_recommender::{
    config::RecommenderConfig,
    embedding::{AnyEncoder, EncoderKind},
    engine::{RecommendQuery, RecommendationEngine},
    index::Metric,
    models::{parse_category_filter, parse_tone_filter, Emotion, Recommendation, RelevanceLevel, TONE_CHOICES},
    server::RecommendationDto,
};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for recommendations
#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table with colored relevance levels
    Table,
    /// Machine-readable JSON format
    Json,
}

/// Recommendation CLI
#[derive(Parser, Debug)]
#[command(
    name = "recommend",
    version,
    about = "Recommend books from a natural-language description",
    long_about = "Find books matching a free-text description, optionally restricted to a \
                  category and re-ranked by emotional tone.

EXAMPLES:
  Single query:
    recommend --query \"a story about forgiveness\"

  Category and tone:
    recommend --query \"a dark story about revenge\" --category Fiction --tone Suspenseful

  JSON output:
    recommend --query \"space exploration\" --format json --top-k 5

  Interactive mode:
    recommend --interactive"
)]
struct Args {
    /// TOML config file; flags override its values
    #[arg(long, value_name = "FILE", env = "BOOK_RECOMMENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Book dataset CSV
    #[arg(long, value_name = "PATH")]
    dataset: Option<PathBuf>,

    /// Vector file written by build_index
    #[arg(long, value_name = "PATH")]
    vectors: Option<PathBuf>,

    /// Book description to search for (omitted in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Category to restrict results to ("All" for no filter)
    #[arg(long, value_name = "LABEL")]
    category: Option<String>,

    /// Tone to rank by: Happy, Surprising, Angry, Suspenseful, Sad, or All
    #[arg(long, value_name = "TONE")]
    tone: Option<String>,

    /// Number of recommendations to return
    #[arg(long, value_name = "N")]
    top_k: Option<usize>,

    /// Size of the similarity candidate set
    #[arg(long, value_name = "N")]
    candidates: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Distance metric: cosine or l2
    #[arg(long, value_name = "METRIC")]
    metric: Option<Metric>,

    /// Query encoder; inferred from the vector file when omitted
    #[arg(long, value_enum)]
    encoder: Option<EncoderKind>,

    /// FastEmbed model cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

/// Current filters and sizes, adjustable from the REPL
#[derive(Debug, Clone)]
struct Session {
    category: Option<String>,
    tone: Option<Emotion>,
    top_k: usize,
    candidates: usize,
    format: OutputFormat,
}

impl Session {
    fn query(&self, text: &str) -> RecommendQuery {
        let mut query = RecommendQuery::new(text)
            .with_tone(self.tone)
            .with_final_k(self.top_k)
            .with_candidate_k(self.candidates.max(self.top_k));
        if let Some(category) = &self.category {
            query = query.with_category(category);
        }
        query
    }
}

fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Merge the config file with command-line overrides
fn resolve_config(args: &Args) -> Result<RecommenderConfig> {
    let mut config = RecommenderConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;

    if let Some(dataset) = &args.dataset {
        config.dataset_path = dataset.clone();
    }
    if let Some(vectors) = &args.vectors {
        config.vectors_path = vectors.clone();
    }
    if let Some(top_k) = args.top_k {
        config.final_k = top_k;
    }
    if let Some(candidates) = args.candidates {
        config.candidate_k = candidates;
    }
    if let Some(metric) = args.metric {
        config.metric = metric;
    }
    config.cache_dir = args
        .cache_dir
        .clone()
        .or(config.cache_dir)
        .or_else(|| dirs::cache_dir().map(|p| p.join("fastembed")));

    Ok(config)
}

async fn execute_recommend(
    engine: &RecommendationEngine<AnyEncoder>,
    session: &Session,
    text: &str,
) -> Result<Vec<Recommendation>> {
    debug!("Recommending for query: {}", text);
    engine
        .recommend(&session.query(text))
        .await
        .with_context(|| format!("Failed to recommend for query: '{}'", text))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

fn format_results_table(results: &[Recommendation], tone: Option<Emotion>) -> String {
    if results.is_empty() {
        return "No matching books found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let mut header = vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Authors").add_attribute(Attribute::Bold),
        Cell::new("Category").add_attribute(Attribute::Bold),
        Cell::new("Relevance").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ];
    if let Some(emotion) = tone {
        header.push(Cell::new(emotion.key()).add_attribute(Attribute::Bold));
    }
    table.set_header(header);

    for (idx, rec) in results.iter().enumerate() {
        let color = match rec.relevance {
            RelevanceLevel::Identical => Color::Green,
            RelevanceLevel::HighlySimilar => Color::Cyan,
            RelevanceLevel::Similar => Color::Yellow,
            RelevanceLevel::Relevant => Color::White,
        };

        let mut row = vec![
            Cell::new(idx + 1),
            Cell::new(truncate(&rec.book.title, 60)),
            Cell::new(truncate(&rec.book.author_display(), 40)),
            Cell::new(&rec.book.category),
            Cell::new(rec.relevance.label()).fg(color),
            Cell::new(format!("{:.4}", rec.score)),
        ];
        if let Some(emotion) = tone {
            row.push(Cell::new(format!("{:.3}", rec.book.emotion_scores.get(emotion))));
        }
        table.add_row(row);
    }

    table.to_string()
}

fn format_results_json(results: &[Recommendation]) -> Result<String> {
    let dtos: Vec<RecommendationDto> = results.iter().cloned().map(RecommendationDto::from).collect();
    serde_json::to_string_pretty(&dtos).context("Failed to serialize results to JSON")
}

fn print_results(results: &[Recommendation], session: &Session, elapsed: std::time::Duration) -> Result<()> {
    match session.format {
        OutputFormat::Table => {
            println!("{}", format_results_table(results, session.tone));
            println!(
                "\nFound {} books in {:.2}s",
                results.len(),
                elapsed.as_secs_f64()
            );
        }
        OutputFormat::Json => println!("{}", format_results_json(results)?),
    }
    Ok(())
}

fn display_result_detail(rec: &Recommendation, rank: usize) {
    let book = &rec.book;
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Title: {}", book.title);
    println!("Authors: {}", book.author_display());
    println!("ISBN-13: {}", book.isbn13);
    println!("Category: {}", book.category);
    if let Some(year) = book.published_year {
        println!("Published: {}", year);
    }
    if let Some(rating) = book.average_rating {
        println!("Average rating: {:.2}", rating);
    }
    if let Some(pages) = book.num_pages {
        println!("Pages: {}", pages);
    }
    println!("Relevance: {} ({:.4})", rec.relevance.label(), rec.score);
    println!("Cover: {}", book.large_thumbnail());

    let tones: Vec<String> = Emotion::ALL
        .iter()
        .map(|e| format!("{}={:.2}", e.key(), book.emotion_scores.get(*e)))
        .collect();
    println!("Emotions: {}", tones.join(" "));
    println!("\nDescription:\n{}", book.description);
    println!("{}", "═".repeat(80));
}

fn print_help() {
    println!("Commands:");
    println!("  <description>      - Recommend books");
    println!("  /category LABEL    - Restrict to a category (All to clear)");
    println!("  /categories        - List available categories");
    println!("  /tone TONE         - Rank by tone: {}", TONE_CHOICES.join(", "));
    println!("  /top N             - Set number of results to N");
    println!("  /format table|json - Set output format");
    println!("  /detail N          - Show full details for result rank N");
    println!("  /help              - Show this help");
    println!("  Ctrl+D or Ctrl+C   - Exit");
}

async fn run_interactive(engine: RecommendationEngine<AnyEncoder>, mut session: Session) -> Result<()> {
    println!("Interactive Book Recommender");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut last_results: Vec<Recommendation> = Vec::new();

    loop {
        let readline = rl.readline("Recommend> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line).ok();

                if !line.starts_with('/') {
                    let start = Instant::now();
                    match execute_recommend(&engine, &session, line).await {
                        Ok(results) => {
                            if let Err(e) = print_results(&results, &session, start.elapsed()) {
                                eprintln!("Error formatting results: {}", e);
                            }
                            last_results = results;
                        }
                        Err(e) => eprintln!("Recommendation failed: {:#}", e),
                    }
                    continue;
                }

                let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
                let rest = rest.trim();
                match command {
                    "/help" => print_help(),
                    "/categories" => println!("{}", engine.catalog().category_choices().join(", ")),
                    "/category" => {
                        if rest.is_empty() {
                            eprintln!("Usage: /category LABEL");
                            continue;
                        }
                        session.category = parse_category_filter(rest);
                        match &session.category {
                            Some(category) => println!("Set category filter: {}", category),
                            None => println!("Cleared category filter"),
                        }
                    }
                    "/tone" => match parse_tone_filter(rest) {
                        Ok(tone) => {
                            session.tone = tone;
                            match tone {
                                Some(emotion) => println!("Ranking by {}", emotion),
                                None => println!("Cleared tone"),
                            }
                        }
                        Err(e) => eprintln!("{}", e),
                    },
                    "/top" => match rest.parse::<usize>() {
                        Ok(n) if n > 0 => {
                            session.top_k = n;
                            println!("Set top-k to {}", n);
                        }
                        _ => eprintln!("Invalid number: must be a positive integer"),
                    },
                    "/format" => match rest {
                        "table" => {
                            session.format = OutputFormat::Table;
                            println!("Set output format to table");
                        }
                        "json" => {
                            session.format = OutputFormat::Json;
                            println!("Set output format to JSON");
                        }
                        _ => eprintln!("Usage: /format [table|json]"),
                    },
                    "/detail" => match rest.parse::<usize>() {
                        Ok(rank) if rank > 0 && rank <= last_results.len() => {
                            display_result_detail(&last_results[rank - 1], rank);
                        }
                        Ok(rank) if rank > last_results.len() => {
                            eprintln!(
                                "Rank {} out of range (last search had {} results)",
                                rank,
                                last_results.len()
                            );
                        }
                        _ => eprintln!("Invalid rank: must be a positive integer"),
                    },
                    _ => eprintln!("Unknown command: {}. Type /help for available commands.", command),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    let query = match (&args.query, args.interactive) {
        (_, true) => None,
        (Some(query), false) => Some(query.clone()),
        (None, false) => anyhow::bail!(
            "Either --query or --interactive must be specified.\n\
             Use --help for usage information."
        ),
    };

    let config = resolve_config(&args)?;
    config.validate().context("Invalid settings")?;

    if !config.vectors_path.exists() {
        anyhow::bail!(
            "Vector file not found: {}\n\
             Please run the build_index binary first.",
            config.vectors_path.display()
        );
    }

    let tone = match &args.tone {
        Some(label) => parse_tone_filter(label).map_err(anyhow::Error::msg)?,
        None => None,
    };

    let engine = RecommendationEngine::from_config(&config, args.encoder)
        .context("Failed to load recommender")?;
    info!("Catalog holds {} books", engine.catalog().len());

    let session = Session {
        category: args.category.as_deref().and_then(parse_category_filter),
        tone,
        top_k: config.final_k,
        candidates: config.candidate_k,
        format: args.format,
    };

    match query {
        None => run_interactive(engine, session).await,
        Some(text) => {
            let start = Instant::now();
            let results = execute_recommend(&engine, &session, &text).await?;
            print_results(&results, &session, start.elapsed())
        }
    }
}
