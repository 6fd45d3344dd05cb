//! seshat CLI: confidence-weighted knowledge graph engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use seshat::engine::{Engine, EngineConfig};
use seshat::knowledge::PatternFilter;
use seshat::rank::HitKind;
use seshat::research::ResearchResult;

#[derive(Parser)]
#[command(name = "seshat", version, about = "Confidence-weighted knowledge graph")]
struct Cli {
    /// Data directory for persistent storage.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Parameter catalog TOML (built-in defaults when omitted).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new seshat data directory.
    Init,

    /// Ingest research results from a JSON file.
    Ingest {
        /// Path to a JSON file with one result or an array of results.
        #[arg(long)]
        file: PathBuf,

        /// Domain tag applied to results that carry none.
        #[arg(long)]
        domain: Option<String>,
    },

    /// Search the graph for entities relevant to a query.
    Search {
        /// Free-text query.
        query: String,

        /// Domain whose relevance threshold override applies.
        #[arg(long)]
        domain: Option<String>,

        /// Number of results to return.
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Record a user judgment about a query outcome.
    Feedback {
        /// Identifier of the query being judged.
        query_id: String,

        /// Whether the result was accepted.
        #[arg(long)]
        accepted: bool,

        /// How relevant the result was, in [0.0, 1.0].
        #[arg(long)]
        relevance: f64,
    },

    /// Show current parameter values.
    Params {
        /// Also print the optimization history.
        #[arg(long)]
        history: bool,
    },

    /// List stored patterns.
    Patterns {
        /// Only patterns observed in this domain.
        #[arg(long)]
        domain: Option<String>,

        /// Only patterns at or above this confidence.
        #[arg(long)]
        min_confidence: Option<f64>,
    },

    /// Show engine info and statistics.
    Info,
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = EngineConfig {
        data_dir: cli.data_dir.clone(),
        catalog_path: cli.catalog.clone(),
        ..Default::default()
    };

    match cli.command {
        Commands::Init => {
            let data_dir = cli.data_dir.unwrap_or_else(|| PathBuf::from(".seshat"));
            let config = EngineConfig {
                data_dir: Some(data_dir.clone()),
                catalog_path: cli.catalog,
                ..Default::default()
            };
            let engine = Engine::new(config).into_diagnostic()?;
            println!("Initialized seshat at {}", data_dir.display());
            println!("{}", engine.info());
        }

        Commands::Ingest { file, domain } => {
            let engine = Engine::new(config).into_diagnostic()?;
            let content = std::fs::read_to_string(&file).into_diagnostic()?;

            // Accept either a single result object or an array of them.
            let mut results: Vec<ResearchResult> = match serde_json::from_str(&content) {
                Ok(results) => results,
                Err(_) => vec![serde_json::from_str(&content).into_diagnostic()?],
            };

            let mut ingested = 0;
            for result in &mut results {
                if result.domain.is_none() {
                    result.domain = domain.clone();
                }
                let report = engine.record_result(result).into_diagnostic()?;
                ingested += 1;
                if let Some(snapshot) = &report.optimization {
                    println!(
                        "Optimization run {} applied {} adjustment(s)",
                        snapshot.run,
                        snapshot.adjustments.len()
                    );
                }
            }
            println!("Ingested {ingested} result(s) from {}", file.display());
            println!("{}", engine.info());
        }

        Commands::Search { query, domain, limit } => {
            let engine = Engine::new(config).into_diagnostic()?;
            let hits = engine
                .search(&query, domain.as_deref(), Some(limit))
                .into_diagnostic()?;

            if hits.is_empty() {
                println!("No results above the relevance threshold.");
            } else {
                println!("Results (top {limit}):");
                for (i, hit) in hits.iter().enumerate() {
                    let kind = match hit.kind {
                        HitKind::Concept(_) => "concept",
                        HitKind::Pattern(_) => "pattern",
                    };
                    println!(
                        "  {}. \"{}\" [{}] score={:.4} similarity={:.4} confidence={:.4}",
                        i + 1,
                        hit.name,
                        kind,
                        hit.score,
                        hit.similarity,
                        hit.confidence
                    );
                }
            }
        }

        Commands::Feedback {
            query_id,
            accepted,
            relevance,
        } => {
            let engine = Engine::new(config).into_diagnostic()?;
            let snapshot = engine
                .record_feedback(&query_id, accepted, relevance)
                .into_diagnostic()?;
            match snapshot {
                Some(snapshot) => {
                    println!(
                        "Feedback recorded; optimization run {} adjusted {} parameter(s)",
                        snapshot.run,
                        snapshot.adjustments.len()
                    );
                    for adj in &snapshot.adjustments {
                        println!(
                            "  {} {:.4} -> {:.4}",
                            adj.name, adj.previous, adj.applied
                        );
                    }
                }
                None => println!("Feedback recorded."),
            }
        }

        Commands::Params { history } => {
            let engine = Engine::new(config).into_diagnostic()?;
            let snapshot = engine.snapshot_parameters();

            println!("Parameters:");
            for (name, value) in &snapshot.values {
                println!("  {name} = {value:.4}");
            }
            for (domain, overrides) in &snapshot.domain_overrides {
                println!("  [{domain}]");
                for (name, value) in overrides {
                    println!("    {name} = {value:.4}");
                }
            }

            if history {
                let runs = engine.parameter_history();
                if runs.is_empty() {
                    println!("\nNo optimization runs yet.");
                } else {
                    println!("\nHistory ({} run(s)):", runs.len());
                    for run in &runs {
                        println!(
                            "  run {} ({} adjustment(s), {} feedback)",
                            run.run,
                            run.adjustments.len(),
                            run.metrics.feedback_count
                        );
                        for adj in &run.adjustments {
                            let scope = adj
                                .domain
                                .as_deref()
                                .map(|d| format!(" [{d}]"))
                                .unwrap_or_default();
                            println!(
                                "    {}{} {:.4} -> {:.4}",
                                adj.name, scope, adj.previous, adj.applied
                            );
                        }
                    }
                }
            }
        }

        Commands::Patterns {
            domain,
            min_confidence,
        } => {
            let engine = Engine::new(config).into_diagnostic()?;
            let patterns = engine.graph().query_patterns(&PatternFilter {
                domain,
                min_confidence,
                concept: None,
            });

            if patterns.is_empty() {
                println!("No matching patterns.");
            } else {
                println!("Patterns ({}):", patterns.len());
                for pattern in &patterns {
                    println!(
                        "  {} \"{}\" confidence={:.3} support={}",
                        pattern.id, pattern.name, pattern.confidence, pattern.support_count
                    );
                }
            }
        }

        Commands::Info => {
            let engine = Engine::new(config).into_diagnostic()?;
            println!("{}", engine.info());
        }
    }

    Ok(())
}
