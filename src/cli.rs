//! Command-line interface
//!
//! Thin driver over the engine: `index`, `search`, `drop`, `status`.
//! All retrieval logic lives in the library; this module only parses
//! arguments and formats output.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::config::Config;
use crate::pipeline::{RerankerKind, SearchRequest};
use crate::runtime;

#[derive(Parser)]
#[command(
    name = "quarry",
    version,
    about = "Retrieval-augmented question answering over code repositories"
)]
pub struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Index a code tree into the vector store
    Index {
        /// Directory to ingest (defaults to the project root)
        path: Option<PathBuf>,
        /// Repository namespace for the indexed chunks
        #[arg(long)]
        repo: Option<String>,
    },
    /// Search the index
    Search {
        query: String,
        /// Restrict to one repository namespace
        #[arg(long)]
        repo: Option<String>,
        /// Vector search top-k
        #[arg(short = 'n', long)]
        top_k: Option<usize>,
        /// Reranker: bge, llm, or none
        #[arg(long, value_enum)]
        reranker: Option<RerankerKind>,
        /// Result size after reranking
        #[arg(long)]
        rerank_top_k: Option<usize>,
        /// Disable dependency-graph expansion
        #[arg(long)]
        no_expand: bool,
        /// Graph hop budget
        #[arg(long)]
        max_hops: Option<usize>,
        /// Budget of chunks added by expansion
        #[arg(long)]
        max_expanded: Option<usize>,
        /// Query timeout in seconds
        #[arg(long, default_value_t = 60)]
        timeout: u64,
        /// Print the per-stage trace
        #[arg(long)]
        trace: bool,
    },
    /// Drop a repository namespace from the index
    Drop {
        repo: String,
    },
    /// Show index and provider status
    Status,
}

impl clap::ValueEnum for RerankerKind {
    fn value_variants<'a>() -> &'a [Self] {
        &[RerankerKind::Bge, RerankerKind::Llm, RerankerKind::None]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            RerankerKind::Bge => clap::builder::PossibleValue::new("bge"),
            RerankerKind::Llm => clap::builder::PossibleValue::new("llm"),
            RerankerKind::None => clap::builder::PossibleValue::new("none"),
        })
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let config = Config::load(&root);

    match cli.command {
        Command::Index { path, repo } => {
            let engine = runtime::engine(&root, config).await?;
            let target = path.unwrap_or_else(|| root.clone());
            let report = engine.ingest(&target, repo.as_deref()).await?;
            engine.close().await?;
            println!(
                "{} {} files, {} chunks ({} parse failures, {} skipped)",
                "Indexed".green().bold(),
                report.files_indexed,
                report.chunks_indexed,
                report.parse_failures,
                report.files_skipped
            );
        }

        Command::Search {
            query,
            repo,
            top_k,
            reranker,
            rerank_top_k,
            no_expand,
            max_hops,
            max_expanded,
            timeout,
            trace,
        } => {
            let mut options = config.query_options();
            if let Some(v) = top_k {
                options.top_k = v;
            }
            if let Some(v) = reranker {
                options.reranker = v;
            }
            if let Some(v) = rerank_top_k {
                options.rerank_top_k = v;
            }
            if no_expand {
                options.expand_graph = false;
            }
            if let Some(v) = max_hops {
                options.max_hops = v;
            }
            if let Some(v) = max_expanded {
                options.max_expanded_chunks = v;
            }

            let engine = runtime::engine(&root, config).await?;
            let request = SearchRequest {
                query,
                repository: repo,
                options,
            };
            let response = match engine
                .search_with_timeout(&request, Duration::from_secs(timeout))
                .await
            {
                Ok(response) => response,
                Err(failure) => {
                    for record in &failure.trace.stages {
                        eprintln!(
                            "  {} {} ({} chunks, {}ms)",
                            "stage".dimmed(),
                            record.stage,
                            record.count,
                            record.duration_ms
                        );
                    }
                    anyhow::bail!("search failed: {failure}");
                }
            };

            if response.chunks.is_empty() {
                println!("{}", "No results".yellow());
            }
            for (rank, hit) in response.chunks.iter().enumerate() {
                let score = hit
                    .score
                    .map(|s| format!("{s:.3}"))
                    .unwrap_or_else(|| "graph".to_string());
                let name = hit.chunk.name.as_deref().unwrap_or("<anonymous>");
                println!(
                    "{:>2}. {} {} {} [{}]",
                    rank + 1,
                    hit.chunk.id.cyan(),
                    name.bold(),
                    format!("({})", hit.chunk.node_type).dimmed(),
                    score
                );
            }
            if trace {
                for record in &response.trace.stages {
                    println!(
                        "  {} {} ({} chunks, {}ms)",
                        "stage".dimmed(),
                        record.stage,
                        record.count,
                        record.duration_ms
                    );
                }
            }
        }

        Command::Drop { repo } => {
            let engine = runtime::engine(&root, config).await?;
            let removed = engine.drop_repository(&repo).await?;
            engine.close().await?;
            println!("{} {} chunks from '{}'", "Dropped".red().bold(), removed, repo);
        }

        Command::Status => {
            let engine = runtime::engine(&root, config).await?;
            let status = engine.status().await;
            let ready = if status.ready {
                "ready".green().to_string()
            } else {
                "unavailable".red().to_string()
            };
            println!("index:     {} ({} chunks)", ready, status.total_chunks);
            println!("store:     {}", status.store_type);
            println!("embedding: {}", status.embedding_model);
            println!("llm:       {} ({})", status.llm.provider, status.llm.model);
        }
    }
    Ok(())
}
