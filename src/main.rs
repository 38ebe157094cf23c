// src/main.rs
//
// CLI over the resolution engine: search the roster, register submissions,
// and work the review queue. Runs against Postgres with either the LLM
// oracle or, with --offline, the deterministic similarity oracle.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use std::io::{self, Write};
use std::sync::Arc;
use uuid::Uuid;

use resolver_lib::engine::ResolutionEngine;
use resolver_lib::models::core::RiskTag;
use resolver_lib::models::matching::SubmissionRequest;
use resolver_lib::oracle::llm::LlmOracle;
use resolver_lib::oracle::similarity::SimilarityOracle;
use resolver_lib::oracle::MatchOracle;
use resolver_lib::storage::postgres::PgStore;
use resolver_lib::utils::db_connect::{connect, get_pool_status};
use resolver_lib::utils::env::load_env;

#[derive(Parser)]
#[command(name = "resolver", about = "Contractor entity resolution and review queue")]
struct Cli {
    /// Use the deterministic similarity oracle instead of the LLM endpoint.
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search the roster for a contractor by name.
    Search {
        query: String,
        /// Include unapproved (provisional) entities in the results.
        #[arg(long)]
        include_unapproved: bool,
    },
    /// Register a contractor submission and queue it for review.
    Submit {
        name: String,
        #[arg(long)]
        city: Option<String>,
        #[arg(long)]
        state: Option<String>,
        /// Submitting user id.
        #[arg(long)]
        submitter: Uuid,
        /// Project the submission originated from, if any.
        #[arg(long)]
        project: Option<Uuid>,
        #[arg(long)]
        star_rating: Option<i16>,
        /// Comma-separated risk tags (e.g. slow_pay,bid_shopping).
        #[arg(long, value_delimiter = ',')]
        risk_tags: Vec<String>,
    },
    /// Show the pending review queue.
    Queue {
        /// Print status counters instead of the pending list.
        #[arg(long)]
        stats: bool,
    },
    /// Approve a pending submission as a new contractor.
    Approve {
        item: Uuid,
        #[arg(long)]
        resolver: Uuid,
        /// Override the display name recorded at approval.
        #[arg(long)]
        name: Option<String>,
    },
    /// Merge a pending submission into an existing contractor.
    Merge {
        item: Uuid,
        #[arg(long)]
        target: Uuid,
        #[arg(long)]
        resolver: Uuid,
    },
    /// Delete a pending submission (spam/invalid). Irreversible.
    Delete {
        item: Uuid,
        #[arg(long)]
        resolver: Uuid,
        /// Skip the interactive confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();

    let cli = Cli::parse();

    let pool = connect().await.context("Failed to connect to database")?;
    let (total, idle) = get_pool_status(&pool);
    debug!("Connection pool ready: {} connections, {} idle", total, idle);
    let store = Arc::new(PgStore::new(pool));
    let oracle: Arc<dyn MatchOracle> = if cli.offline {
        info!("Running with the offline similarity oracle");
        Arc::new(SimilarityOracle::new())
    } else {
        Arc::new(LlmOracle::from_env())
    };
    let engine = ResolutionEngine::new(store, oracle);

    match cli.command {
        Command::Search {
            query,
            include_unapproved,
        } => {
            let result = engine
                .search(&query, include_unapproved)
                .await
                .context("Search failed")?;

            if result.matches.is_empty() {
                println!("No matches for \"{}\"", query);
                if result.likely_new {
                    println!(
                        "Looks new. Suggested name: \"{}\"",
                        result.suggested_name
                    );
                }
            } else {
                for candidate in &result.matches {
                    let mut line = format!(
                        "{}  {}  [{:?}]",
                        candidate.entity.id,
                        candidate.entity.display_name(),
                        candidate.tier
                    );
                    if let Some(confidence) = candidate.confidence {
                        line.push_str(&format!(" ({:.0}% confidence)", confidence * 100.0));
                    }
                    if !candidate.entity.approved {
                        line.push_str(" (pending)");
                    }
                    println!("{}", line);
                }
                if result.exact_match {
                    println!("Exact match found.");
                }
            }
        }

        Command::Submit {
            name,
            city,
            state,
            submitter,
            project,
            star_rating,
            risk_tags,
        } => {
            let risk_tags = parse_risk_tags(&risk_tags)?;
            let outcome = engine
                .submit(SubmissionRequest {
                    name,
                    city,
                    state,
                    submitter_id: submitter,
                    project_id: project,
                    star_rating,
                    risk_tags,
                })
                .await
                .context("Submission failed")?;

            println!("Created provisional contractor: {}", outcome.entity.id);
            println!("  Name: {}", outcome.entity.display_name());
            println!("  Queue item: {}", outcome.queue_item.id);
            println!(
                "  Recommendation: {} ({:.0}% confidence)",
                outcome.recommendation,
                outcome.confidence * 100.0
            );
            if let Some(duplicate) = &outcome.suggested_duplicate {
                println!(
                    "  Possible duplicate: {} ({})",
                    duplicate.display_name(),
                    duplicate.id
                );
            }
            for warning in &outcome.warnings {
                println!("  Warning: {}", warning);
            }
            println!("{}", outcome.message);
        }

        Command::Queue { stats } => {
            if stats {
                let stats = engine.queue_stats().await.context("Failed to load stats")?;
                println!("Pending:  {}", stats.pending);
                println!("Approved: {}", stats.approved);
                println!("Merged:   {}", stats.merged);
                println!("Deleted:  {}", stats.deleted);
            } else {
                let pending = engine
                    .list_pending()
                    .await
                    .context("Failed to load review queue")?;
                if pending.is_empty() {
                    println!("No contractors pending review.");
                }
                for item in pending {
                    println!(
                        "{}  \"{}\"  {} ({:.0}%)  submitted {}",
                        item.id,
                        item.submitted_name,
                        item.recommendation,
                        item.confidence * 100.0,
                        item.submitted_at.format("%Y-%m-%d %H:%M")
                    );
                    if let Some(name) = &item.context.suggested_match_name {
                        println!("    suggested match: {}", name);
                    }
                    if !item.reasoning.is_empty() {
                        println!("    {}", item.reasoning);
                    }
                }
            }
        }

        Command::Approve {
            item,
            resolver,
            name,
        } => {
            let resolved = engine
                .resolve_approve(item, resolver, name)
                .await
                .context("Approval failed")?;
            println!(
                "Approved queue item {} ({})",
                resolved.id,
                resolved.resolved_action.as_deref().unwrap_or("approved")
            );
        }

        Command::Merge {
            item,
            target,
            resolver,
        } => {
            let resolved = engine
                .resolve_merge(item, target, resolver)
                .await
                .context("Merge failed, nothing changed; retry after checking the target")?;
            println!(
                "Merged queue item {} ({})",
                resolved.id,
                resolved.resolved_action.as_deref().unwrap_or("merged")
            );
        }

        Command::Delete {
            item,
            resolver,
            yes,
        } => {
            if !yes && !confirm_delete(item)? {
                println!("Aborted.");
                return Ok(());
            }
            let resolved = engine
                .resolve_delete(item, resolver)
                .await
                .context("Delete failed")?;
            println!("Deleted queue item {}", resolved.id);
        }
    }

    Ok(())
}

fn parse_risk_tags(raw: &[String]) -> Result<Vec<RiskTag>> {
    raw.iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            RiskTag::parse(s.trim())
                .ok_or_else(|| anyhow::anyhow!("unknown risk tag: {}", s))
        })
        .collect()
}

fn confirm_delete(item: Uuid) -> Result<bool> {
    print!(
        "Delete submission {}? This cannot be undone. (y/N): ",
        item
    );
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim(), "y" | "Y" | "yes"))
}
