// src/bin/import_roster.rs
//
// Trusted administrative import: bulk-creates pre-approved contractors from
// a JSON roster file. Entries whose name or aliases collide with an
// existing approved contractor are skipped, not merged; the review queue is
// for end-user submissions, not imports.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;

use resolver_lib::models::core::ContractorEntity;
use resolver_lib::normalize::{alias_key, normalize};
use resolver_lib::storage::postgres::PgStore;
use resolver_lib::storage::{EntityStore, StoreError};
use resolver_lib::utils::db_connect::connect;
use resolver_lib::utils::env::load_env;

#[derive(Parser)]
#[command(name = "import_roster", about = "Bulk-import pre-approved contractors")]
struct Args {
    /// JSON file: an array of {name, city?, state?, aliases?} objects.
    file: String,

    /// Parse and report without writing anything.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Deserialize)]
struct ImportEntry {
    name: String,
    city: Option<String>,
    state: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    load_env();

    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read roster file {}", args.file))?;
    let entries: Vec<ImportEntry> =
        serde_json::from_str(&raw).context("Roster file is not a valid JSON array")?;
    info!("Loaded {} roster entries from {}", entries.len(), args.file);

    if args.dry_run {
        for entry in &entries {
            println!("{} -> {}", entry.name, normalize(&entry.name));
        }
        println!("Dry run: {} entries parsed, nothing written.", entries.len());
        return Ok(());
    }

    let pool = connect().await.context("Failed to connect to database")?;
    let store = PgStore::new(pool);

    let pb = ProgressBar::new(entries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▉▊▋▌▍▎▏  "),
    );

    let mut created = 0usize;
    let mut skipped = 0usize;

    for entry in entries {
        let name = normalize(&entry.name);
        pb.set_message(name.clone());

        if name.is_empty() {
            warn!("Skipping entry with empty name: {:?}", entry.name);
            skipped += 1;
            pb.inc(1);
            continue;
        }

        let mut aliases = vec![alias_key(&entry.name)];
        for alias in &entry.aliases {
            let key = alias_key(alias);
            if !key.is_empty() && !aliases.contains(&key) {
                aliases.push(key);
            }
        }

        let now = Utc::now();
        let entity = ContractorEntity {
            id: Uuid::new_v4(),
            name,
            city: entry.city,
            state: entry.state,
            aliases,
            approved: true,
            risk_tags: Vec::new(),
            star_rating: None,
            created_by: None,
            created_at: now,
            approved_at: Some(now),
            approved_by: None,
        };

        match store.insert_approved(&entity).await {
            Ok(()) => created += 1,
            Err(StoreError::AliasConflict { alias, holder }) => {
                warn!(
                    "Skipping \"{}\": alias \"{}\" already belongs to {}",
                    entity.name, alias, holder
                );
                skipped += 1;
            }
            Err(e) => return Err(e).context("Import aborted on storage error"),
        }
        pb.inc(1);
    }

    pb.finish_with_message(format!("{} created, {} skipped", created, skipped));
    info!("Roster import complete: {} created, {} skipped", created, skipped);
    Ok(())
}
