//! Operator CLI for Exocortex

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use exocortex::maintenance::{self, health::health_checks, MaintenanceFlags};
use exocortex::types::{BrowseOptions, CreateMemoryInput, SearchOptions};
use exocortex::{backup, MemoryStore};

#[derive(Parser, Debug)]
#[command(name = "exocortex", version, about = "Personal long-term memory store")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "EXOCORTEX_DB", default_value = "exocortex.db")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a new memory
    Store {
        content: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long)]
        importance: Option<f32>,
    },
    /// Hybrid search
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// List recent memories
    Browse {
        #[arg(long, default_value_t = 20)]
        limit: i64,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Show one memory
    Get { id: String },
    /// Archive a memory (or hard-delete with --hard)
    Forget {
        id: String,
        #[arg(long)]
        hard: bool,
    },
    /// Run maintenance passes
    Maintain {
        #[arg(long)]
        reembed: bool,
        #[arg(long)]
        backfill_entities: bool,
        #[arg(long)]
        recalibrate: bool,
        #[arg(long)]
        densify_graph: bool,
        #[arg(long)]
        co_retrieval_links: bool,
        #[arg(long)]
        tune_weights: bool,
    },
    /// Consolidate similar memories (dry-run unless --apply)
    Consolidate {
        #[arg(long)]
        apply: bool,
    },
    /// Export a JSON backup (encrypted when --password is set)
    Export {
        path: std::path::PathBuf,
        #[arg(long, env = "EXOCORTEX_BACKUP_PASSWORD")]
        password: Option<String>,
    },
    /// Import a JSON backup (encrypted when --password is set)
    Import {
        path: std::path::PathBuf,
        #[arg(long, env = "EXOCORTEX_BACKUP_PASSWORD")]
        password: Option<String>,
    },
    /// Write a compact DB backup and rotate old ones
    BackupDb {
        dir: std::path::PathBuf,
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
    /// Store statistics
    Stats,
    /// Health checks
    Health,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = MemoryStore::open(&cli.db)?;

    match cli.command {
        Command::Store {
            content,
            tags,
            importance,
        } => {
            let result = store.create(CreateMemoryInput {
                content,
                tags,
                importance,
                source: Some("cli".to_string()),
                ..Default::default()
            })?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Search { query, limit } => {
            let response = store.search(
                &query,
                &SearchOptions {
                    limit: Some(limit),
                    ..Default::default()
                },
            )?;
            for r in &response.results {
                println!(
                    "{:.3}  {}  {}",
                    r.score,
                    r.memory.id,
                    first_line(&r.memory.content)
                );
            }
            for l in &response.linked {
                println!(
                    "  ~{}  {}  {}",
                    l.link_type.as_str(),
                    l.memory.id,
                    first_line(&l.memory.content)
                );
            }
        }
        Command::Browse { limit, tags } => {
            let memories = store.browse(&BrowseOptions {
                limit: Some(limit),
                tags: if tags.is_empty() { None } else { Some(tags) },
                ..Default::default()
            })?;
            for m in memories {
                println!("{}  [{}]  {}", m.id, m.tags.join(","), first_line(&m.content));
            }
        }
        Command::Get { id } => match store.get(&id)? {
            Some(memory) => println!("{}", serde_json::to_string_pretty(&memory)?),
            None => println!("not found"),
        },
        Command::Forget { id, hard } => {
            if hard {
                store.delete(&id)?;
                println!("deleted {}", id);
            } else {
                store.archive(&id)?;
                println!("archived {}", id);
            }
        }
        Command::Maintain {
            reembed,
            backfill_entities,
            recalibrate,
            densify_graph,
            co_retrieval_links,
            tune_weights,
        } => {
            let report = maintenance::run_maintenance(
                &store,
                MaintenanceFlags {
                    reembed,
                    backfill_entities,
                    recalibrate,
                    densify_graph,
                    build_co_retrieval_links: co_retrieval_links,
                    tune_weights,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Consolidate { apply } => {
            let report = maintenance::consolidate(&store, !apply)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Export { path, password } => {
            match password {
                Some(password) => {
                    let blob = backup::export_encrypted(&store, &password)?;
                    std::fs::write(&path, blob)?;
                }
                None => {
                    let envelope = backup::export(&store)?;
                    std::fs::write(&path, serde_json::to_vec_pretty(&envelope)?)?;
                }
            }
            println!("exported to {}", path.display());
        }
        Command::Import { path, password } => {
            let data = std::fs::read(&path)?;
            let report = match password {
                Some(password) => backup::import_encrypted(&store, &data, &password)?,
                None => {
                    let envelope: backup::BackupEnvelope = serde_json::from_slice(&data)?;
                    backup::import(&store, &envelope)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::BackupDb { dir, keep } => {
            let path = backup::backup_database(&store, &dir)?;
            let removed = backup::rotate_backups(&dir, keep)?;
            println!("wrote {} (rotated out {})", path.display(), removed);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats()?)?);
        }
        Command::Health => {
            let report = health_checks(&store)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or(content)
}
