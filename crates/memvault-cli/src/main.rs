// ============================================================================
// memvault - CLI inspection tool for a local memory store
// ============================================================================
// Usage:
//   memvault stats                              Show store statistics
//   memvault list [--category C] [--limit N]    List memories, newest first
//   memvault show <ID>                          Show one memory as JSON
//   memvault delete <ID>                        Delete a memory
//   memvault export --format json               Export all metadata as JSON
// ============================================================================

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use memvault_core::{MemoryConfig, MemoryId, MemoryRecord, MemoryStore};
use tracing::info;

/// Memory store inspection tool
#[derive(Parser)]
#[command(name = "memvault", version, about = "Inspect and manage a local memory store")]
struct Cli {
    /// Store directory (default: MEMVAULT_DIR or ~/.memvault)
    #[arg(long, global = true)]
    dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store statistics (record count, dimensionality, categories)
    Stats,

    /// List memories, newest first
    List {
        /// Only show memories in this category
        #[arg(long)]
        category: Option<String>,

        /// Maximum number of memories to show
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show a single memory as JSON
    Show {
        /// Memory id
        id: String,
    },

    /// Delete a memory by id
    Delete {
        /// Memory id
        id: String,
    },

    /// Export all memory metadata
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("memvault=info".parse()?)
                .add_directive("memvault_core=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = MemoryConfig::from_env();
    if let Some(dir) = &cli.dir {
        config = config.with_data_dir(dir);
    }

    let mut store = MemoryStore::open(&config.data_dir)?;

    match cli.command {
        Commands::Stats => cmd_stats(&store),
        Commands::List { category, limit } => cmd_list(&store, category, limit),
        Commands::Show { id } => cmd_show(&store, &id),
        Commands::Delete { id } => cmd_delete(&mut store, &id),
        Commands::Export { format } => cmd_export(&store, &format),
    }
}

fn cmd_stats(store: &MemoryStore) -> Result<()> {
    let stats = store.stats();

    println!("=== Memory Store Stats ===");
    println!("Store:     {}", store.path().display());
    println!();
    println!("Memories:  {}", stats.count);
    match stats.dimension {
        Some(dim) => println!("Dimension: {}", dim),
        None => println!("Dimension: (not yet fixed)"),
    }
    for (category, count) in &stats.categories {
        println!("  {:16} {}", category, count);
    }

    Ok(())
}

fn cmd_list(store: &MemoryStore, category: Option<String>, limit: Option<usize>) -> Result<()> {
    let records: Vec<&MemoryRecord> = match category.as_deref() {
        Some(category) => {
            let mut records = store.list_by_category(category);
            if let Some(limit) = limit {
                records.truncate(limit);
            }
            records
        }
        None => store.list_all(limit),
    };

    if records.is_empty() {
        println!("No memories found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<23}  {}",
        "MEMORY ID", "CATEGORY", "CREATED AT", "TEXT"
    );
    println!("{}", "-".repeat(100));

    for record in &records {
        let text = record.text.chars().take(40).collect::<String>();
        println!(
            "{:<36}  {:<12}  {:<23}  {}",
            record.id,
            record.category,
            format_timestamp(&record.created_at),
            text
        );
    }

    println!("\nTotal: {} memories", records.len());
    Ok(())
}

fn cmd_show(store: &MemoryStore, id: &str) -> Result<()> {
    let id = MemoryId::from(id);
    match store.get(&id) {
        Some(record) => println!("{}", serde_json::to_string_pretty(record)?),
        None => anyhow::bail!("Memory '{}' not found", id),
    }
    Ok(())
}

fn cmd_delete(store: &mut MemoryStore, id: &str) -> Result<()> {
    let id = MemoryId::from(id);
    if store.delete(&id)? {
        info!("Deleted memory {}", id);
        println!("Deleted {}", id);
    } else {
        println!("No memory with id {}", id);
    }
    Ok(())
}

fn cmd_export(store: &MemoryStore, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "store": store.path().display().to_string(),
        "stats": store.stats(),
        "memories": store.list_all(None),
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}
