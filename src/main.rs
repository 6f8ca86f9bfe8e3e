// src/main.rs

mod app;
mod claim;
mod config;
mod gateway;
mod image_store;
mod label;
mod orders;
mod pdf_extract;
mod record_store;
mod share_cache;

use app::AppState;
use clap::{Parser, Subcommand};
use config::{Config, ImageBackend};
use orders::NewProduct;
use pdf_extract::ExtractionLimits;
use record_store::{Collection, SqliteRecordStore};
use serde::Serialize;
use share_cache::{MemoryShareCache, ShareCache, SqliteShareCache};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilink", about = "Shipping-label inbox for dropshippers and suppliers")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "resilink.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local service, share endpoint included
    Serve {
        /// Keep pending shares in memory only
        #[arg(long)]
        ephemeral: bool,
    },
    /// Extract label fields from a PDF and print them as JSON
    Parse {
        pdf: PathBuf,
    },
    /// Claim a pending share from the local inbox
    Claim,
    /// Add a product to the catalog
    AddProduct {
        #[arg(long)]
        name: String,
        /// Price in whole rupiah
        #[arg(long)]
        price: i64,
        #[arg(long, default_value = "")]
        code: String,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Delete orders older than the retention window
    Cleanup {
        /// Overrides cleanup.retention_days
        #[arg(long)]
        days: Option<i64>,
    },
    /// Print today's supplier totals
    Stats,
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_records(cfg: &Config) -> Result<SqliteRecordStore, Box<dyn std::error::Error>> {
    ensure_parent(&cfg.storage.db_path)?;
    Ok(SqliteRecordStore::open(&cfg.storage.db_path)?)
}

fn ensure_parent(path: &str) -> std::io::Result<()> {
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir),
        _ => Ok(()),
    }
}

fn build_state(
    cfg: &Config,
    records: Arc<SqliteRecordStore>,
    ephemeral: bool,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let shares: Arc<dyn ShareCache> = if ephemeral {
        info!("Pending shares are kept in memory only");
        Arc::new(MemoryShareCache::new())
    } else {
        Arc::new(SqliteShareCache::open(
            &cfg.storage.db_path,
            &cfg.share.cache_name,
        )?)
    };

    let media_dir = (cfg.images.backend == ImageBackend::Dir).then(|| PathBuf::from(&cfg.images.dir));

    Ok(AppState {
        shares,
        records,
        images: Arc::from(image_store::from_config(&cfg.images)?),
        limits: ExtractionLimits::from(&cfg.extraction),
        media_dir,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // init tracing; stdout is left for command output
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Serve { ephemeral } => {
            let records = Arc::new(open_records(&cfg)?);
            let state = build_state(&cfg, records, ephemeral)?;
            app::serve(state, &cfg).await?;
        }
        Commands::Parse { pdf } => {
            let bytes = std::fs::read(&pdf)?;
            info!(path = %pdf.display(), bytes = bytes.len(), "Parsing label");
            let label =
                pdf_extract::parse_shipping_label(bytes, ExtractionLimits::from(&cfg.extraction))
                    .await?;
            print_json(&label)?;
        }
        Commands::Claim => {
            let records = Arc::new(open_records(&cfg)?);
            let state = build_state(&cfg, records, false)?;
            let pending: Vec<&str> = claim::pending_slots(state.shares.as_ref())
                .into_iter()
                .map(|slot| slot.key())
                .collect();
            info!(pending = ?pending, "Pending shares");
            let outcome = claim::claim_pending(
                state.shares.as_ref(),
                Some(format!("{}=true", gateway::SHARED_MARKER).as_str()),
            );
            let (shared, notice) = app::process_claim(&state, outcome).await;
            print_json(&serde_json::json!({ "shared": shared, "notice": notice }))?;
        }
        Commands::AddProduct {
            name,
            price,
            code,
            image_url,
        } => {
            let records = open_records(&cfg)?;
            let product = orders::add_product(
                &records,
                NewProduct {
                    code,
                    name,
                    price,
                    image_url,
                },
            )
            .await?;
            print_json(&product)?;
        }
        Commands::Cleanup { days } => {
            let records = open_records(&cfg)?;
            let retention_days = days.unwrap_or(cfg.cleanup.retention_days);
            let deleted = orders::cleanup(&records, OffsetDateTime::now_utc(), retention_days)?;
            info!(deleted, retention_days, "Cleanup finished");
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
        Commands::Stats => {
            let records = open_records(&cfg)?;
            let board = orders::supplier_board(&records, OffsetDateTime::now_utc()).await?;
            info!(
                products = records.count(Collection::Products)?,
                orders = records.count(Collection::Orders)?,
                "Database statistics"
            );
            print_json(&board.stats)?;
        }
    }

    Ok(())
}
