//! Los Libros offline reader CLI
//!
//! Manages the offline book cache and reading progress for this device.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use libros_offline::cache::format_size;
use libros_offline::progress::{format_time_remaining, DEFAULT_MINUTES_PER_PAGE};
use libros_offline::storage::{create_pool, KeyValueStore, SqliteStore};
use libros_offline::sync::{HttpProgressService, MemoryProgressService};
use libros_offline::{BookPayload, Config, OfflineReader, ProgressRecord, RemoteProgressService};

#[derive(Parser)]
#[command(name = "libros-offline", version, about = "Offline books and reading progress sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Cache a book's content for offline reading
    Download {
        book_id: String,
        /// File holding the book content
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        cover_url: Option<String>,
    },
    /// List cached books
    List,
    /// Open a cached book (counts as an access)
    Get { book_id: String },
    /// Remove a cached book
    Remove { book_id: String },
    /// Show cache usage
    Stats,
    /// Record a reading position and push it
    Progress {
        user_id: String,
        book_id: String,
        position: u32,
        total: u32,
        #[arg(long)]
        chapter: Option<String>,
    },
    /// Resolve the resume position across all devices
    Resolve { user_id: String, book_id: String },
    /// Auto-sync the page number found in a file until interrupted
    Watch {
        user_id: String,
        book_id: String,
        #[arg(long)]
        position_file: PathBuf,
        #[arg(long)]
        total: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "libros_offline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;
    let cli = Cli::parse();

    let pool = create_pool(&config.database.url)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database.url))?;
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::new(pool));

    let remote: Arc<dyn RemoteProgressService> = match &config.remote.base_url {
        Some(url) => {
            tracing::info!("Progress API: {}", url);
            Arc::new(HttpProgressService::new(url, config.remote.timeout)?)
        }
        None => {
            tracing::info!("No PROGRESS_API_URL set, progress stays on this device");
            Arc::new(MemoryProgressService::new())
        }
    };

    let reader = OfflineReader::new(store, remote, config.cache.clone(), config.sync.clone());

    match cli.command {
        Command::Download {
            book_id,
            file,
            title,
            author,
            cover_url,
        } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let payload = BookPayload {
                title,
                author,
                content,
                cover_url,
            };
            if !reader.download_content(&book_id, payload).await {
                bail!("Could not cache {} for offline reading", book_id);
            }
            println!("Cached {}", book_id);
        }
        Command::List => {
            for book in reader.list_offline_content().await {
                println!(
                    "{}\t{}\t{}\t{}\tlast read {}",
                    book.book_id,
                    book.title,
                    book.author,
                    format_size(book.size_bytes),
                    book.last_accessed.to_rfc3339()
                );
            }
        }
        Command::Get { book_id } => match reader.get_content(&book_id).await {
            Some(book) => println!("{}", serde_json::to_string_pretty(&book)?),
            None => bail!("{} is not available offline", book_id),
        },
        Command::Remove { book_id } => {
            if !reader.remove_content(&book_id).await {
                bail!("{} was not cached", book_id);
            }
            println!("Removed {}", book_id);
        }
        Command::Stats => {
            let stats = reader
                .cache_stats()
                .await
                .context("Cache storage unavailable")?;
            println!(
                "{} books, {} of {} used ({:.1}%)",
                stats.records,
                format_size(stats.used_bytes),
                format_size(stats.budget_bytes),
                stats.usage() * 100.0
            );
        }
        Command::Progress {
            user_id,
            book_id,
            position,
            total,
            chapter,
        } => {
            let mut record =
                ProgressRecord::new(&user_id, &book_id, reader.device_id(), position, total)?;
            if let Some(chapter) = chapter {
                record = record.with_chapter(&chapter, None);
            }
            let pushed = reader.sync_progress(record.clone()).await;
            println!(
                "{}% read, about {} left{}",
                record.percent_complete(),
                format_time_remaining(record.estimate_minutes_remaining(DEFAULT_MINUTES_PER_PAGE)),
                if pushed { "" } else { " (saved locally, push pending)" }
            );
        }
        Command::Resolve { user_id, book_id } => {
            let canonical = reader.resolve_canonical_progress(&user_id, &book_id).await?;
            println!("{}", serde_json::to_string_pretty(&canonical)?);
        }
        Command::Watch {
            user_id,
            book_id,
            position_file,
            total,
        } => {
            let device_id = reader.device_id().to_string();
            let last_page = AtomicU32::new(0);
            let (user, book) = (user_id.clone(), book_id.clone());

            reader.start_auto_sync(&user_id, &book_id, move || {
                // Keep the last good page when the file is mid-write or garbled
                if let Some(page) = std::fs::read_to_string(&position_file)
                    .ok()
                    .and_then(|s| s.trim().parse::<u32>().ok())
                {
                    last_page.store(page.min(total), Ordering::SeqCst);
                }
                ProgressRecord {
                    book_id: book.clone(),
                    user_id: user.clone(),
                    device_id: device_id.clone(),
                    current_position: last_page.load(Ordering::SeqCst),
                    total_extent: total,
                    chapter_id: None,
                    scroll_offset: None,
                    last_synced_at: chrono::Utc::now(),
                }
            });

            shutdown_signal().await;
            reader.stop_auto_sync();
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping sync...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, stopping sync...");
        },
    }
}
