use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use jot_attribution::{AttributionSink, ConversionTracker, SinkError, SinkTier, TrackerConfig};
use jot_core::{AttributionWindow, ConversionEvent, ConversionUpdate};
use jot_storage::AttributionStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jot-attr")]
#[command(about = "Jot conversion attribution inspector", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show persisted attribution state and the current window
    Status {
        /// Attribution database path (defaults to the app data dir)
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Replay conversion events against an in-process sink
    Simulate {
        /// Events to replay: note-created, first-note, note-edited,
        /// multiple-notes, active-user, install
        events: Vec<String>,
        /// Attribution database path (in-memory when omitted)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Fail every sink call
        #[arg(long, default_value_t = false)]
        fail: bool,
    },
}

/// Full-tier sink that logs instead of talking to an OS attribution API.
struct LoggingSink {
    fail: bool,
}

#[async_trait::async_trait]
impl AttributionSink for LoggingSink {
    fn probe(&self) -> Option<SinkTier> {
        Some(SinkTier::Full)
    }

    async fn update_conversion_value(&self, update: ConversionUpdate) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Transport("simulated failure".to_string()));
        }
        info!(
            fine_value = update.fine_value,
            coarse_tier = update.coarse_tier.as_str(),
            lock_window = update.lock_window,
            "sink received conversion update"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Status { db, json } => status(db, json),
        Commands::Simulate { events, db, fail } => simulate(events, db, fail).await,
    }
}

fn status(db: Option<PathBuf>, json: bool) -> Result<()> {
    let path = resolve_db_path(db)?;
    if !path.exists() {
        println!("No attribution state at {}", path.display());
        return Ok(());
    }

    let store = AttributionStore::open(&path)
        .with_context(|| format!("Failed to open attribution store at {}", path.display()))?;
    let Some(state) = store.load()? else {
        println!("No install record at {}", path.display());
        return Ok(());
    };

    let now = Utc::now();
    let window = AttributionWindow::at(state.install_ts, now);
    let elapsed_days = now.signed_duration_since(state.install_ts).num_days();

    if json {
        let value = serde_json::json!({
            "install_ts": state.install_ts.to_rfc3339(),
            "elapsed_days": elapsed_days,
            "window": window.as_str(),
            "install_postback_sent": state.install_postback_sent,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Installed:    {}", state.install_ts.to_rfc3339());
        println!("Elapsed:      {elapsed_days} days");
        println!("Window:       {window}");
        println!("Install sent: {}", state.install_postback_sent);
    }

    Ok(())
}

async fn simulate(events: Vec<String>, db: Option<PathBuf>, fail: bool) -> Result<()> {
    let mut parsed = Vec::new();
    for raw in &events {
        let event: ConversionEvent = raw.parse().map_err(|err: String| anyhow!(err))?;
        parsed.push(event);
    }

    let store = match db {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
            AttributionStore::open(&path).with_context(|| {
                format!("Failed to open attribution store at {}", path.display())
            })?
        }
        None => AttributionStore::open_in_memory()?,
    };

    let sink = Arc::new(LoggingSink { fail });
    let tracker = ConversionTracker::init(store, sink, TrackerConfig::default()).await?;

    for event in parsed {
        let outcome = match event {
            ConversionEvent::NoteCreated => tracker.report_note_created(false).await,
            ConversionEvent::FirstNoteCreated => tracker.report_note_created(true).await,
            ConversionEvent::NoteEdited => tracker.report_note_edited().await,
            ConversionEvent::MultipleNotesCreated => {
                tracker.report_multiple_notes_created().await
            }
            ConversionEvent::ActiveUser => tracker.report_active_user().await,
            ConversionEvent::Install => tracker.report_install().await,
        };
        println!("{event} -> {outcome}");
    }

    Ok(())
}

fn resolve_db_path(db: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = db {
        return Ok(path);
    }
    let base = dirs::data_local_dir().context("No local data directory for this platform")?;
    Ok(base.join("jot").join("attribution.db"))
}
