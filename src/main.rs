use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use repforge::config::Config;
use repforge::engine::SummaryOptions;
use repforge::remote::{MemoryRemote, RemoteStore};
use repforge::store::draft::DraftStore;
use repforge::store::json_store::JsonStore;
use repforge::store::queue::{self, MutationQueue};
use repforge::store::schema::FinishedSession;

#[derive(Parser)]
#[command(
    name = "repforge",
    version,
    about = "Offline-first workout session logger with progression suggestions"
)]
struct Cli {
    #[arg(short, long, global = true, help = "Log at debug level")]
    verbose: bool,

    #[arg(long, global = true, help = "Config file (defaults to the user config dir)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Directory holding drafts and the mutation queue")]
    data_dir: Option<String>,

    #[arg(long, global = true, help = "Remote store base URL")]
    remote_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the share text for a finished session file
    Summary {
        file: PathBuf,
        #[arg(long, help = "Append entry notes")]
        notes: bool,
    },
    /// Print next-session load suggestions for a finished session file
    Suggest {
        file: PathBuf,
        #[arg(long, help = "Use 1.25kg steps instead of 2.5kg")]
        microloading: bool,
    },
    /// Inspect or replay the offline mutation queue
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Inspect or discard autosaved session drafts
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },
    /// Print the effective configuration, or write the defaults to disk
    Config {
        #[arg(long, help = "Write a default config file if none exists")]
        init: bool,
    },
}

#[derive(Subcommand)]
enum QueueAction {
    /// List pending mutations in replay order
    Status,
    /// Replay pending mutations against the remote store
    Drain {
        #[arg(long, help = "Replay against an in-memory store and keep the queue")]
        dry_run: bool,
    },
    /// Drop every pending mutation
    Clear,
}

#[derive(Subcommand)]
enum DraftAction {
    /// List sessions with a saved draft
    List,
    Show { session_id: String },
    Clear { session_id: String },
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "repforge=debug"
    } else {
        "repforge=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(url) = &cli.remote_url {
        config.remote_url = Some(url.clone());
    }
    config.validate();
    Ok(config)
}

fn read_finished(path: &Path) -> Result<FinishedSession> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn open_store(config: &Config) -> Result<JsonStore> {
    JsonStore::with_base_dir(config.data_dir())
}

#[cfg(feature = "network")]
fn connect_remote(config: &Config) -> Result<Arc<dyn RemoteStore>> {
    use repforge::remote::rest::RestRemote;

    let Some(url) = config.remote_url.as_deref() else {
        bail!("no remote_url configured; set it in {}", Config::config_path().display());
    };
    let remote = RestRemote::new(url, config.remote_api_key.clone(), config.request_timeout())?;
    Ok(Arc::new(remote))
}

#[cfg(not(feature = "network"))]
fn connect_remote(_config: &Config) -> Result<Arc<dyn RemoteStore>> {
    bail!("built without the `network` feature; only --dry-run is available")
}

async fn run_queue(config: &Config, action: QueueAction) -> Result<()> {
    let queue = MutationQueue::new(open_store(config)?);
    match action {
        QueueAction::Status => {
            let pending = queue.pending().await?;
            if pending.is_empty() {
                println!("queue is empty");
            }
            for mutation in pending {
                println!(
                    "{}  {:<6} {:<16} {}",
                    mutation.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                    format!("{:?}", mutation.kind).to_lowercase(),
                    mutation.table,
                    mutation.id
                );
            }
        }
        QueueAction::Drain { dry_run: true } => {
            let remote = MemoryRemote::new();
            let pending = queue.pending().await?;
            let mut failed = 0;
            for mutation in &pending {
                if let Err(err) = queue::apply(&remote, mutation).await {
                    failed += 1;
                    println!("would fail: {} ({err})", mutation.id);
                }
            }
            println!(
                "dry run: {} would succeed, {failed} would fail",
                pending.len() - failed
            );
        }
        QueueAction::Drain { dry_run: false } => {
            let remote = connect_remote(config)?;
            match queue.drain(remote.as_ref()).await? {
                Some(report) => {
                    println!("{} succeeded, {} failed", report.succeeded, report.failed)
                }
                None => println!("a drain is already running"),
            }
        }
        QueueAction::Clear => {
            let count = queue.len().await?;
            queue.clear().await?;
            println!("dropped {count} pending mutation(s)");
        }
    }
    Ok(())
}

fn run_draft(config: &Config, action: DraftAction) -> Result<()> {
    let drafts = DraftStore::new(open_store(config)?);
    match action {
        DraftAction::List => {
            for session_id in drafts.sessions()? {
                println!("{session_id}");
            }
        }
        DraftAction::Show { session_id } => {
            let entries = drafts.load(&session_id);
            if entries.is_empty() {
                bail!("no draft saved for session {session_id}");
            }
            if let Some(session) = drafts.load_session(&session_id) {
                println!("{}", serde_json::to_string_pretty(&session)?);
            }
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        DraftAction::Clear { session_id } => {
            drafts.clear(&session_id)?;
            println!("cleared draft for {session_id}");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let config_file = cli.config.clone().unwrap_or_else(Config::config_path);
    match cli.command {
        Command::Summary { file, notes } => {
            let finished = read_finished(&file)?;
            let options = SummaryOptions {
                include_notes: notes || config.include_notes,
            };
            println!("{}", finished.summary(options));
        }
        Command::Suggest { file, microloading } => {
            let finished = read_finished(&file)?;
            for s in finished.suggestions(microloading || config.microloading) {
                let fmt = |w: Option<f64>| w.map_or_else(|| "-".to_string(), |w| format!("{w}kg"));
                let marker = if s.is_warning { "!" } else { " " };
                println!(
                    "{marker} {}: {} -> {}  {}",
                    s.exercise_name,
                    fmt(s.current_weight),
                    fmt(s.suggested_weight),
                    s.reason
                );
            }
        }
        Command::Queue { action } => run_queue(&config, action).await?,
        Command::Draft { action } => run_draft(&config, action)?,
        Command::Config { init: false } => print!("{}", toml::to_string_pretty(&config)?),
        Command::Config { init: true } => {
            if config_file.exists() {
                bail!("{} already exists", config_file.display());
            }
            Config::default().save_to(&config_file)?;
            println!("wrote {}", config_file.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}
