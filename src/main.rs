use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tallysync::config::Config;
use tallysync::sync::{SyncHandle, SyncProgress, SyncStatus};
use tallysync::{CompanyIdentity, Engine};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tallysync")]
#[command(about = "Resumable sync and local cache for accounting datasets")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tallysync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log at debug level
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct CompanyArgs {
  /// Location id of the company's server
  #[arg(long)]
  location: String,

  /// Company GUID
  #[arg(long)]
  guid: String,

  /// Company name as used in cache keys
  #[arg(long)]
  name: String,
}

impl From<CompanyArgs> for CompanyIdentity {
  fn from(args: CompanyArgs) -> Self {
    CompanyIdentity::new(args.location, args.guid, args.name)
  }
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Download the company's datasets, resuming an interrupted download
  Sync {
    #[command(flatten)]
    company: CompanyArgs,

    /// Discard any interrupted download and start over
    #[arg(long)]
    fresh: bool,
  },
  /// Fetch only vouchers changed since the last completed sync
  Update {
    #[command(flatten)]
    company: CompanyArgs,
  },
  /// Show sync progress and any interrupted download
  Status {
    #[command(flatten)]
    company: CompanyArgs,
  },
  /// Stop reporting the company's interrupted download
  Dismiss {
    #[command(flatten)]
    company: CompanyArgs,
  },
  /// List cache entries
  List,
  /// Print a cache entry
  Get { key: String },
  /// Clear the whole cache, or one company's data
  Clear {
    #[arg(long, requires_all = ["guid", "name"])]
    location: Option<String>,

    #[arg(long, requires = "location")]
    guid: Option<String>,

    #[arg(long, requires = "location")]
    name: Option<String>,
  },
  /// Remove cache entries older than the configured expiry
  Expire,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = tallysync::logging::init(&config.data_dir()?.join("logs"), args.verbose)?;

  let engine = Engine::open(&config).await?;
  info!(backend = engine.cache.backend_name(), "engine ready");

  match args.command {
    Command::Sync { company, fresh } => {
      let company = CompanyIdentity::from(company);
      if !fresh {
        if let Some(interrupted) = engine.sync.detect_interrupted(&company)? {
          println!("{}; resuming", interrupted.message);
        }
      }
      let handle = engine.sync.start_or_resume(&company, fresh);
      finish(&engine, handle).await
    }
    Command::Update { company } => {
      let company = CompanyIdentity::from(company);
      let handle = engine.sync.start_update(&company)?;
      finish(&engine, handle).await
    }
    Command::Status { company } => {
      let company = CompanyIdentity::from(company);
      let progress = engine.sync.get_progress(&company)?;
      print_progress(&progress);
      if let Some(state) = engine.progress.read_sync_state(&company)? {
        println!(
          "Last completed sync: {} (data to {}, alter id {})",
          state.completed_at.format("%Y-%m-%d %H:%M"),
          state.synced_to,
          state
            .last_alter_id
            .map_or_else(|| "-".to_string(), |id| id.to_string())
        );
      }
      Ok(())
    }
    Command::Dismiss { company } => {
      let company = CompanyIdentity::from(company);
      if engine.sync.dismiss_interruption(&company)? {
        println!("Interruption dismissed for {}", company);
      } else {
        println!("No interrupted download for {}", company);
      }
      Ok(())
    }
    Command::List => {
      let summary = engine.cache.list_all();
      for entry in &summary.entries {
        let range = entry
          .date_range
          .map(|r| r.to_string())
          .unwrap_or_default();
        println!(
          "{:<10} {:>10}  {}  {}  {}",
          entry.cache_type.as_str(),
          entry.size_bytes,
          entry.created_at.format("%Y-%m-%d %H:%M"),
          entry.key,
          range
        );
      }
      let counts: Vec<String> = summary
        .counts_by_type
        .iter()
        .map(|(kind, count)| format!("{} {}", count, kind.as_str()))
        .collect();
      println!(
        "{} entries, {} bytes ({})",
        summary.total_entries,
        summary.total_size_bytes,
        counts.join(", ")
      );
      Ok(())
    }
    Command::Get { key } => match engine.cache.get(&key).await? {
      Some(payload) => {
        println!("{}", String::from_utf8_lossy(&payload));
        Ok(())
      }
      None => Err(eyre!("No cache entry for '{}'", key)),
    },
    Command::Clear {
      location,
      guid,
      name,
    } => {
      match (location, guid, name) {
        (Some(location), Some(guid), Some(name)) => {
          let company = CompanyIdentity::new(location, guid, name);
          let removed = engine.sync.clear_company(&company).await?;
          println!("Removed {} entries for {}", removed, company);
        }
        _ => {
          engine.cache.clear_all().await?;
          println!("Cache cleared");
        }
      }
      Ok(())
    }
    Command::Expire => {
      let removed = engine.cache.expire(Utc::now()).await?;
      println!("Removed {} expired entries", removed);
      Ok(())
    }
  }
}

/// Print progress until the sync ends. Ctrl-C cancels after the current
/// window.
async fn finish(engine: &Engine, handle: SyncHandle) -> Result<()> {
  let company = handle.company().clone();
  let mut updates = handle.receiver();

  let last = loop {
    let progress = updates.borrow_and_update().clone();
    print_progress(&progress);
    if progress.status.is_terminal() {
      break progress;
    }

    tokio::select! {
      changed = updates.changed() => {
        if changed.is_err() {
          break updates.borrow().clone();
        }
      }
      _ = tokio::signal::ctrl_c() => {
        engine.sync.cancel(&company);
        println!("Cancelling after the current window...");
        break handle.clone().wait().await;
      }
    }
  };

  match last.status {
    SyncStatus::Failed => Err(eyre!("{}", last.message)),
    _ => Ok(()),
  }
}

fn print_progress(progress: &SyncProgress) {
  println!(
    "[{:?}] {}/{} {}{}",
    progress.status,
    progress.current_chunk,
    progress.total_chunks,
    progress.message,
    progress
      .window_label
      .as_deref()
      .map(|w| format!(" [{}]", w))
      .unwrap_or_default()
  );
}
