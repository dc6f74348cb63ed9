//! Shard Cache - maintenance CLI
//!
//! Inspects and maintains a cache directory: statistics, single-key
//! get/put/remove, listing, clearing, TTL expiry and a long-running watch
//! mode that sweeps expired entries until interrupted.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shard_cache::models::{EntryReport, KeySpec, StatsReport};
use shard_cache::{spawn_expiry_task, AsyncCache, CacheKey, Config, DiskCache};

#[derive(Debug, Parser)]
#[command(name = "shard_cache", version, about = "Maintain a sharded disk cache")]
struct Cli {
    /// Cache root directory (overrides SHARD_CACHE_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Scope subdirectory under the root
    #[arg(long, global = true)]
    scope: Option<String>,

    /// Shard count (overrides SHARD_CACHE_SHARDS)
    #[arg(long, global = true)]
    shards: Option<usize>,

    /// Size limit in bytes (overrides SHARD_CACHE_SIZE_LIMIT)
    #[arg(long, global = true)]
    size_limit: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print statistics and per-shard occupancy as JSON
    Stats,
    /// Write a cached value to stdout or a file
    Get {
        #[command(flatten)]
        key: KeyArgs,
        /// Write the value here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Store a value read from --value, --file or stdin
    Put {
        #[command(flatten)]
        key: KeyArgs,
        #[arg(long, conflicts_with = "file")]
        value: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
        /// Expire the entry after this many seconds
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
    /// Remove one entry
    Remove {
        #[command(flatten)]
        key: KeyArgs,
    },
    /// List resident entries as JSON lines
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Remove every entry
    Clear {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Remove expired entries once
    Expire,
    /// Sweep expired entries periodically until interrupted
    Watch {
        /// Seconds between sweeps (overrides SHARD_CACHE_SWEEP_INTERVAL)
        #[arg(long)]
        interval_secs: Option<u64>,
    },
}

/// A key given as a name followed by its arguments
#[derive(Debug, Args)]
struct KeyArgs {
    /// Name of the cached computation
    name: String,
    /// Key arguments; prefix with s:, i:, u:, f:, b: or x: to force a type
    args: Vec<String>,
}

impl KeyArgs {
    fn to_key(&self) -> anyhow::Result<CacheKey> {
        KeySpec::new(self.name.clone(), self.args.clone())
            .to_key()
            .map_err(|e| anyhow!(e))
    }
}

/// Main entry point for the maintenance CLI.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging (stderr)
/// 2. Load configuration from environment variables and flags
/// 3. Open the cache (recovering any interrupted writes)
/// 4. Run the requested command
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" for this crate, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shard_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli);
    info!(
        root = %config.root_directory.display(),
        shards = config.shard_count,
        size_limit = config.size_limit_bytes,
        compression = %config.compression,
        eviction = %config.eviction_policy,
        "configuration loaded"
    );

    let sweep_interval = config.sweep_interval;
    let disk = {
        let open_config = config.clone();
        tokio::task::spawn_blocking(move || DiskCache::open(open_config))
            .await?
            .with_context(|| format!("opening cache at {}", config.root_directory.display()))?
    };
    let cache = AsyncCache::new(Arc::new(disk));

    match cli.command {
        Command::Stats => {
            print_json(&StatsReport::collect(cache.inner()))?;
        }
        Command::Get { key, output } => {
            let key = key.to_key()?;
            let Some(value) = cache.get(key.clone()).await? else {
                bail!("no entry for {key}");
            };
            match output {
                Some(path) => std::fs::write(&path, &value)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => io::stdout().lock().write_all(&value)?,
            }
        }
        Command::Put {
            key,
            value,
            file,
            ttl_secs,
        } => {
            let key = key.to_key()?;
            let bytes = match (value, file) {
                (Some(value), _) => value.into_bytes(),
                (None, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => {
                    let mut buf = Vec::new();
                    io::stdin().lock().read_to_end(&mut buf)?;
                    buf
                }
            };
            let len = bytes.len();
            match ttl_secs {
                Some(secs) => {
                    cache
                        .put_with_ttl(key.clone(), bytes, Duration::from_secs(secs))
                        .await?
                }
                None => cache.put(key.clone(), bytes).await?,
            }
            info!(key = %key, bytes = len, "stored");
        }
        Command::Remove { key } => {
            let key = key.to_key()?;
            if !cache.remove(key.clone()).await? {
                bail!("no entry for {key}");
            }
            info!(key = %key, "removed");
        }
        Command::List { limit } => {
            let entries = cache.inner().entries();
            let mut out = io::stdout().lock();
            for entry in entries.iter().take(limit.unwrap_or(usize::MAX)) {
                serde_json::to_writer(&mut out, &EntryReport::from(entry))?;
                writeln!(out)?;
            }
        }
        Command::Clear { yes } => {
            if !yes {
                bail!("refusing to clear {} without --yes", config.root_directory.display());
            }
            let removed = cache.clear().await?;
            info!(removed, "cleared");
        }
        Command::Expire => {
            let removed = cache.expire().await?;
            info!(removed, "expired entries removed");
        }
        Command::Watch { interval_secs } => {
            let interval = interval_secs
                .map(Duration::from_secs)
                .unwrap_or(sweep_interval);
            let expiry_handle = spawn_expiry_task(cache.inner().clone(), interval);
            info!("Background expiry task started");

            shutdown_signal().await;
            expiry_handle.abort();
            warn!("Expiry task aborted");

            let stats = cache.stats();
            info!(
                entries = stats.total_entries,
                bytes = stats.total_bytes,
                "watch stopped"
            );
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    if let Some(root) = &cli.root {
        config.root_directory = root.clone();
    }
    if let Some(shards) = cli.shards {
        config.shard_count = shards;
    }
    if let Some(limit) = cli.size_limit {
        config.size_limit_bytes = limit;
    }
    match &cli.scope {
        Some(scope) => config.for_scope(scope),
        None => config,
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
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
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
