//! objcache - inspect and populate object caches from the command line

mod error;

use crate::error::Result;
use clap::{Parser, Subcommand};
use object_cache::{
    CacheConfig, CacheRegistry, HttpFetcher, ImageCodec, ObjectCache, TypedCache,
    SHARED_CACHE_NAME,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "objcache", about = "Inspect and populate object caches")]
struct Args {
    /// Root directory holding one subdirectory per cache name
    #[arg(long, env = "CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Cache to operate on
    #[arg(long, default_value = SHARED_CACHE_NAME)]
    name: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the bytes stored under a key
    Get {
        key: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Store a value under a key
    Set {
        key: String,
        #[arg(long, conflicts_with = "value", required_unless_present = "value")]
        file: Option<PathBuf>,
        #[arg(long)]
        value: Option<String>,
    },
    /// Check whether a key is cached
    Exists { key: String },
    /// Remove a key
    Remove { key: String },
    /// Remove every key in the cache
    Clear,
    /// Print the file backing a key
    Path { key: String },
    /// Print size and modification time of a key's file as JSON
    Info { key: String },
    /// Print hit/miss counters for this invocation as JSON
    Stats,
    /// Fetch an image by URL unless it is already cached
    Fetch { key: String, url: String },
}

/// Whether the requested key was found
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Done,
    Missing,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("objcache=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    };

    let args = Args::parse();
    let mut stdout = std::io::stdout().lock();

    match run(args, &mut stdout).await? {
        Outcome::Done => Ok(ExitCode::SUCCESS),
        Outcome::Missing => Ok(ExitCode::from(1)),
    }
}

fn load_config(args: &Args) -> CacheConfig {
    let mut config = CacheConfig::from_env();
    if let Some(dir) = &args.cache_dir {
        config.root_dir = dir.clone();
    }
    config
}

async fn run(args: Args, out: &mut impl Write) -> Result<Outcome> {
    let config = load_config(&args);
    debug!(root = ?config.root_dir, cache = %args.name, "Opening cache");

    let registry = CacheRegistry::new(config);
    let cache = registry.named(&args.name)?;

    match args.command {
        Command::Get { key, output } => match cache.object_for_key_async(&key).await {
            Some(data) => {
                match output {
                    Some(path) => tokio::fs::write(path, &data).await?,
                    None => out.write_all(&data)?,
                }
                Ok(Outcome::Done)
            }
            None => {
                info!(key = %key, "Not cached");
                Ok(Outcome::Missing)
            }
        },
        Command::Set { key, file, value } => {
            let data = match (file, value) {
                (Some(path), _) => tokio::fs::read(path).await?,
                (None, Some(value)) => value.into_bytes(),
                (None, None) => Vec::new(),
            };
            cache.set_object_async(data, &key).await?;
            Ok(Outcome::Done)
        }
        Command::Exists { key } => {
            let exists = cache.object_exists_for_key_async(&key).await;
            writeln!(out, "{}", exists)?;
            Ok(if exists { Outcome::Done } else { Outcome::Missing })
        }
        Command::Remove { key } => {
            cache.remove_object_for_key(&key)?;
            Ok(Outcome::Done)
        }
        Command::Clear => {
            cache.remove_all_objects()?;
            Ok(Outcome::Done)
        }
        Command::Path { key } => match cache.path_for_key(&key) {
            Some(path) => {
                writeln!(out, "{}", path.display())?;
                Ok(Outcome::Done)
            }
            None => Ok(Outcome::Missing),
        },
        Command::Info { key } => match cache.entry_info(&key)? {
            Some(entry) => {
                writeln!(out, "{}", serde_json::to_string_pretty(&entry)?)?;
                Ok(Outcome::Done)
            }
            None => Ok(Outcome::Missing),
        },
        Command::Stats => {
            writeln!(out, "{}", serde_json::to_string_pretty(&cache.stats())?)?;
            Ok(Outcome::Done)
        }
        Command::Fetch { key, url } => {
            let timeout = Duration::from_secs(registry.config().fetch_timeout_secs);
            fetch_image(cache, timeout, &key, &url, out).await
        }
    }
}

async fn fetch_image(
    cache: ObjectCache,
    timeout: Duration,
    key: &str,
    url: &str,
    out: &mut impl Write,
) -> Result<Outcome> {
    let fetcher = HttpFetcher::new(timeout)?;
    let images = TypedCache::new(cache, ImageCodec).with_fetcher(Arc::new(fetcher));

    let image = images
        .fetch_and_cache(key, url, || info!(url = %url, "Not cached, fetching"))
        .await?;

    let summary = serde_json::json!({
        "key": key,
        "format": image.format(),
        "width": image.width(),
        "height": image.height(),
        "size": image.data().len(),
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
    Ok(Outcome::Done)
}
