use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use range_cache::{ByteRange, CacheAction, CacheManager, CacheSettings, ResourceKey};

#[derive(Parser, Debug)]
#[command(name = "range-cache", about = "Inspect and maintain a media range cache", version)]
struct Cli {
    /// Settings file (defaults to <config dir>/range-cache/config.toml)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the allocated size of the cache directory
    Size,
    /// Delete every cached entry
    Purge,
    /// Delete cached files whose expiration has passed
    Sweep,
    /// Show the cached state of a resource
    Inspect {
        /// Resource locator, e.g. https://cdn.example.com/intro.mp4
        locator: ResourceKey,
    },
    /// Show the local/remote plan for a byte range of a resource
    Plan {
        locator: ResourceKey,
        offset: u64,
        length: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("range_cache=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut settings = CacheSettings::load_or_default(cli.config.as_deref())?;
    if let Some(dir) = cli.dir {
        settings.directory = Some(dir);
    }

    let manager = CacheManager::global();
    settings.apply(manager)?;
    info!("Using cache directory {:?}", manager.directory());

    match cli.command {
        Command::Size => {
            let bytes = manager.total_cached_size();
            println!(
                "{} bytes ({:.1} MB)",
                bytes,
                bytes as f64 / 1024.0 / 1024.0
            );
        }
        Command::Purge => {
            manager.purge_all().context("Failed to purge cache")?;
            println!("Cache purged");
        }
        Command::Sweep => {
            let removed = manager
                .sweep_expired()
                .context("Failed to sweep expired cache entries")?;
            println!("Removed {} expired files", removed);
        }
        Command::Inspect { locator: key } => {
            let path = manager.path_for(&key);
            let configuration = manager.cached_configuration(&key)?;

            println!("path:      {}", path.display());
            match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(expires) => {
                    println!("expires:   {}", DateTime::<Utc>::from(expires).to_rfc3339())
                }
                Err(_) => println!("expires:   (not cached)"),
            }
            if let Some(info) = &configuration.info {
                println!("length:    {}", info.content_length);
                println!("type:      {}", info.content_type);
            }
            println!(
                "cached:    {} bytes in {} fragments ({:.1}%)",
                configuration.fragments.cached_bytes(),
                configuration.fragments.len(),
                configuration.progress() * 100.0
            );
            for fragment in configuration.fragments.iter() {
                println!("  {}", fragment);
            }
        }
        Command::Plan {
            locator: key,
            offset,
            length,
        } => {
            let requested = ByteRange::new(offset, length);
            anyhow::ensure!(
                requested.is_addressable(),
                "range {}+{} runs past the end of the address space",
                offset,
                length
            );
            let configuration = manager.cached_configuration(&key)?;
            let actions = range_cache::cache::plan_actions(
                requested,
                &configuration.fragments,
                configuration.info.as_ref(),
                manager.snapshot().package_size,
            );

            if actions.is_empty() {
                println!("nothing to do");
            }
            for action in &actions {
                match action {
                    CacheAction::Local(range) => println!("local   {}", range),
                    CacheAction::Remote(range) => println!("remote  {}", range),
                }
            }
            let remote_bytes: u64 = actions
                .iter()
                .filter(|action| action.is_remote())
                .map(|action| action.range().length)
                .sum();
            if remote_bytes > 0 {
                println!("{} bytes to fetch", remote_bytes);
            }
        }
    }

    Ok(())
}
