use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use session_stores_core::config::{self, Backend, Config};
use session_stores_core::{Database, DatabaseExt, LifeTime, StoreError};

#[derive(Parser)]
#[command(
    name = "sessctl",
    about = "Inspect and drive session stores (MongoDB, Dgraph, memory)",
    version = session_stores_core::VERSION,
)]
struct Cli {
    /// Config file (defaults to ~/.session-stores/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Override the configured backend: memory, mongo or dgraph
    #[arg(short, long, global = true)]
    backend: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved configuration
    Status,
    /// Read (or create) a session's lifetime record
    Acquire {
        sid: String,
        /// Expiry in seconds for a new session (defaults to config)
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Set a key; the value is parsed as JSON, falling back to a plain string
    Set { sid: String, key: String, value: String },
    /// Print a key's value
    Get { sid: String, key: String },
    /// Print every key/value of a session
    Visit { sid: String },
    /// Count a session's entries
    Len { sid: String },
    /// Remove one key
    Delete { sid: String, key: String },
    /// Remove all keys but keep the session
    Clear { sid: String },
    /// Destroy the session
    Release { sid: String },
    /// Move a session's expiry
    Extend {
        sid: String,
        #[arg(long)]
        ttl: u64,
    },
    /// Run set/get/delete/clear/release against a throwaway session
    Demo {
        #[arg(long, default_value = "abc123")]
        sid: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sessctl=info".parse()?)
                .add_directive("session_stores_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref(), cli.backend.as_deref())?;

    if let Commands::Status = cli.command {
        return cmd_status(&cfg, cli.config.as_deref());
    }

    let store = config::open_store(&cfg).await?;
    tracing::debug!(backend = ?cfg.backend, "store opened");
    let result = run(store.as_ref(), &cfg, cli.command).await;
    store.close().await?;
    result
}

fn resolve_config(path: Option<&std::path::Path>, backend: Option<&str>) -> Result<Config> {
    let mut cfg = match path {
        Some(p) => config::read_config(p)?,
        None => config::load_config_from_env(),
    };
    if path.is_some() {
        config::apply_env_overrides(&mut cfg);
    }
    if let Some(b) = backend {
        cfg.backend = b.parse::<Backend>()?;
    }
    Ok(cfg)
}

async fn run(store: &dyn Database, cfg: &Config, command: Commands) -> Result<()> {
    match command {
        Commands::Status => unreachable!("handled before opening the store"),
        Commands::Acquire { sid, ttl } => {
            let ttl = ttl.map(Duration::from_secs).unwrap_or_else(|| cfg.default_expires());
            match store.acquire(&sid, ttl).await? {
                LifeTime::Unset => println!("{sid}: new session, lifetime record created"),
                LifeTime::Expires(at) => println!("{sid}: expires at {}", at.to_rfc3339()),
            }
        }
        Commands::Set { sid, key, value } => {
            let value = serde_json::from_str(&value).unwrap_or(serde_json::Value::String(value));
            store.set(&sid, &LifeTime::Unset, &key, &value, false).await?;
            println!("{sid}.{key} = {value}");
        }
        Commands::Get { sid, key } => match store.decode(&sid, &key).await? {
            Some(value) => println!("{value}"),
            None => bail!("{sid}.{key} not found"),
        },
        Commands::Visit { sid } => {
            store
                .visit(&sid, &mut |key: &str, value: serde_json::Value| {
                    println!("{key} = {value}")
                })
                .await?;
        }
        Commands::Len { sid } => println!("{}", store.len(&sid).await?),
        Commands::Delete { sid, key } => {
            if !store.delete(&sid, &key).await {
                bail!("failed to delete {sid}.{key}");
            }
            println!("deleted {sid}.{key}");
        }
        Commands::Clear { sid } => {
            store.clear(&sid).await?;
            println!("cleared {sid}");
        }
        Commands::Release { sid } => {
            store.release(&sid).await?;
            println!("released {sid}");
        }
        Commands::Extend { sid, ttl } => {
            match store.on_update_expiration(&sid, Duration::from_secs(ttl)).await {
                Ok(()) => println!("{sid}: expiry moved"),
                Err(StoreError::NotImplemented(op)) => {
                    println!("{sid}: {op} is not supported by the {:?} backend", cfg.backend)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Demo { sid } => cmd_demo(store, cfg, &sid).await?,
    }
    Ok(())
}

/// Walk one session through set, get, delete, clear and release.
async fn cmd_demo(store: &dyn Database, cfg: &Config, sid: &str) -> Result<()> {
    let lifetime = store.acquire(sid, cfg.default_expires()).await?;
    println!("acquire: {lifetime:?}");

    store.set_value(sid, "name", "iris").await?;
    println!("set: name = {}", store.get_string(sid, "name").await);

    let deleted = store.delete(sid, "name").await;
    println!("delete: {deleted}, name now {:?}", store.get(sid, "name").await);
    println!("len: {}", store.len(sid).await?);

    store.set_value(sid, "visits", &1).await?;
    store.clear(sid).await?;
    let kept = store.acquire(sid, cfg.default_expires()).await?;
    println!("clear: len {}, lifetime {kept:?}", store.len(sid).await?);

    store.release(sid).await?;
    let fresh = store.acquire(sid, cfg.default_expires()).await?;
    println!("release: next acquire {fresh:?}");
    store.release(sid).await?;
    Ok(())
}

fn cmd_status(cfg: &Config, path: Option<&std::path::Path>) -> Result<()> {
    let config_path = path.map(|p| p.to_path_buf()).unwrap_or_else(config::get_config_path);
    println!("session-stores {}\n", session_stores_core::VERSION);
    println!(
        "Config: {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗" }
    );
    println!("Backend: {:?}", cfg.backend);
    println!("Default expiry: {}s", cfg.default_expires_secs);
    match cfg.backend {
        Backend::Memory => println!("Note: memory sessions do not outlive this process"),
        Backend::Mongo => println!("MongoDB: {} (database {})", cfg.mongo.uri, cfg.mongo.database),
        Backend::Dgraph => println!("Dgraph: {}", cfg.dgraph.url),
    }
    Ok(())
}
