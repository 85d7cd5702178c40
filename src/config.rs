use crate::models::copy::{CopyOptions, DEFAULT_WORKER_COUNT};
use crate::services::copy::planner::DEFAULT_MIN_PART_SIZE;
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Concurrent part copies per multipart copy.
    pub copy_workers: usize,
    /// Smallest part a multipart copy plans, in bytes.
    pub min_part_size: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object store with concurrent multipart copy")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides OBJECT_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Part-copy workers per copy (overrides OBJECT_STORE_COPY_WORKERS)
    #[arg(long)]
    pub copy_workers: Option<usize>,

    /// Minimum part size in bytes (overrides OBJECT_STORE_MIN_PART_SIZE)
    #[arg(long)]
    pub min_part_size: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// CLI values win; `lookup` supplies the environment fallback.
    pub fn merge<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("OBJECT_STORE_HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(port) => port,
                None => parse_var(&lookup, "OBJECT_STORE_PORT")?.unwrap_or(3000),
            },
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("OBJECT_STORE_STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            database_url: args
                .database_url
                .or_else(|| lookup("OBJECT_STORE_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/meta/object_store.db".into()),
            copy_workers: match args.copy_workers {
                Some(workers) => workers,
                None => parse_var(&lookup, "OBJECT_STORE_COPY_WORKERS")?
                    .unwrap_or(DEFAULT_WORKER_COUNT),
            },
            min_part_size: match args.min_part_size {
                Some(size) => size,
                None => parse_var(&lookup, "OBJECT_STORE_MIN_PART_SIZE")?
                    .unwrap_or(DEFAULT_MIN_PART_SIZE),
            },
        };
        Ok(cfg)
    }

    /// Validated copy options; fails on a zero worker count or a part size
    /// below the service minimum.
    pub fn copy_options(&self) -> Result<CopyOptions> {
        CopyOptions::new(self.copy_workers, self.min_part_size)
            .context("invalid copy configuration")
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {} value `{}`", name, value))
        })
        .transpose()
}
