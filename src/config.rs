use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::error::RetryPolicy;

/// Runtime configuration. Everything has a default; API credentials and the
/// data directory can be overridden through the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub data_dir: PathBuf,
    /// Search results per page (API maximum is 100).
    pub page_size: u32,
    /// Pages fetched per keyword before moving on.
    pub max_pages_per_keyword: u32,
    /// Concurrent detail-page fetches.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Checkpoint save cadence in committed records. 1 = after every record;
    /// larger values trade re-fetch work after a crash for less I/O.
    pub checkpoint_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            data_dir: PathBuf::from("data"),
            page_size: 100,
            max_pages_per_keyword: 10,
            concurrency: 8,
            retry: RetryPolicy::new(3, Duration::from_millis(2000)),
            checkpoint_every: 1,
        }
    }
}

impl Config {
    /// Load config, requiring API credentials from the environment.
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("MEDICOLLECT_CLIENT_ID")
            .context("MEDICOLLECT_CLIENT_ID environment variable must be set")?;
        let client_secret = std::env::var("MEDICOLLECT_CLIENT_SECRET")
            .context("MEDICOLLECT_CLIENT_SECRET environment variable must be set")?;
        let data_dir = std::env::var("MEDICOLLECT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        Ok(Self {
            client_id,
            client_secret,
            data_dir,
            ..Self::default()
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("medicollect.sqlite")
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir.join("checkpoint.json")
    }

    pub fn keywords_dir(&self) -> PathBuf {
        self.data_dir.join("keywords")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.data_dir.join("reports")
    }
}
