use std::env;
use std::path::PathBuf;

use anyhow::{bail, Result};

/// OAuth credentials for the Drive API. All three fields are required;
/// startup fails before binding the listener if any is missing.
#[derive(Clone, Debug)]
pub struct GoogleDriveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub port: u16,
    /// Parallel match workers per pass. Defaults to available cores.
    pub match_workers: usize,
    /// Candidates dispatched per batch; caps raw bytes resident at once.
    pub batch_size: usize,
    pub drive: GoogleDriveConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let data = env::var("FACEAPP_DATA").unwrap_or_else(|_| "/faceapp-data".to_string());
        let port = env::var("FACEAPP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(9172);
        let match_workers = env::var("FACEAPP_MATCH_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(num_cpus::get);
        let batch_size = env::var("FACEAPP_BATCH_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(30);
        if match_workers == 0 {
            bail!("FACEAPP_MATCH_WORKERS must be at least 1");
        }
        if batch_size == 0 {
            bail!("FACEAPP_BATCH_SIZE must be at least 1");
        }
        let drive = GoogleDriveConfig {
            client_id: require("GOOGLE_CLIENT_ID")?,
            client_secret: require("GOOGLE_CLIENT_SECRET")?,
            refresh_token: require("GOOGLE_REFRESH_TOKEN")?,
        };
        Ok(Self { data: PathBuf::from(data), port, match_workers, batch_size, drive })
    }
}

fn require(key: &str) -> Result<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("required environment variable {} is not set", key),
    }
}
