use std::env;
use std::path::PathBuf;

use thiserror::Error;

use crate::limits::DEFAULT_UTC_OFFSET_MINUTES;
use crate::window::LabHours;

const WAL_FILE: &str = "labdesk.wal";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("LABDESK_UTC_OFFSET_MINUTES must be a whole number of minutes within ±24h, got {0:?}")]
    BadOffset(String),
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub utc_offset_minutes: i32,
    pub compact_threshold: u64,
    pub seed_file: Option<PathBuf>,
}

impl Config {
    /// Read `LABDESK_*` variables. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let utc_offset_minutes = match var("LABDESK_UTC_OFFSET_MINUTES") {
            Some(raw) => raw
                .trim()
                .parse()
                .ok()
                .filter(|m| LabHours::with_offset_minutes(*m).is_some())
                .ok_or(ConfigError::BadOffset(raw))?,
            None => DEFAULT_UTC_OFFSET_MINUTES,
        };

        Ok(Config {
            data_dir: var("LABDESK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            metrics_port: var("LABDESK_METRICS_PORT").and_then(|s| s.parse().ok()),
            utc_offset_minutes,
            compact_threshold: var("LABDESK_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            seed_file: var("LABDESK_SEED_FILE").map(PathBuf::from),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }

    pub fn lab_hours(&self) -> LabHours {
        LabHours::with_offset_minutes(self.utc_offset_minutes).unwrap_or_default()
    }
}
