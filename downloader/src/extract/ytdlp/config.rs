use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_BINARY: &str = "yt-dlp";
pub const DEFAULT_RETRIES: u32 = 3;

fn default_binary() -> PathBuf {
    PathBuf::from(DEFAULT_BINARY)
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_listing_timeout() -> u64 {
    120
}

fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_sleep_interval() -> u64 {
    1
}

fn default_max_sleep_interval() -> u64 {
    5
}

/// How the yt-dlp binary is invoked. Retries are passed straight through,
/// yt-dlp does its own backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YtDlpConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Placed before yt-dlp's own arguments, e.g. `binary: python3` with `["-m", "yt_dlp"]`.
    #[serde(default)]
    pub launcher_args: Vec<String>,
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: u64,
    #[serde(default = "default_listing_timeout")]
    pub listing_timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retries")]
    pub fragment_retries: u32,
    #[serde(default = "default_retries")]
    pub extractor_retries: u32,
    /// yt-dlp waits a random time between these bounds before each download.
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval_secs: u64,
    #[serde(default = "default_max_sleep_interval")]
    pub max_sleep_interval_secs: u64,
    /// Appended verbatim before the URL.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl YtDlpConfig {
    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            launcher_args: Vec::new(),
            socket_timeout_secs: default_socket_timeout(),
            listing_timeout_secs: default_listing_timeout(),
            retries: DEFAULT_RETRIES,
            fragment_retries: DEFAULT_RETRIES,
            extractor_retries: DEFAULT_RETRIES,
            sleep_interval_secs: default_sleep_interval(),
            max_sleep_interval_secs: default_max_sleep_interval(),
            extra_args: Vec::new(),
        }
    }
}
