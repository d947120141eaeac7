use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{self, CUSTOM_KEY, DEFAULT_KEY};
use crate::extract::SubtitleOptions;
use crate::{Error, Result};

pub const DEFAULT_SUBTITLE_LANGUAGES: [&str; 3] = ["en", "en-US", "en-GB"];

fn default_destination() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ytbatch")
}

fn default_quality() -> String {
    DEFAULT_KEY.to_owned()
}

fn default_true() -> bool {
    true
}

fn default_pause_ms() -> u64 {
    1000
}

fn default_languages() -> Vec<String> {
    DEFAULT_SUBTITLE_LANGUAGES
        .iter()
        .map(|lang| lang.to_string())
        .collect()
}

/// Options of one download session, fixed once the session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    /// A catalog key or label, or `custom` together with `custom_format`.
    #[serde(default = "default_quality")]
    pub quality: String,
    #[serde(default)]
    pub custom_format: Option<String>,
    #[serde(default = "default_true")]
    pub download_subtitles: bool,
    #[serde(default)]
    pub embed_subtitles: bool,
    #[serde(default = "default_languages")]
    pub subtitle_languages: Vec<String>,
    /// Idle time between two downloads of a session.
    #[serde(default = "default_pause_ms")]
    pub pause_between_items_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            quality: default_quality(),
            custom_format: None,
            download_subtitles: true,
            embed_subtitles: false,
            subtitle_languages: default_languages(),
            pause_between_items_ms: default_pause_ms(),
        }
    }
}

impl DownloadConfig {
    pub fn is_custom(&self) -> bool {
        self.quality.trim().eq_ignore_ascii_case(CUSTOM_KEY)
    }

    pub fn pause_between_items(&self) -> Duration {
        Duration::from_millis(self.pause_between_items_ms)
    }

    /// The format expression handed to the extractor.
    pub fn format_expression(&self) -> Result<String> {
        if !self.is_custom() {
            return catalog::resolve(self.quality.trim()).map(str::to_owned);
        }
        match self.custom_format.as_deref().map(str::trim) {
            Some(expression) if !expression.is_empty() => Ok(expression.to_owned()),
            _ => Err(Error::InvalidConfig(
                "quality 'custom' requires a custom format expression".to_owned(),
            )),
        }
    }

    /// Languages without blanks and duplicates, in the configured order.
    pub fn subtitle_options(&self) -> SubtitleOptions {
        let mut languages: Vec<String> = Vec::new();
        for lang in self.subtitle_languages.iter().map(|l| l.trim()) {
            if !lang.is_empty() && !languages.iter().any(|known| known == lang) {
                languages.push(lang.to_owned());
            }
        }
        SubtitleOptions {
            download: self.download_subtitles,
            embed: self.download_subtitles && self.embed_subtitles,
            languages,
        }
    }

    /// Checks the config against the urls of a new session and returns the
    /// resolved format expression.
    pub fn validate(&self, urls: &[String]) -> Result<String> {
        let expression = self.format_expression()?;
        if urls.is_empty() {
            return Err(Error::InvalidConfig("no urls given".to_owned()));
        }
        if let Some(position) = urls.iter().position(|url| url.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!(
                "url #{} is empty",
                position + 1
            )));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "destination directory is empty".to_owned(),
            ));
        }
        if self.download_subtitles && self.subtitle_options().languages.is_empty() {
            return Err(Error::InvalidConfig(
                "subtitles are enabled but no subtitle language is set".to_owned(),
            ));
        }
        Ok(expression)
    }
}
