use anyhow::Context;
use dirs::home_dir;
use downloader::extract::ytdlp::config::YtDlpConfig;
use downloader::session::DownloadConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub ytdlp: YtDlpConfig,
}

#[derive(Debug, Clone)]
pub struct SettingManager {
    inner: Arc<RwLock<Settings>>,
    settings_path: PathBuf,
}

pub fn default_settings_path() -> PathBuf {
    let home_dir = home_dir().unwrap_or_default();
    home_dir.join(".ytbatch/settings.yaml")
}

impl SettingManager {
    /// Loads the settings file, writing one with defaults if there is none yet.
    pub async fn load(p: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = p.unwrap_or_else(default_settings_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Could not create settings directory {}", parent.to_string_lossy())
            })?;
        }
        let settings = load_settings(&path).await?;
        Ok(Self {
            inner: Arc::new(RwLock::new(settings)),
            settings_path: path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub async fn read(&self) -> RwLockReadGuard<Settings> {
        self.inner.read().await
    }

    pub async fn write(&self, settings: Settings) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(&settings)?;
        log::info!("Yaml serialization of settings succesful, writing settings to file");
        tokio::fs::write(&self.settings_path, yaml)
            .await
            .with_context(|| {
                format!(
                    "Could not write settings file {}",
                    self.settings_path.to_string_lossy()
                )
            })?;
        log::info!(
            "Settings file written to {}",
            self.settings_path.to_string_lossy()
        );
        log::debug!("Overwriting inner settings, new value: {:?}", settings);
        let mut guard = self.inner.write().await;
        *guard = settings;
        Ok(())
    }
}

async fn load_settings(p: &Path) -> anyhow::Result<Settings> {
    let file_exists = tokio::fs::try_exists(p).await.unwrap_or(false);
    if file_exists {
        log::info!("Found settings file at {}, reading...", p.to_string_lossy());
        let file = tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("Could not read settings file {}", p.to_string_lossy()))?;
        let settings: Settings = serde_yaml::from_str(&file)
            .with_context(|| format!("Invalid settings file {}", p.to_string_lossy()))?;
        log::debug!("Settings loaded: {:?}", settings);
        return Ok(settings);
    }
    log::info!(
        "No settings file found at {}, creating...",
        p.to_string_lossy()
    );
    let settings = Settings::default();
    let settings_str = serde_yaml::to_string(&settings)?;
    tokio::fs::write(p, settings_str)
        .await
        .with_context(|| format!("Could not create settings file {}", p.to_string_lossy()))?;
    Ok(settings)
}
