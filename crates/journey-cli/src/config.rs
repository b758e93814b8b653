//! Configuration loading and management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Account the reporting app belongs to.
    pub account_id: String,
    /// Reporting app.
    pub app_id: String,
    /// Version of the reporting app.
    pub version: String,
    /// Whether sessions come from a release build.
    pub is_release: bool,
    /// Base URL of the ingest service.
    pub ingest_url: String,
    pub request_timeout_secs: u64,
    /// Path to the database file.
    pub database_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            account_id: String::new(),
            app_id: String::new(),
            version: String::new(),
            is_release: false,
            ingest_url: journey_client::DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: journey_client::DEFAULT_TIMEOUT.as_secs(),
            database_path: data_dir.join("journey.db"),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // JOURNEY_ACCOUNT_ID, JOURNEY_INGEST_URL, ...
        figment = figment.merge(Env::prefixed("JOURNEY_"));

        figment.extract()
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Returns the platform-specific config directory for journey.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("journey"))
}

/// Returns the platform-specific data directory for journey.
///
/// On Linux: `~/.local/share/journey`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("journey"))
}
