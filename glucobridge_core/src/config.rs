//! Configuration file support for glucobridge.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/glucobridge/config.toml`.
//! The struct is built once at startup and handed down explicitly; core
//! logic never reads it implicitly.

use crate::basal::PumpImport;
use crate::identifier::{MatchPolicy, DEFAULT_MEAL_WINDOW_SECS};
use crate::{Error, Result};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

const REDACTED: &str = "********";

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub loops: LoopConfig,

    #[serde(default)]
    pub identifier: IdentifierConfig,

    #[serde(default)]
    pub pump_settings: PumpSettingsConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Source account credentials
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .finish()
    }
}

/// Sink profile target
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_profile_name")]
    pub profile_name: String,

    /// Offset used to bucket basal rates into time of day
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            profile_name: default_profile_name(),
            utc_offset_minutes: 0,
        }
    }
}

impl SinkConfig {
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            Error::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

/// Polling cadences and window bounds
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_feed_interval_secs")]
    pub entries_interval_secs: u64,

    #[serde(default = "default_feed_interval_secs")]
    pub treatments_interval_secs: u64,

    #[serde(default = "default_pump_settings_interval_secs")]
    pub pump_settings_interval_secs: u64,

    /// How far back the first cycle looks
    #[serde(default = "default_initial_lookback_minutes")]
    pub initial_lookback_minutes: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            entries_interval_secs: default_feed_interval_secs(),
            treatments_interval_secs: default_feed_interval_secs(),
            pump_settings_interval_secs: default_pump_settings_interval_secs(),
            initial_lookback_minutes: default_initial_lookback_minutes(),
        }
    }
}

impl LoopConfig {
    pub fn entries_interval(&self) -> Duration {
        Duration::from_secs(self.entries_interval_secs)
    }

    pub fn treatments_interval(&self) -> Duration {
        Duration::from_secs(self.treatments_interval_secs)
    }

    pub fn pump_settings_interval(&self) -> Duration {
        Duration::from_secs(self.pump_settings_interval_secs)
    }

    /// Lower bound of the very first fetch window
    pub fn initial_date_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - ChronoDuration::minutes(i64::from(self.initial_lookback_minutes))
    }
}

/// Carb/bolus correlation parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentifierConfig {
    #[serde(default = "default_meal_window_secs")]
    pub meal_window_secs: u64,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            meal_window_secs: default_meal_window_secs(),
        }
    }
}

impl IdentifierConfig {
    pub fn policy(&self) -> MatchPolicy {
        MatchPolicy::with_window_secs(self.meal_window_secs)
    }
}

/// Pump settings import
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PumpSettingsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_true")]
    pub import_basal: bool,

    #[serde(default)]
    pub import_other_settings: bool,
}

impl Default for PumpSettingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            import_basal: true,
            import_other_settings: false,
        }
    }
}

impl PumpSettingsConfig {
    pub fn import(&self) -> PumpImport {
        PumpImport {
            basal: self.import_basal,
            other_settings: self.import_other_settings,
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".local/share"))
            .unwrap_or_else(|_| std::env::temp_dir())
    });
    base.join("glucobridge")
}

fn default_profile_name() -> String {
    "Default".into()
}

fn default_feed_interval_secs() -> u64 {
    300
}

fn default_pump_settings_interval_secs() -> u64 {
    12 * 60 * 60
}

fn default_initial_lookback_minutes() -> u32 {
    60
}

fn default_meal_window_secs() -> u64 {
    DEFAULT_MEAL_WINDOW_SECS
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|_| std::env::temp_dir())
        });
        base.join("glucobridge").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Credentials must be present before any source-backed loop starts
    pub fn validate_source(&self) -> Result<()> {
        if self.source.username.trim().is_empty() {
            return Err(Error::Config("source username is missing".into()));
        }
        if self.source.password.is_empty() {
            return Err(Error::Config("source password is missing".into()));
        }
        Ok(())
    }

    /// The profile loops need a target profile name and a valid offset
    pub fn validate_profile(&self) -> Result<()> {
        if self.sink.profile_name.trim().is_empty() {
            return Err(Error::Config("sink profile_name is missing".into()));
        }
        self.sink.utc_offset()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_source()?;
        self.validate_profile()
    }

    /// Copy safe to print: secrets masked
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if !copy.source.password.is_empty() {
            copy.source.password = REDACTED.into();
        }
        if !copy.source.client_secret.is_empty() {
            copy.source.client_secret = REDACTED.into();
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }
}
