//! Monitor configuration.
//! Loaded from a JSON file (path from `SOUNDWATCH_CONFIG`, default
//! `soundwatch.json`). Every section has defaults, so a partial file is fine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use crate::audio::CaptureConstraints;
use crate::classifier::SoundId;
use crate::detection::AcceptanceBand;
use crate::notify::Severity;
use crate::reminders::TimeOfDay;

pub const CONFIG_PATH_ENV: &str = "SOUNDWATCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "soundwatch.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sounds: Vec<SoundConfig>,
    pub classifier: ClassifierConfig,
    pub notifications: NotificationConfig,
    pub resilience: ResilienceConfig,
    pub capture: CaptureConstraints,
    pub reminders: ReminderConfig,
    pub logging: LoggingConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sounds: vec![SoundConfig::door_lock(), SoundConfig::water_sound()],
            classifier: ClassifierConfig::default(),
            notifications: NotificationConfig::default(),
            resilience: ResilienceConfig::default(),
            capture: CaptureConstraints::default(),
            reminders: ReminderConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// One tracked sound class and its notification policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoundConfig {
    pub id: SoundId,
    /// Model base URL; `model.json` and `metadata.json` live beneath it.
    pub model_url: String,
    /// Engine-side acceptance probability.
    pub probability_threshold: f32,
    /// Confidence band that raises a notification. `None` tracks only.
    pub band: Option<AcceptanceBand>,
    /// Minimum seconds between two notifications for this sound. 0 disables.
    #[serde(default)]
    pub cooldown_secs: u64,
    pub title: String,
    pub severity: Severity,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl SoundConfig {
    pub fn door_lock() -> Self {
        Self {
            id: SoundId::DoorLock,
            model_url: "https://teachablemachine.withgoogle.com/models/4JaX5pjX6/".into(),
            probability_threshold: 0.70,
            band: None,
            cooldown_secs: 30,
            title: "Door Locked".into(),
            severity: Severity::Info,
            active: true,
        }
    }

    pub fn water_sound() -> Self {
        Self {
            id: SoundId::WaterSound,
            model_url: "https://teachablemachine.withgoogle.com/models/HMHHWzV40/".into(),
            probability_threshold: 0.70,
            band: Some(AcceptanceBand {
                low: 70.0,
                high: 100.0,
            }),
            cooldown_secs: 30,
            title: "Water Running".into(),
            severity: Severity::Info,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Fetch `metadata.json` to locate the background/target score indices.
    pub prefetch_metadata: bool,
    pub http_timeout_secs: u64,
    pub overlap_factor: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            prefetch_metadata: true,
            http_timeout_secs: 15,
            overlap_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub icon_default: String,
    pub icon_warning: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 1000,
            icon_default: "/icons/water-icon.png".into(),
            icon_warning: "/icons/key-icon.png".into(),
            badge: "/icons/notification-badge.png".into(),
            vibrate: vec![200, 100, 200],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub health_check_interval_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Delay before the best-effort capture restart after a cancelled unload.
    pub unload_restart_delay_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: 30,
            max_attempts: 3,
            retry_delay_ms: 5000,
            unload_restart_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    pub database_path: PathBuf,
    pub storage_key: String,
    pub key_check_enabled: bool,
    pub hydration_enabled: bool,
    pub morning_key_check: TimeOfDay,
    pub evening_key_check: TimeOfDay,
    pub hydration_interval_mins: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("soundwatch.db"),
            storage_key: "customReminders".into(),
            key_check_enabled: true,
            hydration_enabled: true,
            morning_key_check: TimeOfDay::new_unchecked(8, 0),
            evening_key_check: TimeOfDay::new_unchecked(18, 0),
            hydration_interval_mins: 120,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config IO error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl ConfigError {
    /// The file does not exist; the normal first run.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ConfigError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl MonitorConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: MonitorConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from [`config_path`]. Falls back to defaults when the file is
    /// missing or invalid; the error is handed back so the caller can log it
    /// once tracing is up.
    pub fn load_or_default() -> (Self, PathBuf, Option<ConfigError>) {
        let path = config_path();
        match Self::load_from_file(&path) {
            Ok(config) => (config, path, None),
            Err(e) => (Self::default(), path, Some(e)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = Vec::with_capacity(self.sounds.len());
        for sound in &self.sounds {
            if seen.contains(&sound.id) {
                return Err(ConfigError::Invalid(format!("duplicate sound id {}", sound.id)));
            }
            seen.push(sound.id);

            if let Some(band) = sound.band {
                band.validate()
                    .map_err(|e| ConfigError::Invalid(format!("{}: {e}", sound.id)))?;
            }
            if !(0.0..=1.0).contains(&sound.probability_threshold) {
                return Err(ConfigError::Invalid(format!(
                    "{}: probability_threshold {} outside [0, 1]",
                    sound.id, sound.probability_threshold
                )));
            }
        }
        if self.resilience.health_check_interval_secs == 0 {
            return Err(ConfigError::Invalid("health_check_interval_secs must be > 0".into()));
        }
        if self.reminders.hydration_interval_mins == 0 {
            return Err(ConfigError::Invalid("hydration_interval_mins must be > 0".into()));
        }
        Ok(())
    }

    pub fn sound(&self, id: SoundId) -> Option<&SoundConfig> {
        self.sounds.iter().find(|s| s.id == id)
    }
}

/// `SOUNDWATCH_CONFIG` when set, otherwise `soundwatch.json` in the working directory.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn default_true() -> bool {
    true
}
