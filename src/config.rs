use std::path::{Path, PathBuf};

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "OctScan";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CONFIG_FILE_NAME: &str = "octscan.json";
pub const DATABASE_FILE_NAME: &str = "octscan.db";
pub const UPLOADS_DIR_NAME: &str = "uploads";
pub const MODELS_DIR_NAME: &str = "models";
pub const MODEL_FILE_NAME: &str = "oct_classifier.json";

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
/// Predictions whose top probability falls below this are reported as `Unknown`.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.90;
pub const DEFAULT_PREDICT_TIMEOUT_SECS: u64 = 30;
/// Multipart body limit for `/api/predict` (image plus form overhead).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 60 * 1024 * 1024;

pub const ENV_DATA_DIR: &str = "OCTSCAN_DATA_DIR";
pub const ENV_BIND: &str = "OCTSCAN_BIND";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "OCTSCAN_CONFIDENCE_THRESHOLD";
pub const ENV_BOOTSTRAP_MODEL: &str = "OCTSCAN_BOOTSTRAP_MODEL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Get the application data directory.
/// `$OCTSCAN_DATA_DIR` when set, otherwise ~/OctScan/.
pub fn app_data_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(APP_NAME))
}

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "octscan=info,octscan_lib=info,tower_http=warn"
}

// ═══════════════════════════════════════════
// AppConfig
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Resolved at load time, never read from the file.
    #[serde(skip)]
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub confidence_threshold: f32,
    pub predict_timeout_secs: u64,
    pub max_upload_bytes: usize,
    /// Write an untrained artifact when none exists instead of refusing to start.
    pub bootstrap_model: bool,
    pub retrain: RetrainConfig,
    pub schedule: ScheduleConfig,
    pub actors: Vec<ActorConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            predict_timeout_secs: DEFAULT_PREDICT_TIMEOUT_SECS,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            bootstrap_model: false,
            retrain: RetrainConfig::default(),
            schedule: ScheduleConfig::default(),
            actors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainConfig {
    pub epochs: usize,
    pub validation_split: f32,
    pub learning_rate: f32,
    pub batch_size: usize,
    /// How far candidate held-out accuracy may fall below the active model's.
    pub regression_tolerance: f32,
    pub seed: u64,
}

impl Default for RetrainConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            validation_split: 0.2,
            learning_rate: 0.01,
            batch_size: 16,
            regression_tolerance: 0.05,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Three-letter or full weekday name (`sun`, `Monday`, ...).
    pub weekday: String,
    pub hour: u32,
    pub minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weekday: "sun".to_string(),
            hour: 0,
            minute: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn parsed_weekday(&self) -> Result<Weekday, ConfigError> {
        self.weekday
            .parse::<Weekday>()
            .map_err(|_| ConfigError::Invalid {
                field: "schedule.weekday",
                reason: format!("'{}' is not a weekday", self.weekday),
            })
    }
}

/// Static bearer token entry for the shipped auth gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub token: String,
    pub username: String,
    /// `doctor` or `technician`.
    pub role: String,
}

impl AppConfig {
    /// Load `octscan.json` from the data dir (if present) and apply env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let data_dir = app_data_dir()?;
        Self::load_from(&data_dir)
    }

    pub fn load_from(data_dir: &Path) -> Result<Self, ConfigError> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str::<AppConfig>(&raw)
                .map_err(|source| ConfigError::Parse { path: path.clone(), source })?
        } else {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            AppConfig::default()
        };
        config.data_dir = data_dir.to_path_buf();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(bind) = std::env::var(ENV_BIND) {
            self.bind_addr = bind;
        }
        if let Ok(raw) = std::env::var(ENV_CONFIDENCE_THRESHOLD) {
            self.confidence_threshold = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "confidence_threshold",
                reason: format!("'{raw}' is not a number"),
            })?;
        }
        if let Ok(raw) = std::env::var(ENV_BOOTSTRAP_MODEL) {
            self.bootstrap_model = matches!(raw.trim(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid {
                field: "confidence_threshold",
                reason: format!("{} is outside [0, 1]", self.confidence_threshold),
            });
        }
        if self.predict_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "predict_timeout_secs",
                reason: "must be positive".into(),
            });
        }
        if self.retrain.epochs == 0 || self.retrain.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "retrain",
                reason: "epochs and batch_size must be positive".into(),
            });
        }
        if !(0.0..1.0).contains(&self.retrain.validation_split) {
            return Err(ConfigError::Invalid {
                field: "retrain.validation_split",
                reason: format!("{} is outside [0, 1)", self.retrain.validation_split),
            });
        }
        if !(self.retrain.learning_rate > 0.0 && self.retrain.learning_rate.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "retrain.learning_rate",
                reason: "must be a positive number".into(),
            });
        }
        if self.schedule.hour > 23 || self.schedule.minute > 59 {
            return Err(ConfigError::Invalid {
                field: "schedule",
                reason: format!("{:02}:{:02} is not a time of day", self.schedule.hour, self.schedule.minute),
            });
        }
        self.schedule.parsed_weekday()?;
        Ok(())
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join(UPLOADS_DIR_NAME)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join(MODELS_DIR_NAME)
    }

    pub fn model_path(&self) -> PathBuf {
        self.models_dir().join(MODEL_FILE_NAME)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}
