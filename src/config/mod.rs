use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Reverse,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::core::utils::{app_data_dir, config_backup_dir_in, config_dir_in, ensure_dir, staging_path};
use crate::domain::PaymentSide;

const CONFIG_FILE: &str = "engine.json";
const BACKUP_EXTENSION: &str = "json";
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Shortfall below a target that still counts as fully paid.
pub const DEFAULT_TOLERANCE: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One tolerance per payment domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tolerances {
    #[serde(default = "Tolerances::default_value")]
    pub expense: Decimal,
    #[serde(default = "Tolerances::default_value")]
    pub customer: Decimal,
    #[serde(default = "Tolerances::default_value")]
    pub invoice: Decimal,
}

impl Tolerances {
    fn default_value() -> Decimal {
        DEFAULT_TOLERANCE
    }

    pub fn uniform(value: Decimal) -> Self {
        Self {
            expense: value,
            customer: value,
            invoice: value,
        }
    }

    pub fn for_side(&self, side: PaymentSide) -> Decimal {
        match side {
            PaymentSide::Supplier => self.expense,
            PaymentSide::Customer => self.customer,
        }
    }
}

impl Default for Tolerances {
    fn default() -> Self {
        Self::uniform(DEFAULT_TOLERANCE)
    }
}

/// How a multi-record change reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// One atomic batch: all records change or none do.
    #[default]
    Batch,
    /// Independent per-record writes; failures are reported and skipped.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub tolerances: Tolerances,
    #[serde(default)]
    pub write_mode: WriteMode,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Tolerances {
            expense,
            customer,
            invoice,
        } = &self.tolerances;
        for (name, value) in [("expense", expense), ("customer", customer), ("invoice", invoice)] {
            if value.is_sign_negative() {
                return Err(ConfigError::Invalid(format!(
                    "{name} tolerance must not be negative (got {value})"
                )));
            }
        }
        Ok(())
    }
}

/// Handles persistence and backup management for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct ConfigManager {
    path: PathBuf,
    backups_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_base_dir(app_data_dir())
    }

    pub fn with_base_dir(base: PathBuf) -> Result<Self, ConfigError> {
        let config_root = config_dir_in(&base);
        ensure_dir(&config_root)?;
        let backups_dir = config_backup_dir_in(&base);
        ensure_dir(&backups_dir)?;
        Ok(Self {
            path: config_root.join(CONFIG_FILE),
            backups_dir,
        })
    }

    pub fn load(&self) -> Result<EngineConfig, ConfigError> {
        let config = if self.path.exists() {
            let data = fs::read_to_string(&self.path)?;
            serde_json::from_str(&data)?
        } else {
            EngineConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &EngineConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let json = serde_json::to_string_pretty(config)?;
        let tmp = staging_path(&self.path);
        write_file(&tmp, &json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn backup(&self, config: &EngineConfig) -> Result<String, ConfigError> {
        ensure_dir(&self.backups_dir)?;
        let timestamp = Utc::now().format(BACKUP_TIMESTAMP_FORMAT).to_string();
        let name = format!("engine_{}.{}", timestamp, BACKUP_EXTENSION);
        let json = serde_json::to_string_pretty(config)?;
        write_file(&self.backups_dir.join(&name), &json)?;
        Ok(name)
    }

    pub fn list_backups(&self) -> Result<Vec<String>, ConfigError> {
        if !self.backups_dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.backups_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(BACKUP_EXTENSION) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                entries.push(name.to_string());
            }
        }
        entries.sort_by_key(|name| Reverse(parse_timestamp(name)));
        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let raw = name
        .strip_prefix("engine_")?
        .strip_suffix(&format!(".{}", BACKUP_EXTENSION))?;
    chrono::NaiveDateTime::parse_from_str(raw, BACKUP_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

fn write_file(path: &Path, data: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(data.as_bytes())?;
    file.flush()?;
    Ok(())
}
