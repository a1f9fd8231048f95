//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::app_config::AppConfig;
use crate::domain::learning::{DEFAULT_HALF_LIFE_HOURS, RankingWeights, half_life_from_hours};

/// Environment variable overriding the config directory
pub const CONFIG_DIR_ENV: &str = "LOREBANK_CONFIG_DIR";

const CONFIG_KEYS: [&str; 10] = [
    "app.name",
    "app.version",
    "app.model",
    "database.path",
    "database.max_connections",
    "ranking.relevance_weight",
    "ranking.recency_weight",
    "ranking.importance_weight",
    "ranking.half_life_hours",
    "expiry.sweep_interval_secs",
];

/// Lorebank configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppSection,
    pub database: DatabaseSection,
    pub ranking: RankingSection,
    pub expiry: ExpirySection,
}

/// Identity of the application this process acts for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub version: String,
    /// Model label recorded in the app's configuration record
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// Defaults to `lorebank.db` inside the config directory
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSection {
    pub relevance_weight: f64,
    pub recency_weight: f64,
    pub importance_weight: f64,
    pub half_life_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirySection {
    /// Seconds between background sweeps; 0 disables the sweeper
    pub sweep_interval_secs: u64,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model: None,
        }
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

impl Default for RankingSection {
    fn default() -> Self {
        let weights = RankingWeights::default();
        Self {
            relevance_weight: weights.relevance,
            recency_weight: weights.recency,
            importance_weight: weights.importance,
            half_life_hours: DEFAULT_HALF_LIFE_HOURS,
        }
    }
}

impl Default for ExpirySection {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("lorebank")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or the defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.app.name.trim().is_empty() {
            return Err(anyhow!("app.name must not be blank"));
        }
        if self.app.version.trim().is_empty() {
            return Err(anyhow!("app.version must not be blank"));
        }
        if self.database.max_connections == 0 {
            return Err(anyhow!("database.max_connections must be at least 1"));
        }
        self.ranking_weights()?;
        Ok(())
    }

    /// Resolved database file path
    pub fn database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::config_dir()?.join("lorebank.db")),
        }
    }

    /// Ranking weights described by the `ranking` section
    pub fn ranking_weights(&self) -> anyhow::Result<RankingWeights> {
        let weights = RankingWeights::new(
            self.ranking.relevance_weight,
            self.ranking.recency_weight,
            self.ranking.importance_weight,
        )
        .with_half_life_hours(self.ranking.half_life_hours)
        .context("Invalid ranking.half_life_hours")?;
        weights
            .validate()
            .context("Invalid ranking configuration")?;
        Ok(weights)
    }

    /// Sweep interval, or `None` when the background sweeper is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.expiry.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// The configuration record this process upserts for its app
    pub fn app_config(&self) -> AppConfig {
        let config = AppConfig::new(&self.app.name, &self.app.version);
        match &self.app.model {
            Some(model) => config.with_model(model),
            None => config,
        }
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "app.name" => Ok(self.app.name.clone()),
            "app.version" => Ok(self.app.version.clone()),
            "app.model" => Ok(self
                .app
                .model
                .clone()
                .unwrap_or_else(|| "(not set)".to_string())),

            "database.path" => Ok(self.database_path()?.display().to_string()),
            "database.max_connections" => Ok(self.database.max_connections.to_string()),

            "ranking.relevance_weight" => Ok(self.ranking.relevance_weight.to_string()),
            "ranking.recency_weight" => Ok(self.ranking.recency_weight.to_string()),
            "ranking.importance_weight" => Ok(self.ranking.importance_weight.to_string()),
            "ranking.half_life_hours" => Ok(self.ranking.half_life_hours.to_string()),

            "expiry.sweep_interval_secs" => Ok(self.expiry.sweep_interval_secs.to_string()),

            _ => Err(unknown_key(key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "app.name" | "app.version" => {
                let value = value.trim();
                if value.is_empty() {
                    return Err(anyhow!("{} must not be blank", key));
                }
                if key == "app.name" {
                    self.app.name = value.to_string();
                } else {
                    self.app.version = value.to_string();
                }
            }
            "app.model" => {
                let value = value.trim();
                self.app.model = (!value.is_empty()).then(|| value.to_string());
            }

            "database.path" => {
                let value = value.trim();
                self.database.path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "database.max_connections" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_connections value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("max_connections must be at least 1"));
                }
                self.database.max_connections = max;
            }

            "ranking.relevance_weight" | "ranking.recency_weight" | "ranking.importance_weight" => {
                let weight: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid weight value: {}", value))?;
                if !weight.is_finite() || weight < 0.0 {
                    return Err(anyhow!("Weights must be finite and non-negative"));
                }
                match key {
                    "ranking.relevance_weight" => self.ranking.relevance_weight = weight,
                    "ranking.recency_weight" => self.ranking.recency_weight = weight,
                    _ => self.ranking.importance_weight = weight,
                }
            }
            "ranking.half_life_hours" => {
                let hours: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid half_life_hours value: {}", value))?;
                half_life_from_hours(hours).context("Invalid half_life_hours value")?;
                self.ranking.half_life_hours = hours;
            }

            "expiry.sweep_interval_secs" => {
                self.expiry.sweep_interval_secs = value
                    .parse()
                    .with_context(|| format!("Invalid sweep_interval_secs value: {}", value))?;
            }

            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        CONFIG_KEYS
            .iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn unknown_key(key: &str) -> anyhow::Error {
    anyhow!(
        "Unknown configuration key: {}. Use `lorebank config list` to see available keys.",
        key
    )
}
