use crate::recorder::ActionThresholds;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub history: HistoryConfig,
    #[serde(default)]
    pub thresholds: ActionThresholds,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_rows")]
    pub rows: usize,
    pub file: String,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

fn default_rows() -> usize {
    200
}

fn default_checkpoint_interval() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Config {
            history: HistoryConfig {
                rows: default_rows(),
                file: "/var/lib/roll-history/history.json".to_string(),
                checkpoint_interval_seconds: default_checkpoint_interval(),
            },
            thresholds: ActionThresholds {
                reject: Some(15.0),
                add_header: Some(6.0),
                greylist: Some(4.0),
                ..Default::default()
            },
            logging: Some(LoggingConfig {
                level: "info".to_string(),
            }),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {path}"))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.history.rows == 0 {
            bail!("history.rows must be greater than zero");
        }
        if self.history.checkpoint_interval_seconds == 0 {
            bail!("history.checkpoint_interval_seconds must be greater than zero");
        }
        Ok(())
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.logging
            .as_ref()
            .and_then(|l| l.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info)
    }
}
