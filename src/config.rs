use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Base URL of the local Ollama server. AI features degrade gracefully
    /// when it is not running.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    #[serde(default = "default_generate_model")]
    pub generate_model: String,

    /// Seconds between full background cycles (fetch -> embed -> cluster -> score).
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    /// Minimum milliseconds between requests to the same host.
    #[serde(default = "default_host_min_interval")]
    pub host_min_interval_ms: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("storystream");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("storystream.db").to_string_lossy().to_string()
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_generate_model() -> String {
    "llama3.2".to_string()
}

fn default_cycle_interval() -> u64 {
    120
}

fn default_host_min_interval() -> u64 {
    3000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            ollama_url: default_ollama_url(),
            embed_model: default_embed_model(),
            generate_model: default_generate_model(),
            cycle_interval_secs: default_cycle_interval(),
            host_min_interval_ms: default_host_min_interval(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("storystream")
            .join("config.toml")
    }
}
