use crate::models::Channel;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:db/mail_cache.db?mode=rwc".to_string(),
            busy_timeout_ms: 5000,
            max_connections: 1,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    pub credentials_path: String,
    pub incremental_size: u32,
    pub historical_page_size: u32,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            credentials_path: "conf/credentials.json".to_string(),
            incremental_size: 50,
            historical_page_size: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub enabled: bool,
    pub url: String,
    pub embed_model: String,
    pub summary_model: String,
    pub extract_model: String,
    pub timeout_secs: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:11434".to_string(),
            embed_model: "nomic-embed-text".to_string(),
            summary_model: "llama3.1:8b-instruct-q4_K_M".to_string(),
            extract_model: "qwen2.5:1.5b".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Jobs allowed to run at once against the inference service.
    pub workers: usize,
    pub queue_capacity: usize,
    /// Maximum characters of text sent for embedding.
    pub char_budget: usize,
    pub summary_language: String,
    pub summary_lines: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            char_budget: 4000,
            summary_language: "Japanese".to_string(),
            summary_lines: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub initial_delay_secs: u64,
    /// Sweep again every `interval_secs` when set. A single sweep otherwise.
    pub interval_secs: Option<u64>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 30,
            interval_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { limit: 10 }
    }
}

impl Config {
    pub fn load() -> Self {
        match Self::load_from("settings.toml") {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("Using default settings: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.gmail.incremental_size, 50);
        assert_eq!(config.gmail.historical_page_size, 500);
        assert_eq!(config.enrichment.char_budget, 4000);
        assert_eq!(config.search.limit, 10);
        assert!(config.retention.interval_secs.is_none());
        assert!(config.channels.is_empty());
    }

    #[test]
    fn channels_keep_file_order() {
        let config: Config = toml::from_str(
            r#"
            [ollama]
            embed_model = "mxbai-embed-large"

            [[channels]]
            name = "GitHub"
            query = "sender LIKE '%github.com%'"
            ttl_days = 30

            [[channels]]
            name = "Urgent"
            query = "importance >= 4"
            "#,
        )
        .unwrap();

        assert_eq!(config.ollama.embed_model, "mxbai-embed-large");
        assert_eq!(config.ollama.url, "http://localhost:11434");
        let names: Vec<_> = config.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["GitHub", "Urgent"]);
        assert_eq!(config.channels[0].ttl_days, 30);
        assert_eq!(config.channels[1].ttl_days, 0);
    }
}
