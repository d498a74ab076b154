use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub labels: LabelsConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Fixed poll period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Most-recent-N message fetch cap per cycle. The listing is deliberately
    /// not filtered by processed status; idempotency is enforced per message.
    /// If this is smaller than the inter-poll arrival rate, messages can be
    /// missed - size it for the mailbox's traffic.
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    /// Case-insensitive substrings matched against subject + snippet
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_results: default_max_results(),
            keywords: default_keywords(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsConfig {
    #[serde(default = "default_parent_label")]
    pub parent: String,
    #[serde(default = "default_promising_label")]
    pub promising: String,
    #[serde(default = "default_not_promising_label")]
    pub not_promising: String,
    #[serde(default = "default_processed_label")]
    pub processed: String,
}

impl LabelsConfig {
    /// The four labels the coordinator guarantees to exist, creation order
    /// parent-first so Gmail renders the hierarchy correctly.
    pub fn required(&self) -> [&str; 4] {
        [
            &self.parent,
            &self.promising,
            &self.not_promising,
            &self.processed,
        ]
    }

    pub fn for_classification(&self, classification: crate::models::Classification) -> &str {
        match classification {
            crate::models::Classification::Promising => &self.promising,
            crate::models::Classification::NotPromising => &self.not_promising,
        }
    }
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            parent: default_parent_label(),
            promising: default_promising_label(),
            not_promising: default_not_promising_label(),
            processed: default_processed_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Bounded request timeout for the evaluation call, distinct from the
    /// poll interval - the call may take multiple seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            request_timeout_secs: default_request_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_interval_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_max_results() -> u32 {
    20
}

fn default_keywords() -> Vec<String> {
    vec![
        "internship".to_string(),
        "intern".to_string(),
        "research intern/ internship".to_string(),
        "summer internship".to_string(),
        "winter internship".to_string(),
        "research application".to_string(),
    ]
}

fn default_parent_label() -> String {
    "Internship".to_string()
}

fn default_promising_label() -> String {
    "Internship/Promising".to_string()
}

fn default_not_promising_label() -> String {
    "Internship/Not Promising".to_string()
}

fn default_processed_label() -> String {
    "Internship/Processed".to_string()
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "anthropic/claude-3-sonnet".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.2
}

fn default_store_path() -> String {
    ".internship-triage/processed.db".to_string()
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If file doesn't exist, return default config with warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_ms < 1_000 {
            return Err(TriageError::ConfigError(
                "poll.interval_ms must be at least 1000 (1 second)".to_string(),
            ));
        }

        if self.poll.max_results == 0 {
            return Err(TriageError::ConfigError(
                "poll.max_results must be at least 1".to_string(),
            ));
        }
        if self.poll.max_results > 500 {
            return Err(TriageError::ConfigError(
                "poll.max_results cannot exceed 500 (Gmail API page limit)".to_string(),
            ));
        }

        if self.poll.keywords.is_empty() {
            return Err(TriageError::ConfigError(
                "poll.keywords must contain at least one keyword".to_string(),
            ));
        }

        for (field, value) in [
            ("labels.parent", &self.labels.parent),
            ("labels.promising", &self.labels.promising),
            ("labels.not_promising", &self.labels.not_promising),
            ("labels.processed", &self.labels.processed),
        ] {
            if value.trim().is_empty() {
                return Err(TriageError::ConfigError(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }

        if self.evaluation.request_timeout_secs == 0 {
            return Err(TriageError::ConfigError(
                "evaluation.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.evaluation.temperature) {
            return Err(TriageError::ConfigError(
                "evaluation.temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll.interval_ms, 600_000);
        assert_eq!(config.poll.max_results, 20);
        assert!(config.poll.keywords.contains(&"internship".to_string()));
    }

    #[test]
    fn test_required_labels_order() {
        let labels = LabelsConfig::default();
        let required = labels.required();
        assert_eq!(required[0], "Internship");
        assert_eq!(required[1], "Internship/Promising");
        assert_eq!(required[2], "Internship/Not Promising");
        assert_eq!(required[3], "Internship/Processed");
    }

    #[test]
    fn test_classification_label_mapping() {
        let labels = LabelsConfig::default();
        assert_eq!(
            labels.for_classification(crate::models::Classification::Promising),
            "Internship/Promising"
        );
        assert_eq!(
            labels.for_classification(crate::models::Classification::NotPromising),
            "Internship/Not Promising"
        );
    }

    #[test]
    fn test_validate_rejects_zero_max_results() {
        let mut config = Config::default();
        config.poll.max_results = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_interval() {
        let mut config = Config::default();
        config.poll.interval_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_keywords() {
        let mut config = Config::default();
        config.poll.keywords.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml_uses_defaults() {
        let toml_str = r#"
            [poll]
            max_results = 50
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.poll.max_results, 50);
        assert_eq!(config.poll.interval_ms, 600_000);
        assert_eq!(config.labels.parent, "Internship");
        assert_eq!(config.evaluation.max_tokens, 500);
    }
}
