//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [matching]
//! high_threshold = 0.85
//!
//! [model]
//! dir = "/var/lib/ledgerlens"
//! autosave_every = 100
//!
//! [resolver]
//! credit_card_payment_type = "LOAN"
//!
//! [regions.credit_card_keywords]
//! UK = ["barclaycard payment"]
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use ledgerlens_core::TransactionType;
use ledgerlens_matching::{MatcherConfig, SemanticConfig};
use ledgerlens_model::MODEL_FILE_NAME;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::BreakerConfig;
use crate::collaborators::RegionKeywordConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatcherConfig,
    pub semantic: SemanticConfig,
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub resolver: ResolverConfig,
    pub breaker: BreakerConfig,
    pub regions: RegionKeywordConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `category_model.json`. Defaults to the platform
    /// data directory.
    pub dir: Option<PathBuf>,
    /// Save after every N training samples; 0 disables autosave.
    pub autosave_every: u64,
    /// Keep the model in memory only.
    pub in_memory: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dir: None,
            autosave_every: 100,
            in_memory: false,
        }
    }
}

impl ModelConfig {
    /// Full path of the model file, or `None` when persistence is off or no
    /// data directory can be determined.
    pub fn model_path(&self) -> Option<PathBuf> {
        if self.in_memory {
            return None;
        }
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?.join("models"),
        };
        Some(dir.join(MODEL_FILE_NAME))
    }
}

pub fn default_data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("com", "ledgerlens", "LedgerLens")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum ML confidence for the prediction to take part in fusion.
    pub ml_acceptance_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ml_acceptance_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// A rule is accepted only when its confidence is strictly above this.
    pub rule_floor: f64,
    /// Minimum detector confidence for the ML category rule.
    pub ml_rule_threshold: f64,
    /// Type assigned to credit card and loan payments out of a depository
    /// account.
    pub credit_card_payment_type: TransactionType,
    /// Enables the payment-correction category rule.
    pub payment_correction: bool,
    /// Time limit for one call into the free-text parser or taxonomy mapper.
    pub collaborator_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            rule_floor: 0.5,
            ml_rule_threshold: 0.7,
            credit_card_payment_type: TransactionType::Loan,
            payment_correction: false,
            collaborator_timeout_ms: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: EngineConfig = toml::from_str(content)?;
        config.regions = config.regions.with_default_regions().normalized();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                tracing::info!("loaded configuration from {}", path.display());
                Self::from_toml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no configuration at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Range checks. An empty list means the configuration is usable.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut unit = |name: &str, value: f64| {
            if !(0.0..=1.0).contains(&value) {
                errors.push(format!("{name} must be within [0, 1], got {value}"));
            }
        };
        let m = &self.matching;
        unit("matching.high_threshold", m.high_threshold);
        unit("matching.medium_threshold", m.medium_threshold);
        unit("matching.low_threshold", m.low_threshold);
        unit("matching.perfect_token_floor", m.perfect_token_floor);
        unit("semantic.threshold", self.semantic.threshold);
        unit("semantic.max_context_boost", self.semantic.max_context_boost);
        unit("detection.ml_acceptance_threshold", self.detection.ml_acceptance_threshold);
        unit("resolver.rule_floor", self.resolver.rule_floor);
        unit("resolver.ml_rule_threshold", self.resolver.ml_rule_threshold);

        if !(m.low_threshold <= m.medium_threshold && m.medium_threshold <= m.high_threshold) {
            errors.push("matching thresholds must satisfy low <= medium <= high".to_string());
        }
        if [m.affix_weight, m.edit_weight, m.token_weight].iter().any(|w| *w < 0.0) {
            errors.push("matching weights must not be negative".to_string());
        }
        let b = &self.breaker;
        if !(0.0..=100.0).contains(&b.failure_rate_threshold) {
            errors.push(format!(
                "breaker.failure_rate_threshold must be within [0, 100], got {}",
                b.failure_rate_threshold
            ));
        }
        if b.sliding_window_size == 0 {
            errors.push("breaker.sliding_window_size must be at least 1".to_string());
        }
        if b.call_timeout_ms == 0 {
            errors.push("breaker.call_timeout_ms must be at least 1".to_string());
        }
        if self.resolver.collaborator_timeout_ms == 0 {
            errors.push("resolver.collaborator_timeout_ms must be at least 1".to_string());
        }
        if self.regions.default_region.is_empty() {
            errors.push("regions.default_region must not be empty".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.resolver.credit_card_payment_type, TransactionType::Loan);
        assert_eq!(config.model.autosave_every, 100);
        assert_eq!(config.breaker.minimum_calls, 5);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [matching]
            high_threshold = 0.9

            [resolver]
            credit_card_payment_type = "EXPENSE"
            payment_correction = true

            [model]
            dir = "/tmp/ledgerlens-test"

            [regions.credit_card_keywords]
            au = ["CommBank Card Payment"]
            "#,
        )
        .unwrap();
        assert_eq!(config.matching.high_threshold, 0.9);
        assert_eq!(config.matching.low_threshold, 0.55);
        assert_eq!(config.resolver.credit_card_payment_type, TransactionType::Expense);
        assert!(config.resolver.payment_correction);
        assert_eq!(
            config.model.model_path(),
            Some(PathBuf::from("/tmp/ledgerlens-test").join(MODEL_FILE_NAME))
        );
        assert_eq!(
            config.regions.credit_card_keywords["AU"],
            vec!["commbank card payment".to_string()]
        );
        assert!(config.regions.credit_card_keywords.contains_key("US"));
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = EngineConfig::from_toml(
            r#"
            [matching]
            low_threshold = 0.95

            [breaker]
            sliding_window_size = 0

            [resolver]
            collaborator_timeout_ms = 0
            "#,
        )
        .unwrap_err();
        match err {
            ConfigError::Invalid(errors) => {
                assert!(errors.iter().any(|e| e.contains("low <= medium <= high")));
                assert!(errors.iter().any(|e| e.contains("sliding_window_size")));
                assert!(errors.iter().any(|e| e.contains("collaborator_timeout_ms")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            EngineConfig::from_toml("[matching\nhigh = "),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn in_memory_model_has_no_path() {
        let model = ModelConfig {
            in_memory: true,
            ..Default::default()
        };
        assert_eq!(model.model_path(), None);
    }
}
