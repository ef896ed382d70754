use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::features::FeatureConfig;
use crate::regime::{ClassifierConfig, PersistenceConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub symbols: Vec<String>,
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
    pub persistence: PersistenceConfig,
    pub attestation: AttestationConfig,
    pub store: StoreConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["SPY".to_string()],
            features: FeatureConfig::default(),
            classifier: ClassifierConfig::default(),
            persistence: PersistenceConfig::default(),
            attestation: AttestationConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for result in [
            self.features.validate(),
            self.classifier.validate(),
            self.persistence.validate(),
        ] {
            if let Err(mut e) = result {
                errors.append(&mut e);
            }
        }

        if self.attestation.agent_id.trim().is_empty() {
            errors.push("attestation: agent_id must not be empty".to_string());
        }
        if self.attestation.reattest_every_bars == Some(0) {
            errors.push("attestation: reattest_every_bars must be > 0 when set".to_string());
        }
        if !self.store.database_url.starts_with("sqlite:") {
            errors.push("store: database_url must be a sqlite: URL".to_string());
        }
        if self.symbols.is_empty() {
            errors.push("symbols must not be empty".to_string());
        }
        if self.symbols.iter().any(|s| s.trim().is_empty()) {
            errors.push("symbols must not contain blank entries".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttestationConfig {
    pub agent_id: String,
    /// File holding the hex signing secret
    pub key_path: Option<PathBuf>,
    /// Re-sign the held regime every N bars; `None` signs transitions only
    pub reattest_every_bars: Option<u32>,
}

impl Default for AttestationConfig {
    fn default() -> Self {
        Self {
            agent_id: "regime-agent".to_string(),
            key_path: None,
            reattest_every_bars: Some(20),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:./regime_predictions.db".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.features.baseline_window, 252);
        assert_eq!(config.persistence.persistence_days, 5);
        assert_eq!(config.attestation.reattest_every_bars, Some(20));
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = RuntimeConfig::default();
        config.features.macd_fast = 30;
        config.persistence.persistence_days = 0;
        config.attestation.agent_id = " ".to_string();
        config.symbols.clear();

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("macd_fast")));
        assert!(errors.iter().any(|e| e.contains("persistence_days")));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = RuntimeConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: RuntimeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
