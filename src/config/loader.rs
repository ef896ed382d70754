use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use super::runtime::RuntimeConfig;
use crate::attest::KeyPair;
use crate::error::RegimeError;

pub const ENV_PREFIX: &str = "REGIME";
pub const SIGNING_KEY_ENV: &str = "REGIME_SIGNING_KEY";

/// Loads `.env`, then layers `REGIME__*` variables over the optional TOML file
/// at `path`. Anything left unset keeps its default.
pub fn load(path: &Path) -> Result<RuntimeConfig> {
    if let Ok(env_file) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", env_file.display());
    }

    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("symbols")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("reading configuration from {}", path.display()))?;

    let runtime: RuntimeConfig = settings
        .try_deserialize()
        .context("parsing configuration")?;
    runtime.validate().map_err(RegimeError::Config)?;

    info!(
        "Configuration loaded: {} symbols, baseline {} bars, persistence {} bars",
        runtime.symbols.len(),
        runtime.features.baseline_window,
        runtime.persistence.persistence_days
    );
    Ok(runtime)
}

/// Resolves the signing key from `REGIME_SIGNING_KEY`, falling back to the
/// configured key file.
pub fn load_signing_key(runtime: &RuntimeConfig) -> Result<KeyPair> {
    if let Ok(secret) = std::env::var(SIGNING_KEY_ENV) {
        return KeyPair::from_secret_hex(&secret)
            .with_context(|| format!("parsing {}", SIGNING_KEY_ENV));
    }
    let path = runtime.attestation.key_path.as_deref().with_context(|| {
        format!(
            "no signing key: set {} or attestation.key_path (see `keygen`)",
            SIGNING_KEY_ENV
        )
    })?;
    KeyPair::from_secret_file(path).with_context(|| format!("loading key file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regime.toml");
        std::fs::write(
            &path,
            r#"
symbols = ["SPY", "QQQ"]

[persistence]
persistence_days = 3

[attestation]
agent_id = "desk-1"
"#,
        )
        .unwrap();

        let runtime = load(&path).unwrap();
        assert_eq!(runtime.symbols, vec!["SPY".to_string(), "QQQ".to_string()]);
        assert_eq!(runtime.persistence.persistence_days, 3);
        assert_eq!(runtime.attestation.agent_id, "desk-1");
        // untouched sections keep their defaults
        assert_eq!(runtime.features.baseline_window, 252);
        assert_eq!(runtime.attestation.reattest_every_bars, Some(20));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(runtime.features, crate::features::FeatureConfig::default());
    }

    #[test]
    fn test_invalid_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regime.toml");
        std::fs::write(&path, "[features]\nmacd_fast = 40\n").unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("macd_fast"));
    }

    #[test]
    fn test_key_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("agent.key");
        let keys = KeyPair::generate();
        keys.write_secret_file(&key_path).unwrap();

        let mut runtime = RuntimeConfig::default();
        runtime.attestation.key_path = Some(key_path);
        if std::env::var(SIGNING_KEY_ENV).is_err() {
            let loaded = load_signing_key(&runtime).unwrap();
            assert_eq!(loaded.public_key_hex(), keys.public_key_hex());
        }
    }
}
