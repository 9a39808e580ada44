//! Application settings: defaults, then an optional TOML file, then
//! environment variables, then command-line flags.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Read when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_FILE: &str = "carprice.toml";
pub const MODEL_URL_ENV: &str = "CARPRICE_MODEL_URL";
pub const EXPECTED_SHA256_ENV: &str = "CARPRICE_EXPECTED_SHA256";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file '{path}': {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error(
        "No model source configured. Set model_url in carprice.toml, export CARPRICE_MODEL_URL, or pass --model."
    )]
    MissingModelUrl,
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    /// URL of the raw artifact file, or a local path.
    pub model_url: String,
    /// Hex SHA-256 of the artifact. Empty disables the check.
    pub expected_sha256: String,
    pub timeout_secs: u64,
    pub feature_names_path: PathBuf,
    pub categorical_columns_path: PathBuf,
    pub band_percent: u32,
    pub currency: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_url: String::new(),
            expected_sha256: String::new(),
            timeout_secs: 60,
            feature_names_path: PathBuf::from("feature_names.json"),
            categorical_columns_path: PathBuf::from("cat_cols.json"),
            band_percent: 18,
            currency: "SAR".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Toml {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Loads the explicit config file if given, else `carprice.toml` if it
    /// exists, else the defaults; then applies the process environment.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    /// Overrides fields from `lookup`, ignoring unset or blank variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_blank(MODEL_URL_ENV) {
            self.model_url = url;
        }
        if let Some(sha) = non_blank(EXPECTED_SHA256_ENV) {
            self.expected_sha256 = sha;
        }
    }

    /// Applies command-line overrides.
    pub fn apply_flags(&mut self, model: Option<&str>, sha256: Option<&str>) {
        if let Some(model) = model {
            self.model_url = model.to_string();
        }
        if let Some(sha256) = sha256 {
            self.expected_sha256 = sha256.to_string();
        }
    }

    /// The configured model source, required before anything is loaded.
    pub fn model_source(&self) -> Result<&str, ConfigError> {
        let source = self.model_url.trim();
        if source.is_empty() {
            Err(ConfigError::MissingModelUrl)
        } else {
            Ok(source)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".to_string()));
        }
        if self.band_percent >= 100 {
            return Err(ConfigError::Invalid(format!(
                "band_percent must be below 100, got {}",
                self.band_percent
            )));
        }
        let sha = self.expected_sha256.trim();
        if !sha.is_empty() && (sha.len() != 64 || !sha.chars().all(|c| c.is_ascii_hexdigit())) {
            return Err(ConfigError::Invalid(
                "expected_sha256 must be 64 hexadecimal characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_calculator() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert_eq!(config.band_percent, 18);
        assert_eq!(config.currency, "SAR");
        assert_eq!(config.feature_names_path, PathBuf::from("feature_names.json"));
        assert!(matches!(config.model_source(), Err(ConfigError::MissingModelUrl)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_files_keep_defaults_for_the_rest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("carprice.toml");
        fs::write(
            &path,
            "model_url = \"https://models.example/car.json\"\ntimeout_secs = 5\n",
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.model_source().unwrap(), "https://models.example/car.json");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.band_percent, 18);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = AppConfig::from_toml_str("modle_url = \"x\"", Path::new("carprice.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Toml { .. }));
    }

    #[test]
    fn environment_then_flags_override_the_file() {
        let mut config = AppConfig {
            model_url: "from-file".to_string(),
            ..AppConfig::default()
        };
        let vars: HashMap<&str, &str> = [(MODEL_URL_ENV, "from-env"), (EXPECTED_SHA256_ENV, "  ")].into();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.model_url, "from-env");
        assert_eq!(config.expected_sha256, "");

        config.apply_flags(Some("from-flag"), None);
        assert_eq!(config.model_url, "from-flag");
    }

    #[test]
    fn malformed_settings_are_reported() {
        let config = AppConfig {
            expected_sha256: "abc".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = AppConfig {
            timeout_secs: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
