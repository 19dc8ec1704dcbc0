use providers::azureml::{AzureMlConfig, DEFAULT_SCORE_PATH};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::acquisition::{DEFAULT_JPEG_QUALITY, DEFAULT_THRESHOLD_BYTES};

pub const ENV_PREFIX: &str = "COIN_CLASSIFIER";

#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub image: ImageConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_score_path")]
    pub score_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NormalizationMode {
    #[default]
    Recompress,
    Passthrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub normalization: NormalizationMode,
    #[serde(default = "default_threshold")]
    pub threshold_bytes: usize,
    #[serde(default = "default_quality")]
    pub jpeg_quality: u8,
    #[serde(default)]
    pub discard_captures: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            normalization: NormalizationMode::default(),
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            discard_captures: false,
        }
    }
}

fn default_score_path() -> String {
    DEFAULT_SCORE_PATH.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_threshold() -> usize {
    DEFAULT_THRESHOLD_BYTES
}

fn default_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("service.base_url must be an http(s) URL, got {0:?}")]
    BaseUrl(String),
    #[error("service.api_key is empty; set COIN_CLASSIFIER_SERVICE__API_KEY or service.api_key")]
    MissingApiKey,
    #[error("service.timeout_secs must be greater than zero")]
    ZeroTimeout,
    #[error("image.jpeg_quality must be within 1..=100, got {0}")]
    JpegQuality(u8),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.service.base_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::BaseUrl(self.service.base_url.clone()));
        }
        if self.service.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.service.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if !(1..=100).contains(&self.image.jpeg_quality) {
            return Err(ConfigError::JpegQuality(self.image.jpeg_quality));
        }
        Ok(())
    }

    pub fn provider_config(&self) -> AzureMlConfig {
        AzureMlConfig {
            base_url: self.service.base_url.trim().to_string(),
            api_key: self.service.api_key.trim().to_string(),
            score_path: self.service.score_path.clone(),
            timeout: Duration::from_secs(self.service.timeout_secs),
        }
    }

    /// Serializable view with the API key masked.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(key) = value.pointer_mut("/service/api_key") {
            *key = serde_json::Value::String("***".into());
        }
        value
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("service", &self.service)
            .field("image", &self.image)
            .finish()
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("score_path", &self.score_path)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    load_from(path, None)
}

/// `env` replaces the process environment as the override source when given.
fn load_from(
    path: Option<&str>,
    env: Option<config::Map<String, String>>,
) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(env),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppConfig {
        AppConfig {
            service: ServiceConfig {
                base_url: "https://scoring.example.test/".into(),
                api_key: "secret".into(),
                score_path: default_score_path(),
                timeout_secs: 30,
            },
            image: ImageConfig::default(),
        }
    }

    #[test]
    fn image_defaults() {
        let image = ImageConfig::default();
        assert_eq!(image.threshold_bytes, 1_048_576);
        assert_eq!(image.jpeg_quality, 80);
        assert_eq!(image.normalization, NormalizationMode::Recompress);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = sample();
        assert!(cfg.validate().is_ok());

        cfg.service.api_key = "  ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::MissingApiKey));

        let mut cfg = sample();
        cfg.service.base_url = "scoring.example.test".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::BaseUrl(_))));

        let mut cfg = sample();
        cfg.image.jpeg_quality = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::JpegQuality(0)));

        let mut cfg = sample();
        cfg.service.timeout_secs = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn api_key_never_shows_in_debug_or_redacted_view() {
        let cfg = sample();
        assert!(!format!("{cfg:?}").contains("secret"));
        let redacted = cfg.redacted();
        assert_eq!(redacted["service"]["api_key"], "***");
        assert_eq!(redacted["service"]["base_url"], "https://scoring.example.test/");
    }

    #[test]
    fn provider_config_carries_timeout() {
        let cfg = sample().provider_config();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.endpoint(), "https://scoring.example.test/score");
    }

    #[test]
    fn loads_toml_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.toml");
        std::fs::write(
            &path,
            r#"
            [service]
            base_url = "https://scoring.example.test"
            api_key = "from-file"
            timeout_secs = 5

            [image]
            normalization = "passthrough"
            "#,
        )
        .unwrap();
        let cfg = load_from(Some(path.to_str().unwrap()), Some(config::Map::new())).unwrap();
        assert_eq!(cfg.service.api_key, "from-file");
        assert_eq!(cfg.service.score_path, "score");
        assert_eq!(cfg.service.timeout_secs, 5);
        assert_eq!(cfg.image.normalization, NormalizationMode::Passthrough);
        assert_eq!(cfg.image.threshold_bytes, DEFAULT_THRESHOLD_BYTES);
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.toml");
        std::fs::write(
            &path,
            r#"
            [service]
            base_url = "https://scoring.example.test"
            timeout_secs = 5
            "#,
        )
        .unwrap();
        let env = config::Map::from([
            ("COIN_CLASSIFIER_SERVICE__API_KEY".to_string(), "env-key".to_string()),
            ("COIN_CLASSIFIER_SERVICE__TIMEOUT_SECS".to_string(), "7".to_string()),
            ("COIN_CLASSIFIER_IMAGE__DISCARD_CAPTURES".to_string(), "true".to_string()),
        ]);
        let cfg = load_from(Some(path.to_str().unwrap()), Some(env)).unwrap();
        assert_eq!(cfg.service.api_key, "env-key");
        assert_eq!(cfg.service.timeout_secs, 7);
        assert!(cfg.image.discard_captures);
        assert_eq!(cfg.service.base_url, "https://scoring.example.test");
    }

    #[test]
    fn missing_api_key_is_rejected_after_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("classifier.toml");
        std::fs::write(&path, "[service]\nbase_url = \"https://scoring.example.test\"\n").unwrap();
        let err = load_from(Some(path.to_str().unwrap()), Some(config::Map::new())).unwrap_err();
        assert!(err.to_string().contains("api_key"), "{err}");
    }
}
