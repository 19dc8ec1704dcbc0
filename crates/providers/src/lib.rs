//! Wire model and client abstraction for hosted image classifiers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod azureml;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("empty response body")]
    EmptyResponse,
    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl ProviderError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Transport(e) if e.is_timeout())
    }
}

/// Base64 text of an image as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedImage(String);

impl EncodedImage {
    pub fn new(base64: String) -> Self {
        Self(base64)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Serialize)]
pub struct ClassificationRequest<'a> {
    pub image: &'a EncodedImage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub class_name: String,
    pub confidence: f64,
    pub all_probabilities: HashMap<String, f64>,
}

impl ClassificationResult {
    /// Confidence as a whole percentage, rounded to nearest.
    pub fn confidence_percent(&self) -> u32 {
        (self.confidence * 100.0).round().clamp(0.0, 100.0) as u32
    }

    /// Labels ordered from most to least probable.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .all_probabilities
            .iter()
            .map(|(label, p)| (label.as_str(), *p))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranked
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Detected: {}\nConfidence: {}%",
            self.class_name,
            self.confidence_percent()
        )
    }
}

#[async_trait::async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn score(&self, image: &EncodedImage) -> Result<ClassificationResult, ProviderError>;
}
