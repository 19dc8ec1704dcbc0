use crate::{
    ClassificationRequest, ClassificationResult, EncodedImage, ImageClassifier, ProviderError,
};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_SCORE_PATH: &str = "score";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AzureMlConfig {
    pub base_url: String,
    pub api_key: String,
    pub score_path: String,
    pub timeout: Duration,
}

impl AzureMlConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            score_path: DEFAULT_SCORE_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.score_path.trim_start_matches('/')
        )
    }
}

/// Client for a hosted scoring endpoint that takes `{"image": <base64>}`.
#[derive(Clone)]
pub struct AzureMlProvider {
    client: Client,
    cfg: Arc<AzureMlConfig>,
}

impl AzureMlProvider {
    pub fn new(cfg: AzureMlConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .build()
            .map_err(ProviderError::Transport)?;
        Ok(Self {
            client,
            cfg: Arc::new(cfg),
        })
    }
}

#[async_trait::async_trait]
impl ImageClassifier for AzureMlProvider {
    async fn score(&self, image: &EncodedImage) -> Result<ClassificationResult, ProviderError> {
        let url = self.cfg.endpoint();
        debug!(%url, encoded_len = image.len(), "sending scoring request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.cfg.api_key)
            .json(&ClassificationRequest { image })
            .send()
            .await
            .map_err(ProviderError::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(ProviderError::Transport)?;
        if !status.is_success() {
            warn!(status = status.as_u16(), %body, "scoring request rejected");
        }
        interpret(status, body)
    }
}

/// Maps a scoring response onto a result. The hosted scoring script returns
/// `json.dumps(...)`, so the payload may arrive as a JSON string holding the object.
pub fn interpret(status: StatusCode, body: String) -> Result<ClassificationResult, ProviderError> {
    if !status.is_success() {
        return Err(service(status, body));
    }
    if body.trim().is_empty() {
        return Err(ProviderError::EmptyResponse);
    }
    let mut value: Value =
        serde_json::from_str(&body).map_err(|_| ProviderError::EmptyResponse)?;
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner).map_err(|_| ProviderError::EmptyResponse)?;
    }

    match &value {
        Value::Null => return Err(ProviderError::EmptyResponse),
        Value::Object(map) if !map.contains_key("class_name") => {
            if let Some(detail) = map.get("error") {
                let detail = match detail {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Err(service(status, detail));
            }
        }
        _ => {}
    }

    let result: ClassificationResult = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "scoring response does not match schema");
            return Err(service(status, body));
        }
    };
    if !result.confidence.is_finite() || !(0.0..=1.0).contains(&result.confidence) {
        warn!(confidence = result.confidence, "confidence out of range");
        return Err(service(status, body));
    }
    Ok(result)
}

fn service(status: StatusCode, body: String) -> ProviderError {
    ProviderError::Service {
        status: status.as_u16(),
        body,
    }
}
