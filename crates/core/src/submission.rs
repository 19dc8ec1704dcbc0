//! One classification submission at a time per session.
//!
//! A submission moves `Idle -> Encoding -> Requesting -> Succeeded | Failed -> Idle`.
//! [`Session::begin`] hands out a [`Pending`] permit; each step consumes the previous
//! value, and dropping the permit at any point (completion, error, cancellation)
//! returns the session to `Idle`.

use providers::azureml::AzureMlProvider;
use providers::{ClassificationResult, EncodedImage, ImageClassifier, ProviderError};
use std::error::Error as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::acquisition::{self, AcquisitionError, ImageSource, Normalizer};
use crate::config::AppConfig;
use crate::present::Presenter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    Encoding,
    Requesting,
    Succeeded,
    Failed,
}

impl SubmissionState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SubmissionState::Encoding | SubmissionState::Requesting)
    }
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("a submission is already in flight")]
    AlreadyInFlight,
    #[error("submission was cancelled")]
    Cancelled,
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl SubmitError {
    /// Text handed to the error presenter.
    pub fn user_message(&self) -> String {
        match self {
            SubmitError::AlreadyInFlight => "A classification is already in progress".to_string(),
            SubmitError::Cancelled => "Classification cancelled".to_string(),
            SubmitError::Acquisition(e) => format!("Error loading image: {e}"),
            SubmitError::Provider(ProviderError::EmptyResponse) => {
                "Empty response body".to_string()
            }
            SubmitError::Provider(ProviderError::Service { body, .. }) => {
                format!("Classification failed: {body}")
            }
            SubmitError::Provider(ProviderError::Transport(e)) => {
                // reqwest's Display already appends the source, so the first line
                // carries only the kind and the URL.
                let kind = if e.is_timeout() {
                    "request timed out"
                } else if e.is_connect() {
                    "connection failed"
                } else if e.is_decode() {
                    "response could not be decoded"
                } else {
                    "request failed"
                };
                let url = e.url().map(|u| format!(" ({u})")).unwrap_or_default();
                let cause = e
                    .source()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                format!("Error: {kind}{url}\nCause: {cause}")
            }
        }
    }
}

struct Shared {
    classifier: Arc<dyn ImageClassifier>,
    normalizer: Arc<dyn Normalizer>,
    state: Arc<watch::Sender<SubmissionState>>,
    discard_captures: bool,
}

impl Shared {
    fn begin(&self) -> Result<Pending, SubmitError> {
        let mut started = false;
        self.state.send_if_modified(|s| {
            if *s == SubmissionState::Idle {
                *s = SubmissionState::Encoding;
                started = true;
            }
            started
        });
        if !started {
            return Err(SubmitError::AlreadyInFlight);
        }
        debug!("submission started");
        Ok(Pending {
            permit: Permit {
                state: self.state.clone(),
            },
            classifier: self.classifier.clone(),
            normalizer: self.normalizer.clone(),
        })
    }

    async fn run(
        &self,
        pending: Pending,
        source: ImageSource,
    ) -> Result<ClassificationResult, SubmitError> {
        let capture = if self.discard_captures {
            source.capture_path().map(Path::to_path_buf)
        } else {
            None
        };
        let encoded = pending.encode(source).await;
        if let Some(path) = capture {
            acquisition::discard_capture_file(&path);
        }
        encoded?.request().await
    }
}

/// Marks the session busy; resets it to `Idle` on drop.
struct Permit {
    state: Arc<watch::Sender<SubmissionState>>,
}

impl Permit {
    fn set(&self, next: SubmissionState) {
        self.state.send_replace(next);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.state.send_replace(SubmissionState::Idle);
    }
}

/// A started submission that has not been encoded yet.
pub struct Pending {
    permit: Permit,
    classifier: Arc<dyn ImageClassifier>,
    normalizer: Arc<dyn Normalizer>,
}

impl Pending {
    pub async fn encode(self, source: ImageSource) -> Result<Encoded, SubmitError> {
        match acquisition::acquire(source, self.normalizer.clone()).await {
            Ok(image) => {
                self.permit.set(SubmissionState::Requesting);
                Ok(Encoded {
                    permit: self.permit,
                    classifier: self.classifier,
                    image,
                })
            }
            Err(e) => {
                warn!(error = %e, "image acquisition failed");
                self.permit.set(SubmissionState::Failed);
                Err(e.into())
            }
        }
    }
}

/// An encoded image ready to be sent.
pub struct Encoded {
    permit: Permit,
    classifier: Arc<dyn ImageClassifier>,
    image: EncodedImage,
}

impl Encoded {
    pub async fn request(self) -> Result<ClassificationResult, SubmitError> {
        let outcome = self.classifier.score(&self.image).await;
        match &outcome {
            Ok(result) => {
                info!(class = %result.class_name, confidence = result.confidence, "classified");
                self.permit.set(SubmissionState::Succeeded);
            }
            Err(e) => {
                warn!(error = %e, "classification failed");
                self.permit.set(SubmissionState::Failed);
            }
        }
        outcome.map_err(SubmitError::from)
    }
}

/// Owns the submission state for one UI session. Dropping it cancels whatever it
/// spawned.
pub struct Session {
    shared: Arc<Shared>,
    current: Mutex<Option<AbortHandle>>,
}

impl Session {
    pub fn new(classifier: Arc<dyn ImageClassifier>, normalizer: Arc<dyn Normalizer>) -> Self {
        Self::with_options(classifier, normalizer, false)
    }

    /// Like [`Session::new`]; `discard_captures` removes `ImageSource::Capture`
    /// files once they have been encoded.
    pub fn with_options(
        classifier: Arc<dyn ImageClassifier>,
        normalizer: Arc<dyn Normalizer>,
        discard_captures: bool,
    ) -> Self {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Self {
            shared: Arc::new(Shared {
                classifier,
                normalizer,
                state: Arc::new(state),
                discard_captures,
            }),
            current: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ProviderError> {
        let provider = AzureMlProvider::new(cfg.provider_config())?;
        Ok(Self::with_options(
            Arc::new(provider),
            acquisition::normalizer_for(&cfg.image),
            cfg.image.discard_captures,
        ))
    }

    pub fn state(&self) -> SubmissionState {
        *self.shared.state.borrow()
    }

    pub fn in_flight(&self) -> bool {
        self.state().is_in_flight()
    }

    /// Receiver for driving the submit affordance; enabled only while `Idle`.
    pub fn subscribe(&self) -> watch::Receiver<SubmissionState> {
        self.shared.state.subscribe()
    }

    pub fn begin(&self) -> Result<Pending, SubmitError> {
        self.shared.begin()
    }

    pub async fn submit(&self, source: ImageSource) -> Result<ClassificationResult, SubmitError> {
        let pending = self.begin()?;
        self.shared.run(pending, source).await
    }

    /// Runs a submission on a task and reports the outcome to `presenter`.
    /// Every error is converted to a message at this boundary; a cancelled
    /// submission reports nothing.
    pub fn spawn(
        &self,
        source: ImageSource,
        presenter: Arc<dyn Presenter>,
    ) -> Result<SubmissionHandle, SubmitError> {
        let pending = self.begin()?;
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            let outcome = shared.run(pending, source).await;
            match &outcome {
                Ok(result) => presenter.show_result(result),
                Err(e) => presenter.show_error(&e.user_message()),
            }
            outcome
        });
        if let Ok(mut current) = self.current.lock() {
            *current = Some(handle.abort_handle());
        }
        Ok(SubmissionHandle { handle })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Ok(mut current) = self.current.lock() {
            if let Some(handle) = current.take() {
                handle.abort();
            }
        }
    }
}

pub struct SubmissionHandle {
    handle: JoinHandle<Result<ClassificationResult, SubmitError>>,
}

impl SubmissionHandle {
    pub async fn join(self) -> Result<ClassificationResult, SubmitError> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SubmitError::Cancelled),
        }
    }

    /// Aborts the submission and waits until its state has been released.
    pub async fn cancel(self) {
        self.handle.abort();
        let _ = self.handle.await;
        debug!("submission cancelled");
    }
}
