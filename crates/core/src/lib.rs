//! Core library: configuration, image acquisition, submission flow, presentation.

pub mod acquisition;
pub mod config;
pub mod present;
pub mod submission;

pub use acquisition::{ImageSource, Normalizer};
pub use submission::{Session, SubmissionState, SubmitError};
