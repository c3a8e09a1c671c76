//! Run-level errors
//!
//! Item-level lookup failures never surface here; the pipeline absorbs
//! them. What remains ends the run.

use crate::services::{ChartError, CredentialError};
use crate::workflow::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    /// Rejected before any work started
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] chartmeta_common::Error),
}

pub type RunResult<T> = Result<T, RunError>;
