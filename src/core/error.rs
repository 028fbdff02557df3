//! Failure taxonomy for a refresh cycle.
//!
//! Fund-level errors ([`EstimateError`]) are contained to a single fund and
//! never abort the batch. Batch-level errors ([`RefreshError`]) short-circuit
//! before any fund is attempted.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimateError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("holdings empty for fund {0}")]
    HoldingsEmpty(String),
    #[error("no quote coverage for fund {0}")]
    NoQuoteCoverage(String),
    #[error("no official source for fund {0}")]
    OfficialUnavailable(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl EstimateError {
    /// Transient collaborator failures trip the process-wide backoff gate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EstimateError::NetworkFailure(_) | EstimateError::Timeout(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RefreshError {
    #[error("network backoff active for another {0:?}")]
    BackoffActive(Duration),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
