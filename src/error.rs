//! Error types for the orchestrator

use std::any::Any;
use std::time::Duration;

use genorch_cache::FingerprintError;
use thiserror::Error;

/// Why a generation ended in `FAILED`
///
/// Recorded on the task and delivered through `StatusChanged` events; never
/// returned from [`Orchestrator::start_generation`](crate::Orchestrator::start_generation).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("{0}")]
    Compute(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Generation timed out after {}s", .after.as_secs_f64())]
    TimedOut { after: Duration },

    #[error("Compute function panicked: {0}")]
    Panicked(String),
}

impl GenerationError {
    /// True for user-initiated cancellation and deadline expiry
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::TimedOut { .. })
    }
}

/// Contract violations reported synchronously to the caller
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Failed to fingerprint config: {0}")]
    Fingerprint(#[from] FingerprintError),

    #[error("start_generation must be called from within a Tokio runtime")]
    NoRuntime,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
