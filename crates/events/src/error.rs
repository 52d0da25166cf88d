//! Error types for the event core.

use crate::alarm::AlarmId;
use thiserror::Error;

/// Result type alias for event-core operations.
pub type EventResult<T> = Result<T, EventError>;

/// Errors returned by the event core.
///
/// Most operations here cannot fail: signaling and lifecycle calls are
/// infallible by contract, and resource exhaustion during creation is
/// treated as fatal rather than surfaced.
#[derive(Debug, Error)]
pub enum EventError {
    /// Asked to disarm an alarm that is not currently armed.
    #[error("alarm {0} is not armed")]
    AlarmNotFound(AlarmId),
}
