//! Error types for ifds-engine.
//!
//! Contract violations (an edge propagated outside its runner's unit) are
//! fatal assertion failures, not errors: they indicate a broken
//! resolver/flow-function pairing. The error type here covers the isolated,
//! reporting-side failures that happen after the analysis itself completed.

use thiserror::Error;

/// Main error type for ifds-engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Trace reconstruction hit a reason variant it cannot expand.
    #[error("trace reconstruction cannot expand reason: {0}")]
    UnsupportedReason(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
