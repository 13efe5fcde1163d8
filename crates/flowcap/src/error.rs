//! Error types for flow enforcement.

use thiserror::Error;

/// Result type for flowcap operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while enforcing information flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// Malformed lattice or sink configuration. Fatal: raised during
    /// policy construction, before any scope can exist.
    #[error("invalid configuration: {reason}")]
    Config {
        /// What was wrong with the configuration.
        reason: String,
    },

    /// A capability level name that is not registered in the lattice.
    #[error("unknown capability level '{name}'")]
    InvalidLevel {
        /// The unregistered level name.
        name: String,
    },

    /// A value's level exceeds the declared ceiling of a sink. The write
    /// never reaches the sink.
    #[error(
        "leak blocked: sink '{sink}' accepts at most '{max_level}', value carries '{owned_level}'"
    )]
    Leak {
        /// The sink that refused the write.
        sink: String,
        /// The level carried by the offending value.
        owned_level: String,
        /// The maximum level the sink accepts.
        max_level: String,
    },

    /// A sink name that was never registered. Fails closed: an unknown
    /// sink accepts nothing.
    #[error("unknown sink '{sink}'")]
    UnknownSink {
        /// The unregistered sink name.
        sink: String,
    },

    /// Declassification refused: missing justification, or the target
    /// level is not strictly below the value's current level.
    #[error("unauthorized declassification: {reason}")]
    UnauthorizedDeclassify {
        /// Why the declassification was refused.
        reason: String,
    },

    /// A fork branch failed (error, panic, or cancellation).
    #[error("branch {index} failed: {message}")]
    Branch {
        /// Zero-based index of the failed branch, in declaration order.
        index: usize,
        /// Description of the failure.
        message: String,
    },

    /// The merge policy could not produce a result from the branch
    /// outcomes it was given.
    #[error("merge failed: {reason}")]
    MergeFailed {
        /// Why the merge failed.
        reason: String,
    },
}

impl FlowError {
    /// Shorthand for a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}
