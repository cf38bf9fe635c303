//! Error types for CaribouLite data-path operations

use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, SmiError>;

/// Errors that can occur on the chip register bus, the FPGA configurator,
/// the streaming engine or the block queue
#[derive(Debug, Error)]
pub enum SmiError {
    /// Operation issued before `init` (or after `close` / `release`)
    #[error("{what} is not initialized")]
    NotInitialized {
        /// Component that was used
        what: &'static str,
    },

    /// `init` issued twice without an intervening `close`
    #[error("{what} is already initialized")]
    AlreadyInitialized {
        /// Component that was initialized
        what: &'static str,
    },

    /// Endpoint table is full
    #[error("Chip table full ({max} endpoints)")]
    CapacityExceeded {
        /// Table capacity
        max: usize,
    },

    /// Select line already owned by a live endpoint
    #[error("Select line GPIO{line} is already registered")]
    DuplicateSelect {
        /// The contested select line
        line: u8,
    },

    /// Handle does not refer to a live endpoint
    #[error("No chip registered for handle {handle}")]
    NotFound {
        /// Stale or foreign handle
        handle: String,
    },

    /// Physical bus or device I/O failure
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for failure
        reason: String,
    },

    /// Bounded wait exceeded
    #[error("Operation timeout after {duration_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// A conflicting operation is in progress
    #[error("Busy: {operation} in progress")]
    Busy {
        /// Operation holding the resource
        operation: &'static str,
    },

    /// Configuration image rejected before any bus traffic
    #[error("Invalid bitstream: {reason}")]
    InvalidBlob {
        /// Reason for rejection
        reason: String,
    },

    /// Allocation failed or a bounded container is full
    #[error("Out of memory: {reason}")]
    OutOfMemory {
        /// What could not be stored
        reason: String,
    },

    /// Removal from an empty queue
    #[error("Queue is empty")]
    Empty,

    /// Operation not legal in the current state
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Caller-supplied value out of range
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong
        reason: String,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl SmiError {
    /// Create a not-initialized error
    pub const fn not_initialized(what: &'static str) -> Self {
        Self::NotInitialized { what }
    }

    /// Create a not-found error for a handle
    pub fn not_found(handle: impl std::fmt::Display) -> Self {
        Self::NotFound {
            handle: handle.to_string(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    #[allow(clippy::cast_possible_truncation)]
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Create a busy error
    pub const fn busy(operation: &'static str) -> Self {
        Self::Busy { operation }
    }

    /// Create an invalid bitstream error
    pub fn invalid_blob(reason: impl Into<String>) -> Self {
        Self::InvalidBlob {
            reason: reason.into(),
        }
    }

    /// Create an out-of-memory error
    pub fn out_of_memory(reason: impl Into<String>) -> Self {
        Self::OutOfMemory {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Whether the error came from the physical transport
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io { .. })
    }
}
