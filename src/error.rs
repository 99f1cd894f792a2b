//! Error types for lease allocation.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants. The allocation entry point
//! ([`LeaseEngine::allocate`](crate::LeaseEngine::allocate)) never surfaces
//! these; it folds every unresolved case into [`NoAssignment`].

use std::time::Duration;

/// Errors that can occur while loading network state or allocating leases.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system I/O error (configuration, topology or store snapshot files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed address, MAC or subnet text.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// A required network property is absent or malformed.
    ///
    /// Aborts descriptor construction for that network only.
    #[error("Network {network}: required field {field} unavailable: {reason}")]
    MissingRequiredField {
        network: String,
        field: &'static str,
        reason: String,
    },

    /// An optional network property could not be fetched or decoded.
    ///
    /// Never leaves the descriptor loader: the field is left absent and
    /// loading continues.
    #[error("Network {network}: optional field {field} unavailable: {reason}")]
    OptionalFieldUnavailable {
        network: String,
        field: &'static str,
        reason: String,
    },

    /// The network has no address range, or every offset in it is taken.
    #[error("Network {network}: address range exhausted")]
    RangeExhausted { network: String },

    /// Concurrent allocators kept winning the conditional pool write.
    #[error("Network {network}: pool write conflicted {attempts} times")]
    AllocationConflict { network: String, attempts: u32 },

    /// The key-value store rejected or failed a call.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A store call or a whole request ran out of time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// Invalid process configuration or topology file.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A specialized Result type for lease operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal outcome when neither static nor dynamic resolution produced an
/// address. The host applies its own fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no address assignment")]
pub struct NoAssignment;
