//! Error types for the synchronization engine
//!
//! Every fatal condition of a refresh cycle is a [`SyncError`] variant. The
//! scheduling loop wraps the first one it sees into a [`FatalError`] tagged
//! with the phase it came from; the binary turns that into exit status 1.

use std::fmt;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Peripheral Errors
// ----------------------------------------------------------------------------

/// Failures reported by a peripheral service backend
#[derive(Error, Debug)]
pub enum PeripheralError {
    #[error("BLE adapter not available: {0}")]
    AdapterUnavailable(String),

    #[error("Failed to register GATT service: {0}")]
    RegistrationFailed(String),

    #[error("Failed to start advertising: {0}")]
    AdvertisingFailed(String),

    #[error("Service handle is not registered")]
    NotRegistered,

    #[error("Slot index {index} out of range (service has {slots} slots)")]
    SlotOutOfRange { index: usize, slots: usize },

    #[error("Value too large for slot {index}: {size} bytes (capacity: {capacity})")]
    ValueTooLarge {
        index: usize,
        size: usize,
        capacity: usize,
    },
}

// ----------------------------------------------------------------------------
// Engine Errors
// ----------------------------------------------------------------------------

/// Errors produced while refreshing, chunking or publishing a snapshot
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Primary source unavailable: {reason}")]
    SourceUnavailable { reason: String },

    #[error("Fallback source unavailable: {reason}")]
    FallbackUnavailable { reason: String },

    #[error("Payload needs {chunks} chunks but only {slots} slots are available")]
    CapacityExceeded { chunks: usize, slots: usize },

    #[error("Chunk capacity must be greater than zero")]
    InvalidCapacity,

    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Peripheral error: {0}")]
    Peripheral(#[from] PeripheralError),

    #[error("Liveness notification failed: {0}")]
    Liveness(String),
}

impl SyncError {
    /// Build a [`SyncError::SourceUnavailable`] from any displayable cause
    pub fn source_unavailable(reason: impl fmt::Display) -> Self {
        Self::SourceUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Build a [`SyncError::FallbackUnavailable`] from any displayable cause
    pub fn fallback_unavailable(reason: impl fmt::Display) -> Self {
        Self::FallbackUnavailable {
            reason: reason.to_string(),
        }
    }
}

/// Result alias used across the core crate
pub type Result<T> = std::result::Result<T, SyncError>;

// ----------------------------------------------------------------------------
// Fatal Errors
// ----------------------------------------------------------------------------

/// The part of the engine lifecycle a fatal error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Refresh,
    Chunking,
    Publish,
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Startup => write!(f, "startup"),
            Phase::Refresh => write!(f, "refresh"),
            Phase::Chunking => write!(f, "chunking"),
            Phase::Publish => write!(f, "publish"),
            Phase::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// An error that ends the engine run; the process must exit non-zero
#[derive(Error, Debug)]
#[error("fatal {phase} error in cycle {cycle}: {source}")]
pub struct FatalError {
    pub phase: Phase,
    pub cycle: u64,
    #[source]
    pub source: SyncError,
}

impl FatalError {
    pub fn new(phase: Phase, cycle: u64, source: SyncError) -> Self {
        Self {
            phase,
            cycle,
            source,
        }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        1
    }
}
