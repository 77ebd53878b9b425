//! Error types for dexstore
//!
//! Provides a unified error type for the record store and both index families.

use thiserror::Error;

/// Result type alias using DexError
pub type Result<T> = std::result::Result<T, DexError>;

/// Unified error type for dexstore operations
#[derive(Debug, Error)]
pub enum DexError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // On-disk Format Errors
    // -------------------------------------------------------------------------
    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Key not found: {0}")]
    NotFound(i64),

    #[error("Duplicate key: {0}")]
    DuplicateKey(i64),

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DexError {
    /// Shorthand used by the codecs when a field fails to parse
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        DexError::Corruption(msg.into())
    }
}
