//! Storage error taxonomy.
//!
//! Every engine operation fails with a [`StoreError`]. The command layer turns
//! each one into an error envelope using its `Display` text, so the messages
//! here are what clients see.

use crate::grid::GridError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Empty key or missing value
    #[error("{0}")]
    Validation(String),

    /// Operation on an absent key
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The allocator found no run of empty cells
    #[error("No available space in database ({needed} cells requested)")]
    Capacity { needed: usize },

    /// Malformed symbol sequence or compressed stream
    #[error("Invalid format: {0}")]
    Format(String),

    /// Bad or missing auth token
    #[error("Authentication failed")]
    Auth,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn empty_key() -> Self {
        StoreError::Validation("Key cannot be null or empty".to_string())
    }
}

impl From<GridError> for StoreError {
    fn from(err: GridError) -> Self {
        StoreError::Internal(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
