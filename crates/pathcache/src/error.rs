//! Cache error types.

use thiserror::Error;

use crate::key::Attribute;

/// Errors that can occur when building keys or talking to the store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An attribute resolver failed while computing its value.
    ///
    /// Raised before any backend interaction: no partial key is built.
    #[error("resolver for {attribute} failed: {message}")]
    Resolver {
        /// The attribute whose resolver failed.
        attribute: Attribute,
        /// The resolver's error, stringified.
        message: String,
    },

    /// The backing store failed on get/set/delete.
    #[error("store operation failed: {0}")]
    Store(String),

    /// The key spec and the supplied values cannot form a valid key or prefix.
    #[error("invalid key spec: {0}")]
    KeySpec(String),
}

impl CacheError {
    /// Create a store error from any displayable cause.
    pub fn store(cause: impl std::fmt::Display) -> Self {
        Self::Store(cause.to_string())
    }
}
