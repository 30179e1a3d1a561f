use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A read expected a document that does not exist.
    #[error("Document not found")]
    NotFound,

    /// A collection path had the wrong shape (empty, or an even number of
    /// segments where a collection was expected).
    #[error("Invalid collection path: {0}")]
    InvalidPath(String),

    /// The backing store rejected or lost the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Document (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
