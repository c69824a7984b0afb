//! Error types for zarrkit operations

use thiserror::Error;

/// Main error type for store, codec, array and hierarchy operations
#[derive(Error, Debug)]
pub enum ZarrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Data type error: {0}")]
    Dtype(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Store capability error: {0}")]
    StoreCapability(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Incomplete archive: {0}")]
    IncompleteArchive(String),

    #[error("Hierarchy conflict: {0}")]
    HierarchyConflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ZarrError {
    /// True for errors caused by how the engine was called or configured,
    /// false for errors that indicate damaged or unreadable stored data.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            ZarrError::Shape(_)
                | ZarrError::Dtype(_)
                | ZarrError::StoreCapability(_)
                | ZarrError::HierarchyConflict(_)
                | ZarrError::AlreadyExists(_)
                | ZarrError::InvalidKey(_)
                | ZarrError::OutOfBounds(_)
                | ZarrError::Configuration(_)
        )
    }

    /// Process exit code: 2 for usage errors, 1 for storage-integrity errors
    pub fn exit_code(&self) -> i32 {
        if self.is_usage_error() {
            2
        } else {
            1
        }
    }
}

/// Specialized Result type for zarrkit operations
pub type Result<T> = std::result::Result<T, ZarrError>;

impl From<serde_json::Error> for ZarrError {
    fn from(err: serde_json::Error) -> Self {
        ZarrError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ZarrError::Shape("a".into()).exit_code(), 2);
        assert_eq!(ZarrError::StoreCapability("a".into()).exit_code(), 2);
        assert_eq!(ZarrError::Codec("a".into()).exit_code(), 1);
        assert_eq!(ZarrError::IncompleteArchive("a".into()).exit_code(), 1);
    }

    #[test]
    fn test_message_names_key() {
        let err = ZarrError::KeyNotFound("foo/zarr.json".into());
        assert_eq!(err.to_string(), "Key not found: foo/zarr.json");
    }
}
