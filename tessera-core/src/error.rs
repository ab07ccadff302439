//! Error types for TESSERA operations

use thiserror::Error;

/// Storage layer errors.
///
/// Everything a backend or its remote client can report. Missing keys on
/// reads are not errors; backends translate `NotFound` into `Ok(None)`
/// before it reaches the caller of `get`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Item {key} is {size} bytes, exceeding the {limit} byte document limit")]
    ItemTooLarge { key: String, size: usize, limit: usize },

    #[error("Backend request failed with status {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// Returns true when the backend reported a missing key or collection.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// Configuration errors.
///
/// Raised while building a backend from configuration, never from a
/// per-key call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown {kind} type: {type_tag}")]
    UnknownType { kind: String, type_tag: String },

    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Text encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Content is not valid {encoding} text")]
    InvalidText { encoding: String },

    #[error("Content cannot be represented as {encoding}")]
    Unrepresentable { encoding: String },

    #[error("Invalid base64 payload: {reason}")]
    InvalidBase64 { reason: String },

    #[error("Unsupported text encoding: {name}")]
    Unsupported { name: String },
}

/// Master error type for all TESSERA errors.
#[derive(Debug, Clone, Error)]
pub enum TesseraError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),
}

impl TesseraError {
    /// Returns true when this is a storage-level not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }
}

impl From<serde_json::Error> for TesseraError {
    fn from(e: serde_json::Error) -> Self {
        TesseraError::Storage(StorageError::Serialization {
            reason: e.to_string(),
        })
    }
}

/// Result type alias for TESSERA operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_item_too_large() {
        let err = StorageError::ItemTooLarge {
            key: "big".to_string(),
            size: 2_000_000,
            limit: 1_887_436,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("big"));
        assert!(msg.contains("2000000"));
        assert!(msg.contains("1887436"));
    }

    #[test]
    fn test_config_error_display_missing_required() {
        let err = ConfigError::MissingRequired {
            field: "database_name".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Missing required"));
        assert!(msg.contains("database_name"));
    }

    #[test]
    fn test_config_error_display_unknown_type() {
        let err = ConfigError::UnknownType {
            kind: "storage".to_string(),
            type_tag: "s3".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Unknown storage type"));
        assert!(msg.contains("s3"));
    }

    #[test]
    fn test_encoding_error_display_invalid_text() {
        let err = EncodingError::InvalidText {
            encoding: "utf-8".to_string(),
        };
        assert!(format!("{}", err).contains("utf-8"));
    }

    #[test]
    fn test_tessera_error_from_variants() {
        let storage = TesseraError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, TesseraError::Storage(_)));

        let config = TesseraError::from(ConfigError::MissingRequired {
            field: "container_name".to_string(),
        });
        assert!(matches!(config, TesseraError::Config(_)));

        let encoding = TesseraError::from(EncodingError::InvalidBase64 {
            reason: "bad padding".to_string(),
        });
        assert!(matches!(encoding, TesseraError::Encoding(_)));
    }

    #[test]
    fn test_not_found_detection() {
        let err = TesseraError::from(StorageError::NotFound {
            resource: "_raw/a".to_string(),
        });
        assert!(err.is_not_found());
        assert!(!TesseraError::from(StorageError::LockPoisoned).is_not_found());
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let err: TesseraError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(
            err,
            TesseraError::Storage(StorageError::Serialization { .. })
        ));
    }
}
