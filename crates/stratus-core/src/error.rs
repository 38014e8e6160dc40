//! Error types and result aliases shared across the stratus workspace.
//!
//! Variants follow the engine's error policy: malformed records are dropped
//! per-record, transient store errors are retried then degraded to missing
//! metadata, and database integrity errors are fatal for the whole batch so
//! the source message is redelivered.

use std::fmt;

use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

/// The result type used throughout stratus.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stratus operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A raw notification payload could not be decoded into an event.
    #[error("decode error: {message}")]
    Decode {
        /// Description of the malformed input.
        message: String,
    },

    /// An object store call failed.
    #[error("store error: {code} for {operation}: {message}")]
    Storage {
        /// Error code reported by the store, or `"Unknown"`.
        code: String,
        /// The API operation that failed.
        operation: String,
        /// Description of the failure.
        message: String,
    },

    /// The event source queue failed.
    #[error("queue error: {message}")]
    Queue {
        /// Description of the failure.
        message: String,
    },

    /// A database operation failed. Fatal for the containing batch.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration failed.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Serialization or deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// Loading or validating configuration failed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the invalid option.
        message: String,
    },

    /// An inventory manifest or data file was unusable.
    #[error("inventory error in '{file}': {message}")]
    Inventory {
        /// Key of the offending file, or the manifest itself.
        file: String,
        /// Description of the failure.
        message: String,
    },

    /// A requested record was not found.
    #[error("not found: {resource_type} with id {id}")]
    NotFound {
        /// The type of record that was looked up.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Invalid input was provided to an operation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled before completion (deadline or shutdown).
    #[error("cancelled: {message}")]
    Cancelled {
        /// What was in flight when the cancellation happened.
        message: String,
    },
}

impl Error {
    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a storage error without an SDK source.
    #[must_use]
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            code: "Unknown".to_string(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a queue error.
    #[must_use]
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an inventory error scoped to a data file or manifest key.
    #[must_use]
    pub fn inventory(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Inventory {
            file: file.into(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Builds a storage error from an SDK error, capturing the service code
    /// and the name of the API call for the logs.
    pub fn from_sdk<E>(operation: &'static str, err: &SdkError<E>) -> Self
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            code: err.code().unwrap_or("Unknown").to_string(),
            operation: operation.to_string(),
            message: err
                .message()
                .map(ToString::to_string)
                .unwrap_or_else(|| DisplayErrorContext(err).to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
