// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Persistence for serverless runtime documents.
//!
//! A [`DocumentStore`] assigns ids on allocation and otherwise behaves like a
//! keyed map of [`RuntimeDocument`]s. Two implementations ship here: a
//! directory of JSON files for the daemon and an in-memory map for tests.

mod file;
mod memory;

use async_trait::async_trait;
use pe_core::{RuntimeBody, RuntimeDocument, RuntimeId};
use pe_error::{EngineError, ErrorCode};
use std::path::PathBuf;

pub use file::FileDocumentStore;
pub use memory::InMemoryDocumentStore;

/// Failure of a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No document with this id exists.
    #[error("document {0} not found")]
    NotFound(RuntimeId),

    /// Filesystem failure.
    #[error("store i/o on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored document could not be (de)serialized.
    #[error("document {id} is not valid JSON: {source}")]
    Serde {
        /// Document id.
        id: RuntimeId,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => {
                EngineError::new(ErrorCode::NotFound, format!("Serverless Runtime {id} not found"))
                    .with_context("runtime_id", id)
            }
            StoreError::Serde { id, .. } => {
                tracing::error!(error = %err, "stored document is unreadable");
                EngineError::new(ErrorCode::StoreError, "document store failure")
                    .with_context("runtime_id", id)
                    .with_source(err)
            }
            StoreError::Io { .. } => {
                tracing::error!(error = %err, "document store i/o failed");
                EngineError::new(ErrorCode::StoreError, "document store failure").with_source(err)
            }
        }
    }
}

/// Keyed storage for runtime documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new document and return it with its freshly assigned id.
    async fn allocate(&self, body: RuntimeBody) -> Result<RuntimeDocument, StoreError>;

    /// Fetch a document, `None` if the id is unknown.
    async fn load(&self, id: RuntimeId) -> Result<Option<RuntimeDocument>, StoreError>;

    /// Replace the body of an existing document.
    async fn update(&self, document: &RuntimeDocument) -> Result<(), StoreError>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, id: RuntimeId) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err: EngineError = StoreError::NotFound(7).into();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.context["runtime_id"], 7);
    }

    #[test]
    fn io_maps_to_store_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EngineError = StoreError::io("/var/lib/x", io).into();
        assert_eq!(err.code, ErrorCode::StoreError);
        assert_eq!(err.http_status(), 500);
        assert!(!err.message.contains("/var/lib/x"));
        let dto = pe_error::EngineErrorDto::from(&err);
        assert!(!serde_json::to_string(&dto).unwrap().contains("/var/lib"));
    }
}
