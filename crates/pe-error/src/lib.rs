// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy with stable error codes for the provision engine.
//!
//! Every engine error carries an [`ErrorCode`] (a machine-readable, stable
//! string tag that also decides the HTTP status of the response), a
//! human-readable message, an optional cause and key-value context. Use the
//! builder returned by [`EngineError::new`] to construct errors fluently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The request itself was malformed or asks for something unsupported.
    Request,
    /// Credentials were missing or rejected.
    Auth,
    /// The external platform failed or never converged.
    Platform,
    /// The runtime document store failed.
    Store,
    /// Configuration errors.
    Config,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Request => "request",
            Self::Auth => "auth",
            Self::Platform => "platform",
            Self::Store => "store",
            Self::Config => "config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serialises to a `SCREAMING_SNAKE_CASE` string that is
/// guaranteed not to change across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The runtime specification failed schema validation.
    InvalidSpecification,
    /// No service template matches the requested flavour tuple.
    TemplateNotFound,
    /// Credentials are missing, malformed or rejected by the platform.
    Unauthenticated,
    /// The platform refused the operation for these credentials.
    Forbidden,
    /// The referenced runtime (or platform resource) does not exist.
    NotFound,
    /// Service instances never became describable within the round budget.
    SynchronizationTimeout,
    /// Any other non-success platform response.
    PlatformError,
    /// The operation is reserved but not implemented.
    NotImplemented,
    /// The document store failed to persist or load a runtime.
    StoreError,
    /// Configuration file or value is invalid.
    ConfigInvalid,
    /// Catch-all for unexpected internal errors.
    Internal,
}

impl ErrorCode {
    /// Returns the broad [`ErrorCategory`] this code belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidSpecification
            | Self::TemplateNotFound
            | Self::NotFound
            | Self::NotImplemented => ErrorCategory::Request,

            Self::Unauthenticated | Self::Forbidden => ErrorCategory::Auth,

            Self::SynchronizationTimeout | Self::PlatformError => ErrorCategory::Platform,

            Self::StoreError => ErrorCategory::Store,

            Self::ConfigInvalid => ErrorCategory::Config,

            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// HTTP status code the transport adapter answers with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidSpecification => 400,
            Self::Unauthenticated => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::TemplateNotFound => 422,
            Self::NotImplemented => 501,
            Self::SynchronizationTimeout => 504,
            Self::PlatformError | Self::StoreError | Self::ConfigInvalid | Self::Internal => 500,
        }
    }

    /// Whether the condition may clear up on its own if the caller retries.
    ///
    /// Only a synchronization timeout describes a platform that may still be
    /// converging; everything else is permanent for the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SynchronizationTimeout)
    }

    /// Stable `&'static str` representation of the code (e.g.
    /// `"TEMPLATE_NOT_FOUND"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSpecification => "INVALID_SPECIFICATION",
            Self::TemplateNotFound => "TEMPLATE_NOT_FOUND",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::SynchronizationTimeout => "SYNCHRONIZATION_TIMEOUT",
            Self::PlatformError => "PLATFORM_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::StoreError => "STORE_ERROR",
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::Internal => "INTERNAL",
        }
    }

    /// Map an HTTP-like status code returned by the platform to an error code.
    ///
    /// Anything that is not an authentication, authorization or existence
    /// failure is reported as [`ErrorCode::PlatformError`].
    pub fn from_platform_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthenticated,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            _ => Self::PlatformError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Unified engine error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use pe_error::{EngineError, ErrorCode};
///
/// let err = EngineError::new(ErrorCode::SynchronizationTimeout, "no VMs after 30 seconds")
///     .with_context("service_id", 42)
///     .with_context("elapsed_secs", 30);
/// assert_eq!(err.code.http_status(), 504);
/// ```
pub struct EngineError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl EngineError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialisation
    /// fails, the entry is silently skipped.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Shorthand for `self.code.http_status()`.
    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// The update path is reserved for future semantics.
    pub fn not_implemented(what: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotImplemented, format!("{what} not implemented"))
    }

    /// Wrap an unexpected failure.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("EngineError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result alias used across the engine crates.
pub type EngineResult<T> = Result<T, EngineError>;

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Client-facing JSON body of an error response.
///
/// The opaque source is flattened to its message and never exposes more
/// than the ids already present in `context`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
}

impl From<&EngineError> for EngineErrorDto {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
        }
    }
}

impl From<EngineErrorDto> for EngineError {
    fn from(dto: EngineErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
