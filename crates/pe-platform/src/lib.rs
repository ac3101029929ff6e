// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Platform gateway abstractions.
//!
//! The engine never talks to the cluster-management platform directly; it
//! goes through a [`PlatformGateway`] obtained from a [`PlatformConnector`]
//! for the credentials of the current request.

/// In-memory platform used by tests and local development.
pub mod mock;
/// OpenNebula gateway (OneFlow REST + oned XML-RPC).
pub mod opennebula;

use async_trait::async_trait;
use pe_core::{InstanceId, LiveInstanceAttributes, ServiceId};
use pe_error::{EngineError, ErrorCode};
use std::fmt;
use std::sync::Arc;

pub use mock::{MockPlatform, Readiness};
pub use opennebula::OpenNebulaConnector;

/// Identifier of a service template.
pub type TemplateId = u64;

/// Caller credentials, forwarded opaquely to the platform.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Platform user name.
    pub username: String,
    /// Platform password or token.
    pub password: String,
}

impl Credentials {
    /// Create credentials from a user name and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Session string in the `user:pass` form the platform expects.
    pub fn session(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A service template known to the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTemplate {
    /// Template identifier.
    pub id: TemplateId,
    /// Declared template name, matched against the flavour tuple.
    pub name: String,
}

/// A platform-managed service as seen at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDocument {
    /// Service identifier.
    pub id: ServiceId,
    /// Roles in declaration order.
    pub roles: Vec<ServiceRole>,
}

/// A role (group of compute instances) inside a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRole {
    /// Role name.
    pub name: String,
    /// Nodes of the role, in platform order.
    pub nodes: Vec<RoleNode>,
}

/// A node of a role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleNode {
    /// Instance backing the node, once the platform describes it.
    pub instance: Option<InstanceId>,
}

impl ServiceRole {
    /// Instance of the first node, if the platform already describes it.
    pub fn first_instance(&self) -> Option<InstanceId> {
        self.nodes.first().and_then(|n| n.instance)
    }
}

/// Failure reported by (or while talking to) the platform.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform answered with a non-success status.
    #[error("platform responded {status}: {message}")]
    Status {
        /// HTTP-like status code.
        status: u16,
        /// Message returned by the platform.
        message: String,
    },

    /// The request never produced a response.
    #[error("platform request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The platform answered with something that could not be interpreted.
    #[error("unexpected platform response: {0}")]
    Malformed(String),
}

impl PlatformError {
    /// Build a status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// HTTP-like status code of this failure (500 if there was no response).
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Status { status, .. } => *status,
            Self::Transport(_) | Self::Malformed(_) => 500,
        }
    }

    /// Whether the platform reported the resource as absent.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }
}

impl From<PlatformError> for EngineError {
    fn from(err: PlatformError) -> Self {
        let code = ErrorCode::from_platform_status(err.status_code());
        let message = match &err {
            PlatformError::Status { message, .. } => message.clone(),
            PlatformError::Transport(detail) => {
                tracing::error!(error = %detail, "platform unreachable");
                "platform request failed".to_string()
            }
            PlatformError::Malformed(_) => err.to_string(),
        };
        EngineError::new(code, message).with_source(err)
    }
}

/// Operations the engine needs from the cluster-management platform.
///
/// Implementations are bound to one set of credentials.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    /// List every service template visible to the caller.
    async fn list_service_templates(&self) -> Result<Vec<ServiceTemplate>, PlatformError>;

    /// Instantiate a service from a template.
    async fn instantiate_service(
        &self,
        template_id: TemplateId,
    ) -> Result<ServiceDocument, PlatformError>;

    /// Fetch the current state of a service.
    async fn get_service(&self, service_id: ServiceId) -> Result<ServiceDocument, PlatformError>;

    /// Delete a service and its instances.
    async fn delete_service(&self, service_id: ServiceId) -> Result<(), PlatformError>;

    /// Fetch the live attributes of a compute instance.
    async fn get_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<LiveInstanceAttributes, PlatformError>;
}

/// Produces a [`PlatformGateway`] bound to the credentials of one request.
pub trait PlatformConnector: Send + Sync {
    /// Bind a gateway to `credentials`.
    fn connect(&self, credentials: &Credentials) -> Arc<dyn PlatformGateway>;
}
