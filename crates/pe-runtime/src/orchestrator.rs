// SPDX-License-Identifier: MIT OR Apache-2.0
//! Create / get / delete use cases for serverless runtimes.

use std::sync::Arc;

use pe_core::{RuntimeBody, RuntimeDocument, RuntimeId, SR, parse_specification};
use pe_error::{EngineError, EngineResult, ErrorCode};
use pe_platform::PlatformGateway;
use pe_store::DocumentStore;
use serde_json::Value;
use tracing::{info, warn};

use crate::{Synchronizer, resolve_template};

/// Ties validation, template resolution, the platform, synchronization and
/// the document store together.
///
/// The orchestrator holds no per-request state; the gateway for the caller's
/// credentials is passed to every operation.
#[derive(Clone)]
pub struct RuntimeOrchestrator {
    store: Arc<dyn DocumentStore>,
    synchronizer: Synchronizer,
}

impl std::fmt::Debug for RuntimeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeOrchestrator")
            .field("synchronizer", &self.synchronizer)
            .finish_non_exhaustive()
    }
}

impl RuntimeOrchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, synchronizer: Synchronizer) -> Self {
        Self {
            store,
            synchronizer,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Validate `specification`, instantiate the matching service, wait for
    /// its instances and persist the resulting document.
    ///
    /// Nothing is persisted unless every step succeeds. A service that was
    /// instantiated but never synchronized is left on the platform and
    /// reported in the log.
    pub async fn create(
        &self,
        gateway: &dyn PlatformGateway,
        owner: &str,
        specification: &Value,
    ) -> EngineResult<RuntimeDocument> {
        let spec = parse_specification(specification)?;
        let template_id = resolve_template(gateway, &spec).await?;

        let service = gateway.instantiate_service(template_id).await?;
        info!(
            service_id = service.id,
            template_id,
            tuple = %spec.tuple_key(),
            "instantiated service"
        );

        let report = match self.synchronizer.synchronize(gateway, service.id).await {
            Ok(report) => report,
            Err(err) => {
                warn!(
                    service_id = service.id,
                    error = %err,
                    "service left behind after failed synchronization"
                );
                return Err(err);
            }
        };

        let body = RuntimeBody::from_specification(spec, owner, &report);
        let document = self.store.allocate(body).await.map_err(|e| {
            warn!(service_id = service.id, "service left behind after failed allocation");
            EngineError::from(e).with_context("service_id", service.id)
        })?;
        info!(
            runtime_id = document.id,
            service_id = service.id,
            name = %document.body.name,
            "allocated {SR} document"
        );
        Ok(document)
    }

    /// Load a document, re-synchronize it against the platform and persist
    /// the refreshed attributes.
    ///
    /// If the backing service has vanished or does not converge, the stored
    /// snapshot is returned unchanged.
    pub async fn get(
        &self,
        gateway: &dyn PlatformGateway,
        owner: &str,
        id: RuntimeId,
    ) -> EngineResult<RuntimeDocument> {
        let mut document = self.load_owned(owner, id).await?;
        let service_id = document.body.service_id;

        match self.synchronizer.synchronize(gateway, service_id).await {
            Ok(report) => {
                if document.apply_sync(&report) {
                    self.store.update(&document).await?;
                }
            }
            Err(err)
                if matches!(
                    err.code,
                    ErrorCode::NotFound | ErrorCode::SynchronizationTimeout
                ) =>
            {
                warn!(
                    runtime_id = id,
                    service_id,
                    error = %err,
                    "returning stored snapshot without re-synchronization"
                );
            }
            Err(err) => {
                return Err(err
                    .with_context("runtime_id", id)
                    .with_context("service_id", service_id));
            }
        }
        Ok(document)
    }

    /// Delete the backing service, then the document.
    ///
    /// A service that is already gone does not block removal of the
    /// document. Any other platform failure leaves the document in place.
    pub async fn delete(
        &self,
        gateway: &dyn PlatformGateway,
        owner: &str,
        id: RuntimeId,
    ) -> EngineResult<()> {
        let document = self.load_owned(owner, id).await?;
        let service_id = document.body.service_id;

        match gateway.delete_service(service_id).await {
            Ok(()) => info!(runtime_id = id, service_id, "deleted service"),
            Err(err) if err.is_not_found() => {
                warn!(runtime_id = id, service_id, "service already absent, deleting document")
            }
            Err(err) => {
                return Err(EngineError::from(err)
                    .with_context("runtime_id", id)
                    .with_context("service_id", service_id));
            }
        }

        self.store.delete(id).await.map_err(|e| {
            EngineError::from(e)
                .with_context("runtime_id", id)
                .with_context("service_id", service_id)
        })?;
        info!(runtime_id = id, "deleted {SR} document");
        Ok(())
    }

    async fn load_owned(&self, owner: &str, id: RuntimeId) -> EngineResult<RuntimeDocument> {
        let document = self.store.load(id).await?.ok_or_else(|| {
            EngineError::new(ErrorCode::NotFound, format!("{SR} {id} not found"))
                .with_context("runtime_id", id)
        })?;
        if document.body.owner != owner {
            return Err(EngineError::new(
                ErrorCode::Forbidden,
                format!("{SR} {id} belongs to another user"),
            )
            .with_context("runtime_id", id));
        }
        Ok(document)
    }
}
