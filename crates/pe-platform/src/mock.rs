// SPDX-License-Identifier: MIT OR Apache-2.0
//! An in-memory platform for local development and tests.
//!
//! Templates are registered up front with the number of roles they create.
//! Instantiated services stay "not ready" for a configurable number of
//! `get_service` polls, after which every role exposes one instance.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use pe_core::{InstanceId, LiveInstanceAttributes, ServiceId};

use crate::{
    Credentials, PlatformConnector, PlatformError, PlatformGateway, RoleNode, ServiceDocument,
    ServiceRole, ServiceTemplate, TemplateId,
};

/// When instantiated services start exposing their instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Readiness {
    /// Ready on the first poll.
    #[default]
    Immediate,
    /// Ready once this many polls have observed the service as pending.
    AfterPolls(u64),
    /// Never ready.
    Never,
}

#[derive(Debug)]
struct MockTemplate {
    name: String,
    roles: Vec<String>,
}

#[derive(Debug)]
struct MockService {
    roles: Vec<(String, InstanceId)>,
    polls: u64,
}

#[derive(Debug, Default)]
struct State {
    templates: BTreeMap<TemplateId, MockTemplate>,
    services: BTreeMap<ServiceId, MockService>,
    instances: BTreeMap<InstanceId, LiveInstanceAttributes>,
    next_template: TemplateId,
    next_service: ServiceId,
    next_instance: InstanceId,
    readiness: Readiness,
    accepted: Option<Credentials>,
    denied: BTreeSet<String>,
    delete_failure: Option<u16>,
    instance_failure: Option<u16>,
    instantiations: u64,
    deletions: u64,
}

/// Shared in-memory platform. Cloning shares state.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<State>>,
}

impl MockPlatform {
    /// Empty platform: no templates, services ready immediately, any
    /// credentials accepted.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a template whose services get one instance per role.
    pub fn add_template(&self, name: impl Into<String>, roles: &[&str]) -> TemplateId {
        let mut state = self.lock();
        let id = state.next_template;
        state.next_template += 1;
        state.templates.insert(
            id,
            MockTemplate {
                name: name.into(),
                roles: roles.iter().map(|r| (*r).to_string()).collect(),
            },
        );
        id
    }

    /// Set how soon new polls observe services as ready.
    pub fn set_readiness(&self, readiness: Readiness) {
        self.lock().readiness = readiness;
    }

    /// Only accept these credentials; anything else gets 401.
    pub fn require_credentials(&self, credentials: Credentials) {
        self.lock().accepted = Some(credentials);
    }

    /// Reject every call from `username` with 403.
    pub fn deny_user(&self, username: impl Into<String>) {
        self.lock().denied.insert(username.into());
    }

    /// Make `delete_service` fail with `status` for existing services.
    pub fn fail_deletes_with(&self, status: u16) {
        self.lock().delete_failure = Some(status);
    }

    /// Make `get_instance` fail with `status`.
    pub fn fail_instance_lookups_with(&self, status: u16) {
        self.lock().instance_failure = Some(status);
    }

    /// Remove a service behind the engine's back.
    pub fn delete_service_externally(&self, service_id: ServiceId) -> bool {
        self.lock().services.remove(&service_id).is_some()
    }

    /// Overwrite the live state of an instance.
    pub fn set_instance_state(&self, instance_id: InstanceId, state: impl Into<String>) {
        if let Some(attrs) = self.lock().instances.get_mut(&instance_id) {
            attrs.state = state.into();
        }
    }

    /// Whether a service currently exists.
    pub fn has_service(&self, service_id: ServiceId) -> bool {
        self.lock().services.contains_key(&service_id)
    }

    /// Number of services instantiated so far.
    pub fn instantiations(&self) -> u64 {
        self.lock().instantiations
    }

    /// Number of successful service deletions.
    pub fn deletions(&self) -> u64 {
        self.lock().deletions
    }

    /// Total `get_service` polls observed for `service_id`.
    pub fn polls(&self, service_id: ServiceId) -> u64 {
        self.lock()
            .services
            .get(&service_id)
            .map_or(0, |s| s.polls)
    }
}

impl PlatformConnector for MockPlatform {
    fn connect(&self, credentials: &Credentials) -> Arc<dyn PlatformGateway> {
        Arc::new(MockGateway {
            platform: self.clone(),
            credentials: credentials.clone(),
        })
    }
}

struct MockGateway {
    platform: MockPlatform,
    credentials: Credentials,
}

impl MockGateway {
    fn authorize(&self) -> Result<MutexGuard<'_, State>, PlatformError> {
        let state = self.platform.lock();
        if let Some(accepted) = &state.accepted {
            if accepted != &self.credentials {
                return Err(PlatformError::status(401, "authentication failed"));
            }
        }
        if state.denied.contains(&self.credentials.username) {
            return Err(PlatformError::status(
                403,
                format!("user {} is not authorized", self.credentials.username),
            ));
        }
        Ok(state)
    }
}

fn service_not_found(service_id: ServiceId) -> PlatformError {
    PlatformError::status(404, format!("Service {service_id} not found"))
}

#[async_trait]
impl PlatformGateway for MockGateway {
    async fn list_service_templates(&self) -> Result<Vec<ServiceTemplate>, PlatformError> {
        let state = self.authorize()?;
        Ok(state
            .templates
            .iter()
            .map(|(id, t)| ServiceTemplate {
                id: *id,
                name: t.name.clone(),
            })
            .collect())
    }

    async fn instantiate_service(
        &self,
        template_id: TemplateId,
    ) -> Result<ServiceDocument, PlatformError> {
        let mut state = self.authorize()?;
        let roles = state
            .templates
            .get(&template_id)
            .map(|t| t.roles.clone())
            .ok_or_else(|| {
                PlatformError::status(404, format!("Template {template_id} not found"))
            })?;

        let service_id = state.next_service;
        state.next_service += 1;
        state.instantiations += 1;

        let mut bound = Vec::with_capacity(roles.len());
        for role in roles {
            state.next_instance += 1;
            let instance_id = state.next_instance;
            state.instances.insert(
                instance_id,
                LiveInstanceAttributes {
                    id: instance_id,
                    state: "ACTIVE".to_string(),
                    address: Some(format!("10.0.0.{instance_id}")),
                    cpu: Some(1.0),
                    vcpu: Some(1),
                    memory: Some(512),
                    disk_size: Some(1024),
                },
            );
            bound.push((role, instance_id));
        }

        let document = ServiceDocument {
            id: service_id,
            roles: bound
                .iter()
                .map(|(name, _)| ServiceRole {
                    name: name.clone(),
                    nodes: Vec::new(),
                })
                .collect(),
        };
        state.services.insert(
            service_id,
            MockService {
                roles: bound,
                polls: 0,
            },
        );
        Ok(document)
    }

    async fn get_service(&self, service_id: ServiceId) -> Result<ServiceDocument, PlatformError> {
        let mut state = self.authorize()?;
        let readiness = state.readiness;
        let service = state
            .services
            .get_mut(&service_id)
            .ok_or_else(|| service_not_found(service_id))?;
        service.polls += 1;
        let ready = match readiness {
            Readiness::Immediate => true,
            Readiness::AfterPolls(n) => service.polls > n,
            Readiness::Never => false,
        };
        Ok(ServiceDocument {
            id: service_id,
            roles: service
                .roles
                .iter()
                .map(|(name, instance)| ServiceRole {
                    name: name.clone(),
                    nodes: if ready {
                        vec![RoleNode {
                            instance: Some(*instance),
                        }]
                    } else {
                        Vec::new()
                    },
                })
                .collect(),
        })
    }

    async fn delete_service(&self, service_id: ServiceId) -> Result<(), PlatformError> {
        let mut state = self.authorize()?;
        if !state.services.contains_key(&service_id) {
            return Err(service_not_found(service_id));
        }
        if let Some(status) = state.delete_failure {
            return Err(PlatformError::status(
                status,
                format!("cannot delete service {service_id}"),
            ));
        }
        if let Some(service) = state.services.remove(&service_id) {
            for (_, instance) in service.roles {
                state.instances.remove(&instance);
            }
        }
        state.deletions += 1;
        Ok(())
    }

    async fn get_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<LiveInstanceAttributes, PlatformError> {
        let state = self.authorize()?;
        if let Some(status) = state.instance_failure {
            return Err(PlatformError::status(
                status,
                format!("VM {instance_id} lookup failed"),
            ));
        }
        state
            .instances
            .get(&instance_id)
            .cloned()
            .ok_or_else(|| PlatformError::status(404, format!("VM {instance_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("oneadmin", "pw")
    }

    #[tokio::test]
    async fn lists_registered_templates() {
        let platform = MockPlatform::new();
        platform.add_template("small", &["faas"]);
        platform.add_template("small-db", &["faas", "daas"]);
        let gw = platform.connect(&creds());
        let names: Vec<String> = gw
            .list_service_templates()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, ["small", "small-db"]);
    }

    #[tokio::test]
    async fn services_become_ready_after_polls() {
        let platform = MockPlatform::new();
        let tpl = platform.add_template("small", &["faas"]);
        platform.set_readiness(Readiness::AfterPolls(2));
        let gw = platform.connect(&creds());
        let svc = gw.instantiate_service(tpl).await.unwrap();

        assert_eq!(gw.get_service(svc.id).await.unwrap().roles[0].first_instance(), None);
        assert_eq!(gw.get_service(svc.id).await.unwrap().roles[0].first_instance(), None);
        let ready = gw.get_service(svc.id).await.unwrap();
        let instance = ready.roles[0].first_instance().unwrap();
        assert_eq!(platform.polls(svc.id), 3);

        let attrs = gw.get_instance(instance).await.unwrap();
        assert_eq!(attrs.state, "ACTIVE");
        assert_eq!(attrs.address, Some(format!("10.0.0.{instance}")));
    }

    #[tokio::test]
    async fn credential_checks() {
        let platform = MockPlatform::new();
        platform.require_credentials(creds());
        platform.deny_user("mallory");

        let wrong = platform.connect(&Credentials::new("oneadmin", "nope"));
        assert_eq!(wrong.list_service_templates().await.unwrap_err().status_code(), 401);

        platform.require_credentials(Credentials::new("mallory", "pw"));
        let denied = platform.connect(&Credentials::new("mallory", "pw"));
        assert_eq!(denied.list_service_templates().await.unwrap_err().status_code(), 403);
    }

    #[tokio::test]
    async fn delete_removes_service_and_instances() {
        let platform = MockPlatform::new();
        let tpl = platform.add_template("small", &["faas"]);
        let gw = platform.connect(&creds());
        let svc = gw.instantiate_service(tpl).await.unwrap();
        let instance = gw.get_service(svc.id).await.unwrap().roles[0]
            .first_instance()
            .unwrap();

        gw.delete_service(svc.id).await.unwrap();
        assert!(!platform.has_service(svc.id));
        assert_eq!(platform.deletions(), 1);
        assert!(gw.get_instance(instance).await.unwrap_err().is_not_found());
        assert!(gw.delete_service(svc.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn injected_delete_failure() {
        let platform = MockPlatform::new();
        let tpl = platform.add_template("small", &["faas"]);
        let gw = platform.connect(&creds());
        let svc = gw.instantiate_service(tpl).await.unwrap();
        platform.fail_deletes_with(500);
        assert_eq!(gw.delete_service(svc.id).await.unwrap_err().status_code(), 500);
        assert!(platform.has_service(svc.id));
    }

    #[tokio::test]
    async fn unknown_template_is_not_found() {
        let platform = MockPlatform::new();
        let gw = platform.connect(&creds());
        assert!(gw.instantiate_service(9).await.unwrap_err().is_not_found());
    }
}
