// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bounded polling of a service until its instances are describable.

use std::sync::Arc;

use pe_config::SyncConfig;
use pe_core::{InstanceId, ServiceId, SyncReport};
use pe_error::{EngineError, EngineResult, ErrorCode};
use pe_platform::{PlatformGateway, ServiceDocument};
use tokio::sync::Semaphore;
use tokio::time::{self, Instant};
use tracing::{debug, info};

/// Runs synchronizations with a fixed round budget and interval, at most
/// `max_concurrent` at a time.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    config: SyncConfig,
    permits: Arc<Semaphore>,
}

/// Instance of the first role, plus the second role's if it already has one.
///
/// Only the first role gates readiness.
fn ready_instances(service: &ServiceDocument) -> Option<(InstanceId, Option<InstanceId>)> {
    let faas = service.roles.first()?.first_instance()?;
    let daas = service.roles.get(1).and_then(|role| role.first_instance());
    Some((faas, daas))
}

fn timeout_error(service_id: ServiceId, message: String, started: Instant) -> EngineError {
    EngineError::new(ErrorCode::SynchronizationTimeout, message)
        .with_context("service_id", service_id)
        .with_context("elapsed_secs", started.elapsed().as_secs())
}

impl Synchronizer {
    pub fn new(config: SyncConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self { config, permits }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Synchronizations that could start right now without waiting.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Poll `service_id` until its first role exposes an instance, then fetch
    /// the live attributes of the first two roles.
    ///
    /// Each of the `timeout_secs` rounds fetches the service once; rounds are
    /// separated by `interval`. A failing fetch aborts immediately. Running out
    /// of rounds, or waiting longer than the whole budget for a free slot in
    /// the pool, yields [`ErrorCode::SynchronizationTimeout`].
    pub async fn synchronize(
        &self,
        gateway: &dyn PlatformGateway,
        service_id: ServiceId,
    ) -> EngineResult<SyncReport> {
        let started = Instant::now();
        let rounds = self.config.timeout_secs;
        let budget = self.config.interval() * u32::try_from(rounds).unwrap_or(u32::MAX);
        let _permit = match time::timeout(budget, self.permits.acquire()).await {
            Ok(permit) => {
                permit.map_err(|_| EngineError::internal("synchronization pool is closed"))?
            }
            Err(_) => {
                return Err(timeout_error(
                    service_id,
                    format!("Service {service_id} waited too long for a synchronization slot"),
                    started,
                ));
            }
        };

        for round in 1..=rounds {
            let service = gateway.get_service(service_id).await?;
            if let Some((faas_id, daas_id)) = ready_instances(&service) {
                let faas = gateway.get_instance(faas_id).await?;
                let daas = match daas_id {
                    Some(id) => Some(gateway.get_instance(id).await?),
                    None => None,
                };
                info!(service_id, round, "service instances are ready");
                return Ok(SyncReport {
                    service_id,
                    faas,
                    daas,
                    rounds: round,
                });
            }
            debug!(service_id, round, rounds, "service instances not ready yet");
            if round < rounds {
                time::sleep(self.config.interval()).await;
            }
        }

        let elapsed_secs = started.elapsed().as_secs();
        Err(timeout_error(
            service_id,
            format!(
                "Service {service_id} instances were not ready after {rounds} rounds ({elapsed_secs}s)"
            ),
            started,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pe_core::LiveInstanceAttributes;
    use pe_platform::{
        Credentials, MockPlatform, PlatformConnector, PlatformError, Readiness, RoleNode,
        ServiceRole, ServiceTemplate, TemplateId,
    };
    use std::time::Duration;

    fn setup(roles: &[&str], readiness: Readiness) -> (MockPlatform, Arc<dyn PlatformGateway>, u64) {
        let platform = MockPlatform::new();
        let tpl = platform.add_template("t", roles);
        platform.set_readiness(readiness);
        let gw = platform.connect(&Credentials::new("u", "p"));
        (platform, gw, tpl)
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_first_round() {
        let (_platform, gw, tpl) = setup(&["faas"], Readiness::Immediate);
        let svc = gw.instantiate_service(tpl).await.unwrap();
        let report = Synchronizer::new(SyncConfig::default())
            .synchronize(gw.as_ref(), svc.id)
            .await
            .unwrap();
        assert_eq!(report.rounds, 1);
        assert_eq!(report.service_id, svc.id);
        assert!(report.daas.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ready_on_last_round_is_success() {
        let (platform, gw, tpl) = setup(&["faas", "daas"], Readiness::AfterPolls(29));
        let svc = gw.instantiate_service(tpl).await.unwrap();
        let start = Instant::now();
        let report = Synchronizer::new(SyncConfig::default())
            .synchronize(gw.as_ref(), svc.id)
            .await
            .unwrap();
        assert_eq!(report.rounds, 30);
        assert_eq!(platform.polls(svc.id), 30);
        assert!(report.daas.is_some());
        assert_eq!(start.elapsed(), Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out() {
        let (platform, gw, tpl) = setup(&["faas"], Readiness::Never);
        let svc = gw.instantiate_service(tpl).await.unwrap();
        let err = Synchronizer::new(SyncConfig::default())
            .synchronize(gw.as_ref(), svc.id)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SynchronizationTimeout);
        assert_eq!(err.http_status(), 504);
        assert_eq!(err.context["service_id"], svc.id);
        assert_eq!(err.context["elapsed_secs"], 29);
        assert_eq!(platform.polls(svc.id), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_service_aborts_immediately() {
        let (platform, gw, _tpl) = setup(&["faas"], Readiness::Immediate);
        let err = Synchronizer::new(SyncConfig::default())
            .synchronize(gw.as_ref(), 77)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(platform.polls(77), 0);
    }

    #[test]
    fn only_first_role_gates_readiness() {
        let role = |instance| ServiceRole {
            name: "r".into(),
            nodes: vec![RoleNode { instance }],
        };
        let doc = |roles| ServiceDocument { id: 1, roles };
        assert_eq!(ready_instances(&doc(vec![])), None);
        assert_eq!(ready_instances(&doc(vec![role(Some(4))])), Some((4, None)));
        assert_eq!(ready_instances(&doc(vec![role(None), role(Some(5))])), None);
        assert_eq!(
            ready_instances(&doc(vec![role(Some(4)), role(None)])),
            Some((4, None))
        );
        assert_eq!(
            ready_instances(&doc(vec![role(Some(4)), role(Some(5))])),
            Some((4, Some(5)))
        );
    }

    #[tokio::test]
    async fn zero_max_concurrent_still_runs() {
        let sync = Synchronizer::new(SyncConfig {
            max_concurrent: 0,
            ..SyncConfig::default()
        });
        assert_eq!(sync.available_permits(), 1);
    }

    /// First role has an instance, the second never gets one.
    struct SecondRoleBooting;

    #[async_trait::async_trait]
    impl PlatformGateway for SecondRoleBooting {
        async fn list_service_templates(&self) -> Result<Vec<ServiceTemplate>, PlatformError> {
            Ok(vec![])
        }

        async fn instantiate_service(&self, _: TemplateId) -> Result<ServiceDocument, PlatformError> {
            Err(PlatformError::status(500, "not used"))
        }

        async fn get_service(&self, service_id: ServiceId) -> Result<ServiceDocument, PlatformError> {
            let role = |name: &str, instance| ServiceRole {
                name: name.into(),
                nodes: vec![RoleNode { instance }],
            };
            Ok(ServiceDocument {
                id: service_id,
                roles: vec![role("faas", Some(7)), role("daas", None)],
            })
        }

        async fn delete_service(&self, _: ServiceId) -> Result<(), PlatformError> {
            Ok(())
        }

        async fn get_instance(&self, id: InstanceId) -> Result<LiveInstanceAttributes, PlatformError> {
            Ok(LiveInstanceAttributes {
                id,
                state: "ACTIVE".into(),
                ..Default::default()
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn booting_second_role_does_not_block() {
        let report = Synchronizer::new(SyncConfig::default())
            .synchronize(&SecondRoleBooting, 1)
            .await
            .unwrap();
        assert_eq!(report.rounds, 1);
        assert_eq!(report.faas.id, 7);
        assert!(report.daas.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn saturated_pool_times_out_without_polling() {
        let (platform, gw, tpl) = setup(&["faas"], Readiness::Immediate);
        let svc = gw.instantiate_service(tpl).await.unwrap();
        let sync = Synchronizer::new(SyncConfig {
            timeout_secs: 3,
            interval_ms: 100,
            max_concurrent: 1,
        });
        let _held = sync.permits.clone().acquire_owned().await.unwrap();

        let start = Instant::now();
        let err = sync.synchronize(gw.as_ref(), svc.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::SynchronizationTimeout);
        assert_eq!(err.context["service_id"], svc.id);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
        assert_eq!(platform.polls(svc.id), 0);
    }
}
