// SPDX-License-Identifier: MIT OR Apache-2.0
//! Orchestrator use cases against the mock platform.

use std::sync::Arc;

use pe_config::SyncConfig;
use pe_error::ErrorCode;
use pe_platform::{Credentials, MockPlatform, PlatformConnector, PlatformGateway, Readiness};
use pe_runtime::{RuntimeOrchestrator, Synchronizer};
use pe_core::{RuntimeBody, RuntimeDocument, RuntimeId};
use pe_store::{DocumentStore, FileDocumentStore, InMemoryDocumentStore, StoreError};
use serde_json::{Value, json};

const OWNER: &str = "oneadmin";

struct Harness {
    platform: MockPlatform,
    store: Arc<InMemoryDocumentStore>,
    engine: RuntimeOrchestrator,
}

impl Harness {
    fn new() -> Self {
        let platform = MockPlatform::new();
        let store = Arc::new(InMemoryDocumentStore::new());
        let engine = RuntimeOrchestrator::new(
            store.clone() as Arc<dyn DocumentStore>,
            Synchronizer::new(SyncConfig::default()),
        );
        Self {
            platform,
            store,
            engine,
        }
    }

    fn gateway(&self) -> Arc<dyn PlatformGateway> {
        self.platform.connect(&Credentials::new(OWNER, "pw"))
    }
}

fn small() -> Value {
    json!({"SERVERLESS_RUNTIME": {"FAAS": {"FLAVOUR": "small"}}})
}

#[tokio::test(start_paused = true)]
async fn create_small_runtime() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);

    let doc = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();
    let view = serde_json::to_value(doc.to_client_view()).unwrap();
    let runtime = &view["SERVERLESS_RUNTIME"];

    assert_eq!(runtime["FAAS"]["FLAVOUR"], "small");
    let vm_id = runtime["FAAS"]["VM_ID"].as_u64().unwrap();
    assert_eq!(runtime["FAAS"]["ENDPOINT"], format!("10.0.0.{vm_id}"));
    assert_eq!(runtime["FAAS"]["STATE"], "ACTIVE");
    assert!(runtime["NAME"].as_str().unwrap().starts_with("small_"));
    assert!(runtime.get("REGISTRATION_TIME").is_none());
    assert!(runtime.get("OWNER").is_none());
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn create_with_daas_merges_second_role() {
    let h = Harness::new();
    h.platform.add_template("f1-d1", &["faas", "daas"]);
    h.platform.add_template("f1", &["faas"]);

    let spec = json!({"SERVERLESS_RUNTIME": {
        "NAME": "edge",
        "FAAS": {"FLAVOUR": "f1", "MEMORY": 64},
        "DAAS": {"FLAVOUR": "d1"}
    }});
    let doc = h.engine.create(h.gateway().as_ref(), OWNER, &spec).await.unwrap();
    assert_eq!(doc.body.name, "edge");
    let faas_vm = doc.body.faas.vm_id.unwrap();
    let daas_vm = doc.body.daas.as_ref().and_then(|d| d.vm_id).unwrap();
    assert_ne!(faas_vm, daas_vm);
    // Platform-reported sizing wins over the requested value.
    assert_eq!(doc.body.faas.memory, Some(512));
}

#[tokio::test(start_paused = true)]
async fn missing_template_is_422_and_nothing_is_created() {
    let h = Harness::new();
    h.platform.add_template("large", &["faas"]);

    let err = h
        .engine
        .create(h.gateway().as_ref(), OWNER, &small())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TemplateNotFound);
    assert_eq!(err.http_status(), 422);
    assert!(err.message.contains("small"));
    assert_eq!(h.platform.instantiations(), 0);
    assert!(h.store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn invalid_specification_is_400() {
    let h = Harness::new();
    let err = h
        .engine
        .create(
            h.gateway().as_ref(),
            OWNER,
            &json!({"SERVERLESS_RUNTIME": {"DAAS": {"FLAVOUR": "d"}}}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
}

#[tokio::test(start_paused = true)]
async fn never_ready_service_is_504_without_document() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    h.platform.set_readiness(Readiness::Never);

    let err = h
        .engine
        .create(h.gateway().as_ref(), OWNER, &small())
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 504);
    assert!(h.store.is_empty().await);
    assert_eq!(h.platform.instantiations(), 1);
}

#[tokio::test(start_paused = true)]
async fn get_resynchronizes_and_keeps_identity() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();
    let vm = created.body.faas.vm_id.unwrap();

    h.platform.set_instance_state(vm, "POWEROFF");
    let fetched = h
        .engine
        .get(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.body.name, created.body.name);
    assert_eq!(fetched.body.faas.state.as_deref(), Some("POWEROFF"));

    let again = h
        .engine
        .get(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap();
    assert_eq!(again.id, created.id);
    assert_eq!(again.body.registration_time, created.body.registration_time);
}

#[tokio::test(start_paused = true)]
async fn get_unknown_is_404() {
    let h = Harness::new();
    let err = h.engine.get(h.gateway().as_ref(), OWNER, 42).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test(start_paused = true)]
async fn get_of_another_users_runtime_is_403() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();

    let other = h.platform.connect(&Credentials::new("bob", "pw"));
    let err = h.engine.get(other.as_ref(), "bob", created.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);
}

#[tokio::test(start_paused = true)]
async fn get_returns_snapshot_when_service_vanished() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();
    h.platform.delete_service_externally(created.body.service_id);

    let fetched = h
        .engine
        .get(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap();
    assert_eq!(fetched, created);
}

#[tokio::test(start_paused = true)]
async fn get_propagates_platform_auth_failures() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();
    h.platform.deny_user(OWNER);

    let err = h
        .engine
        .get(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 403);
    assert_eq!(err.context["runtime_id"], created.id);
}

#[tokio::test(start_paused = true)]
async fn delete_removes_service_then_document() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();

    h.engine
        .delete(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap();
    assert!(!h.platform.has_service(created.body.service_id));
    assert!(h.store.is_empty().await);

    let err = h
        .engine
        .delete(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test(start_paused = true)]
async fn delete_tolerates_missing_service() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();
    h.platform.delete_service_externally(created.body.service_id);

    h.engine
        .delete(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap();
    assert!(h.store.is_empty().await);
    assert_eq!(h.platform.deletions(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_service_delete_keeps_document() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();
    h.platform.fail_deletes_with(500);

    let err = h
        .engine
        .delete(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PlatformError);
    assert_eq!(err.context["service_id"], created.body.service_id);
    assert_eq!(h.store.len().await, 1);
}

/// In-memory store whose deletions always fail.
struct UndeletableStore(InMemoryDocumentStore);

#[async_trait::async_trait]
impl DocumentStore for UndeletableStore {
    async fn allocate(&self, body: RuntimeBody) -> Result<RuntimeDocument, StoreError> {
        self.0.allocate(body).await
    }

    async fn load(&self, id: RuntimeId) -> Result<Option<RuntimeDocument>, StoreError> {
        self.0.load(id).await
    }

    async fn update(&self, document: &RuntimeDocument) -> Result<(), StoreError> {
        self.0.update(document).await
    }

    async fn delete(&self, _id: RuntimeId) -> Result<bool, StoreError> {
        Err(StoreError::Io {
            path: "/var/lib/provision-engine/runtimes".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn document_delete_failure_after_service_delete_is_500() {
    let platform = MockPlatform::new();
    platform.add_template("small", &["faas"]);
    let engine = RuntimeOrchestrator::new(
        Arc::new(UndeletableStore(InMemoryDocumentStore::new())),
        Synchronizer::new(SyncConfig::default()),
    );
    let gw = platform.connect(&Credentials::new(OWNER, "pw"));
    let created = engine.create(gw.as_ref(), OWNER, &small()).await.unwrap();

    let err = engine.delete(gw.as_ref(), OWNER, created.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::StoreError);
    assert_eq!(err.http_status(), 500);
    assert_eq!(err.context["runtime_id"], created.id);
    assert_eq!(err.context["service_id"], created.body.service_id);
    assert!(!err.message.contains("/var/lib"));
    assert_eq!(platform.deletions(), 1);
    assert!(!platform.has_service(created.body.service_id));
}

#[tokio::test(start_paused = true)]
async fn failed_instance_lookup_aborts_create() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    h.platform.fail_instance_lookups_with(403);

    let err = h
        .engine
        .create(h.gateway().as_ref(), OWNER, &small())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);
    assert_eq!(h.platform.instantiations(), 1);
    assert!(h.store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn failed_instance_lookup_fails_get() {
    let h = Harness::new();
    h.platform.add_template("small", &["faas"]);
    let created = h.engine.create(h.gateway().as_ref(), OWNER, &small()).await.unwrap();
    h.platform.fail_instance_lookups_with(500);

    let err = h
        .engine
        .get(h.gateway().as_ref(), OWNER, created.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PlatformError);
    assert_eq!(err.context["runtime_id"], created.id);
    assert_eq!(err.context["service_id"], created.body.service_id);
}

#[tokio::test(start_paused = true)]
async fn file_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileDocumentStore::open(dir.path()).await.unwrap());
    let platform = MockPlatform::new();
    platform.add_template("small", &["faas"]);
    let engine = RuntimeOrchestrator::new(store, Synchronizer::new(SyncConfig::default()));
    let gw = platform.connect(&Credentials::new(OWNER, "pw"));

    let created = engine.create(gw.as_ref(), OWNER, &small()).await.unwrap();
    let fetched = engine.get(gw.as_ref(), OWNER, created.id).await.unwrap();
    assert_eq!(fetched.body.name, created.body.name);
    engine.delete(gw.as_ref(), OWNER, created.id).await.unwrap();
    assert!(engine.get(gw.as_ref(), OWNER, created.id).await.is_err());
}
