// SPDX-License-Identifier: MIT OR Apache-2.0
//! pe-core
//!
//! The serverless runtime contract: what clients declare, what the engine
//! persists, and how live instance attributes are folded back in.
#![deny(unsafe_code)]

/// Runtime specification validation against the published schema.
pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use validate::{parse_specification, specification_schema, validate_specification};

/// Human-readable name of the managed resource, used in log lines and messages.
pub const SR: &str = "Serverless Runtime";

/// Identifier the document store assigns to a runtime.
pub type RuntimeId = u64;

/// Identifier of a platform-managed service.
pub type ServiceId = u64;

/// Identifier of a platform compute instance.
pub type InstanceId = u64;

/// One function component as a client declares it.
///
/// Only the flavour and sizing are accepted; any other key, including the
/// live fields of [`ComponentDescriptor`], is dropped on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ComponentRequest {
    /// Template variant selector.
    pub flavour: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u64>,
}

impl ComponentRequest {
    /// A request carrying only a flavour.
    pub fn with_flavour(flavour: impl Into<String>) -> Self {
        Self {
            flavour: flavour.into(),
            ..Default::default()
        }
    }
}

impl From<ComponentRequest> for ComponentDescriptor {
    fn from(req: ComponentRequest) -> Self {
        Self {
            flavour: req.flavour,
            cpu: req.cpu,
            memory: req.memory,
            disk_size: req.disk_size,
            ..Default::default()
        }
    }
}

/// Sizing and live state of one function component (FaaS or DaaS).
///
/// The sizing fields start from the [`ComponentRequest`] and are overwritten
/// with the values reported by the platform once the instance exists. The
/// live fields (`VM_ID`, `STATE`, `ENDPOINT`, `VCPU`) are only ever set by
/// synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ComponentDescriptor {
    /// Template variant selector.
    pub flavour: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size: Option<u64>,

    /// Compute instance backing this component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<InstanceId>,

    /// Platform state label of the instance (e.g. `ACTIVE`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Network address of the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vcpu: Option<u32>,
}

impl ComponentDescriptor {
    /// A descriptor carrying only a flavour.
    pub fn with_flavour(flavour: impl Into<String>) -> Self {
        Self {
            flavour: flavour.into(),
            ..Default::default()
        }
    }

    /// Overwrite the live fields with what the platform reports.
    ///
    /// Attributes the platform did not report keep their previous value.
    pub fn apply_live(&mut self, live: &LiveInstanceAttributes) {
        self.vm_id = Some(live.id);
        self.state = Some(live.state.clone());
        if live.address.is_some() {
            self.endpoint = live.address.clone();
        }
        if live.cpu.is_some() {
            self.cpu = live.cpu;
        }
        if live.vcpu.is_some() {
            self.vcpu = live.vcpu;
        }
        if live.memory.is_some() {
            self.memory = live.memory;
        }
        if live.disk_size.is_some() {
            self.disk_size = live.disk_size;
        }
    }
}

/// Placement hints forwarded with the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Scheduling {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    /// Requirement expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<String>,
}

/// Information about the device the runtime serves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DeviceInfo {
    /// Latency to the processing edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_to_pe: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geographic_location: Option<String>,
}

/// What a client declares when asking for a runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RuntimeSpecification {
    /// Explicit runtime name. Derived from the flavour tuple when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Compute-function component (required).
    pub faas: ComponentRequest,
    /// Data-function component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daas: Option<ComponentRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

impl RuntimeSpecification {
    /// A specification with only a FaaS flavour.
    pub fn new(faas_flavour: impl Into<String>) -> Self {
        Self {
            faas: ComponentRequest::with_flavour(faas_flavour),
            ..Default::default()
        }
    }

    /// Add a DaaS component with the given flavour.
    pub fn with_daas(mut self, flavour: impl Into<String>) -> Self {
        self.daas = Some(ComponentRequest::with_flavour(flavour));
        self
    }

    /// Set an explicit runtime name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Key used to look up the service template: `<faas>` or `<faas>-<daas>`.
    pub fn tuple_key(&self) -> String {
        match &self.daas {
            Some(daas) => format!("{}-{}", self.faas.flavour, daas.flavour),
            None => self.faas.flavour.clone(),
        }
    }

    /// The name the runtime will be registered under.
    ///
    /// An explicit non-blank name wins; otherwise the tuple key is suffixed
    /// with a random UUID so concurrent creates never collide.
    pub fn derive_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}_{}", self.tuple_key(), Uuid::new_v4()),
        }
    }
}

/// Attributes of a compute instance as reported by the platform.
///
/// Ephemeral: only ever merged into a [`ComponentDescriptor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveInstanceAttributes {
    /// Instance identifier.
    pub id: InstanceId,
    /// State label.
    pub state: String,
    /// Address of the first network interface.
    pub address: Option<String>,
    pub cpu: Option<f64>,
    pub vcpu: Option<u32>,
    /// Memory in MiB.
    pub memory: Option<u64>,
    /// Size of the first disk in MiB.
    pub disk_size: Option<u64>,
}

/// Result of a successful synchronization round.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Service that was synchronized.
    pub service_id: ServiceId,
    /// Instance backing the first role.
    pub faas: LiveInstanceAttributes,
    /// Instance backing the second role, if the service has one.
    pub daas: Option<LiveInstanceAttributes>,
    /// Number of rounds it took to observe the instances.
    pub rounds: u64,
}

/// Persisted body of a runtime, everything except the store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RuntimeBody {
    /// Immutable after creation.
    pub name: String,
    /// User that created the runtime.
    pub owner: String,
    /// Backing platform service; never reassigned to a different service.
    pub service_id: ServiceId,
    pub faas: ComponentDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daas: Option<ComponentDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    /// Set at creation; never exposed to clients.
    pub registration_time: DateTime<Utc>,
}

impl RuntimeBody {
    /// Build the body of a runtime whose service has just been synchronized.
    pub fn from_specification(
        spec: RuntimeSpecification,
        owner: impl Into<String>,
        report: &SyncReport,
    ) -> Self {
        let name = spec.derive_name();
        let mut body = Self {
            name,
            owner: owner.into(),
            service_id: report.service_id,
            faas: spec.faas.into(),
            daas: spec.daas.map(Into::into),
            scheduling: spec.scheduling,
            device_info: spec.device_info,
            registration_time: Utc::now(),
        };
        body.apply_sync(report);
        body
    }

    /// Fold a synchronization report into the component descriptors.
    ///
    /// The first role always lands in FAAS. The second role only lands in
    /// DAAS when the runtime declared a DaaS component.
    pub fn apply_sync(&mut self, report: &SyncReport) {
        self.faas.apply_live(&report.faas);
        if let (Some(daas), Some(live)) = (self.daas.as_mut(), report.daas.as_ref()) {
            daas.apply_live(live);
        }
    }
}

/// A runtime as held by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RuntimeDocument {
    /// Assigned by the store on allocation, immutable thereafter.
    pub id: RuntimeId,
    pub body: RuntimeBody,
}

impl RuntimeDocument {
    /// Synchronize this document with a report about its own service.
    ///
    /// Reports about any other service are ignored and `false` is returned.
    pub fn apply_sync(&mut self, report: &SyncReport) -> bool {
        if report.service_id != self.body.service_id {
            return false;
        }
        self.body.apply_sync(report);
        true
    }

    /// Project into the shape returned to clients.
    pub fn to_client_view(&self) -> ServerlessRuntime<ClientRuntime> {
        ServerlessRuntime {
            serverless_runtime: ClientRuntime {
                name: self.body.name.clone(),
                id: self.id,
                service_id: self.body.service_id,
                faas: self.body.faas.clone(),
                daas: self.body.daas.clone(),
                scheduling: self.body.scheduling.clone(),
                device_info: self.body.device_info.clone(),
            },
        }
    }
}

/// Client-facing projection of a [`RuntimeDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ClientRuntime {
    pub name: String,
    pub id: RuntimeId,
    pub service_id: ServiceId,
    pub faas: ComponentDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daas: Option<ComponentDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<Scheduling>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

/// Top-level wire envelope: `{"SERVERLESS_RUNTIME": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerlessRuntime<T> {
    #[serde(rename = "SERVERLESS_RUNTIME")]
    pub serverless_runtime: T,
}
