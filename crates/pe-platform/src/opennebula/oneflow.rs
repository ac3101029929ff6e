// SPDX-License-Identifier: MIT OR Apache-2.0
//! OneFlow JSON document shapes.
//!
//! OneFlow wraps everything in `DOCUMENT` / `DOCUMENT_POOL` envelopes and
//! serialises numeric ids as strings, so ids are accepted in either form.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{PlatformError, RoleNode, ServiceDocument, ServiceRole, ServiceTemplate};

fn id_from_value<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("id {n} is not a non-negative integer"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("id '{s}' is not numeric"))),
        other => Err(D::Error::custom(format!("unexpected id {other}"))),
    }
}

fn opt_id_from_value<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Id(#[serde(deserialize_with = "id_from_value")] u64);

    Ok(Option::<Id>::deserialize(deserializer)?.map(|Id(id)| id))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(v: OneOrMany<T>) -> Self {
        match v {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
struct PoolEnvelope {
    #[serde(rename = "DOCUMENT_POOL")]
    pool: Pool,
}

#[derive(Deserialize, Default)]
struct Pool {
    #[serde(rename = "DOCUMENT", default)]
    documents: Option<OneOrMany<RawDocument>>,
}

#[derive(Deserialize)]
struct DocumentEnvelope {
    #[serde(rename = "DOCUMENT")]
    document: RawDocument,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(rename = "ID", deserialize_with = "id_from_value")]
    id: u64,
    #[serde(rename = "NAME", default)]
    name: Option<String>,
    #[serde(rename = "TEMPLATE", default)]
    template: Option<RawTemplate>,
}

#[derive(Deserialize, Default)]
struct RawTemplate {
    #[serde(rename = "BODY", default)]
    body: Option<RawBody>,
}

#[derive(Deserialize, Default)]
struct RawBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    roles: Vec<RawRole>,
}

#[derive(Deserialize, Default)]
struct RawRole {
    #[serde(default)]
    name: String,
    #[serde(default)]
    nodes: Vec<RawNode>,
}

#[derive(Deserialize, Default)]
struct RawNode {
    #[serde(default)]
    vm_info: Option<RawVmInfo>,
}

#[derive(Deserialize, Default)]
struct RawVmInfo {
    #[serde(rename = "VM", default)]
    vm: Option<RawVm>,
}

#[derive(Deserialize, Default)]
struct RawVm {
    #[serde(rename = "ID", default, deserialize_with = "opt_id_from_value")]
    id: Option<u64>,
}

impl RawDocument {
    fn body(&self) -> Option<&RawBody> {
        self.template.as_ref().and_then(|t| t.body.as_ref())
    }
}

/// Parse a `GET /service_template` response.
pub(crate) fn parse_template_pool(value: Value) -> Result<Vec<ServiceTemplate>, PlatformError> {
    let envelope: PoolEnvelope = serde_json::from_value(value)
        .map_err(|e| PlatformError::Malformed(format!("service template pool: {e}")))?;
    let documents: Vec<RawDocument> = envelope.pool.documents.map(Vec::from).unwrap_or_default();
    Ok(documents
        .into_iter()
        .map(|doc| {
            // The template body name is what the tuple is matched against;
            // the document NAME is the fallback for minimal documents.
            let name = doc
                .body()
                .and_then(|b| b.name.clone())
                .or_else(|| doc.name.clone())
                .unwrap_or_default();
            ServiceTemplate { id: doc.id, name }
        })
        .collect())
}

/// Parse a `GET /service/{id}` or instantiate response.
pub(crate) fn parse_service(value: Value) -> Result<ServiceDocument, PlatformError> {
    let envelope: DocumentEnvelope = serde_json::from_value(value)
        .map_err(|e| PlatformError::Malformed(format!("service document: {e}")))?;
    let doc = envelope.document;
    let roles = doc
        .body()
        .map(|body| {
            body.roles
                .iter()
                .map(|role| ServiceRole {
                    name: role.name.clone(),
                    nodes: role
                        .nodes
                        .iter()
                        .map(|node| RoleNode {
                            instance: node
                                .vm_info
                                .as_ref()
                                .and_then(|info| info.vm.as_ref())
                                .and_then(|vm| vm.id),
                        })
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(ServiceDocument { id: doc.id, roles })
}

/// Extract a human-readable message from a OneFlow error body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
