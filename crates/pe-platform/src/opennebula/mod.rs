// SPDX-License-Identifier: MIT OR Apache-2.0
//! OpenNebula-backed [`PlatformGateway`].
//!
//! Services and templates go through the OneFlow REST API; instance details
//! come from oned over XML-RPC (`one.vm.info`).

mod oneflow;
mod xmlrpc;

use std::sync::Arc;

use async_trait::async_trait;
use pe_config::EngineConfig;
use pe_core::{InstanceId, LiveInstanceAttributes, ServiceId};
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    Credentials, PlatformConnector, PlatformError, PlatformGateway, ServiceDocument,
    ServiceTemplate, TemplateId,
};

/// Connector that hands out OpenNebula gateways sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct OpenNebulaConnector {
    client: Client,
    oneflow: String,
    xmlrpc: String,
}

impl OpenNebulaConnector {
    /// Build a connector for the endpoints in `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self::with_client(
            client,
            &config.oneflow_server,
            &config.one_xmlrpc,
        ))
    }

    /// Build a connector from an existing client and explicit endpoints.
    pub fn with_client(client: Client, oneflow: &str, xmlrpc: &str) -> Self {
        Self {
            client,
            oneflow: oneflow.trim_end_matches('/').to_string(),
            xmlrpc: xmlrpc.to_string(),
        }
    }
}

impl PlatformConnector for OpenNebulaConnector {
    fn connect(&self, credentials: &Credentials) -> Arc<dyn PlatformGateway> {
        Arc::new(OpenNebulaGateway {
            client: self.client.clone(),
            oneflow: self.oneflow.clone(),
            xmlrpc: self.xmlrpc.clone(),
            credentials: credentials.clone(),
        })
    }
}

struct OpenNebulaGateway {
    client: Client,
    oneflow: String,
    xmlrpc: String,
    credentials: Credentials,
}

impl OpenNebulaGateway {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.oneflow)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    async fn checked(response: Response) -> Result<Response, PlatformError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = oneflow::error_message(&body);
        Err(PlatformError::status(
            status.as_u16(),
            if message.is_empty() {
                status.to_string()
            } else {
                message
            },
        ))
    }

    async fn json(response: Response) -> Result<Value, PlatformError> {
        let response = Self::checked(response).await?;
        response
            .json()
            .await
            .map_err(|e| PlatformError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl PlatformGateway for OpenNebulaGateway {
    async fn list_service_templates(&self) -> Result<Vec<ServiceTemplate>, PlatformError> {
        let response = self
            .authed(self.client.get(self.url("/service_template")))
            .send()
            .await?;
        oneflow::parse_template_pool(Self::json(response).await?)
    }

    async fn instantiate_service(
        &self,
        template_id: TemplateId,
    ) -> Result<ServiceDocument, PlatformError> {
        debug!(target: "pe_platform", template_id, "instantiating service template");
        let body = json!({"action": {"perform": "instantiate", "params": {}}});
        let response = self
            .authed(
                self.client
                    .post(self.url(&format!("/service_template/{template_id}/action")))
                    .json(&body),
            )
            .send()
            .await?;
        oneflow::parse_service(Self::json(response).await?)
    }

    async fn get_service(&self, service_id: ServiceId) -> Result<ServiceDocument, PlatformError> {
        let response = self
            .authed(self.client.get(self.url(&format!("/service/{service_id}"))))
            .send()
            .await?;
        oneflow::parse_service(Self::json(response).await?)
    }

    async fn delete_service(&self, service_id: ServiceId) -> Result<(), PlatformError> {
        let response = self
            .authed(self.client.delete(self.url(&format!("/service/{service_id}"))))
            .send()
            .await?;
        Self::checked(response).await.map(|_| ())
    }

    async fn get_instance(
        &self,
        instance_id: InstanceId,
    ) -> Result<LiveInstanceAttributes, PlatformError> {
        let body = xmlrpc::vm_info_request(&self.credentials.session(), instance_id);
        let response = self
            .client
            .post(&self.xmlrpc)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;
        let text = Self::checked(response).await?.text().await?;
        xmlrpc::parse_vm_info_response(&text)
    }
}
