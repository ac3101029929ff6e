// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Client for the provision engine HTTP API.
//!
//! ```no_run
//! # async fn demo() -> Result<(), pe_client::ClientError> {
//! use pe_client::EngineClient;
//! use serde_json::json;
//!
//! let client = EngineClient::new("http://localhost:1337", "oneadmin:opennebula")?;
//! let response = client
//!     .create(&json!({"SERVERLESS_RUNTIME": {"FAAS": {"FLAVOUR": "small"}}}))
//!     .await?;
//! println!("{} {:?}", response.status, response.body);
//! # Ok(())
//! # }
//! ```

use pe_core::{ClientRuntime, RuntimeId, ServerlessRuntime};
use pe_error::{EngineError, EngineErrorDto, ErrorCode};
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::debug;

/// Errors raised before or while talking to the engine.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Credentials are not in `user:pass` form.
    #[error("invalid auth data, expected <user>:<password>")]
    InvalidAuth,

    /// The endpoint is not an absolute http(s) URL.
    #[error("invalid engine endpoint '{0}'")]
    InvalidEndpoint(String),

    /// The request could not be sent or the response not read.
    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl From<ClientError> for EngineError {
    fn from(err: ClientError) -> Self {
        let code = match err {
            ClientError::InvalidAuth => ErrorCode::Unauthenticated,
            ClientError::InvalidEndpoint(_) => ErrorCode::ConfigInvalid,
            ClientError::Transport(_) => ErrorCode::Internal,
        };
        EngineError::new(code, err.to_string()).with_source(err)
    }
}

/// Status and decoded body of an engine response.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body, `None` when the body is empty or not JSON.
    pub body: Option<Value>,
}

impl EngineResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode a successful runtime response, or turn an error body into the
    /// [`EngineError`] the engine reported.
    pub fn into_runtime(self) -> Result<ClientRuntime, EngineError> {
        let success = self.is_success();
        let body = self.body.unwrap_or(Value::Null);
        if success {
            return serde_json::from_value::<ServerlessRuntime<ClientRuntime>>(body)
                .map(|wrapper| wrapper.serverless_runtime)
                .map_err(|e| {
                    EngineError::internal(format!("unexpected engine response: {e}")).with_source(e)
                });
        }
        match serde_json::from_value::<EngineErrorDto>(body) {
            Ok(dto) => Err(dto.into()),
            Err(_) => Err(EngineError::internal(format!(
                "engine responded {} without an error body",
                self.status
            ))),
        }
    }
}

/// Engine API client bound to one endpoint and one set of credentials.
#[derive(Debug, Clone)]
pub struct EngineClient {
    http: Client,
    endpoint: String,
    user: String,
    pass: String,
}

impl EngineClient {
    /// Bind to `endpoint` with `auth` in the form `user:pass`.
    pub fn new(endpoint: &str, auth: &str) -> Result<Self, ClientError> {
        Self::with_client(Client::new(), endpoint, auth)
    }

    /// Like [`EngineClient::new`] with a preconfigured HTTP client.
    pub fn with_client(http: Client, endpoint: &str, auth: &str) -> Result<Self, ClientError> {
        let endpoint = endpoint.trim_end_matches('/');
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ClientError::InvalidEndpoint(endpoint.to_string()));
        }
        let (user, pass) = auth.split_once(':').ok_or(ClientError::InvalidAuth)?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            user: user.to_string(),
            pass: pass.to_string(),
        })
    }

    /// Endpoint the client is bound to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.endpoint))
            .basic_auth(&self.user, Some(&self.pass))
    }

    async fn send(&self, request: RequestBuilder) -> Result<EngineResponse, ClientError> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes).ok();
        debug!(status, "engine responded");
        Ok(EngineResponse { status, body })
    }

    /// `POST /serverless-runtimes`
    pub async fn create(&self, specification: &Value) -> Result<EngineResponse, ClientError> {
        self.send(
            self.request(Method::POST, "/serverless-runtimes")
                .json(specification),
        )
        .await
    }

    /// `GET /serverless-runtimes/{id}`
    pub async fn get(&self, id: RuntimeId) -> Result<EngineResponse, ClientError> {
        self.send(self.request(Method::GET, &format!("/serverless-runtimes/{id}")))
            .await
    }

    /// `PUT /serverless-runtimes/{id}`
    pub async fn update(
        &self,
        id: RuntimeId,
        specification: &Value,
    ) -> Result<EngineResponse, ClientError> {
        self.send(
            self.request(Method::PUT, &format!("/serverless-runtimes/{id}"))
                .json(specification),
        )
        .await
    }

    /// `DELETE /serverless-runtimes/{id}`
    pub async fn delete(&self, id: RuntimeId) -> Result<EngineResponse, ClientError> {
        self.send(self.request(Method::DELETE, &format!("/serverless-runtimes/{id}")))
            .await
    }
}
