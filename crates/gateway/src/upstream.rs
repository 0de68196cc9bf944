//! Outbound calls to module backends.

use std::time::Duration;

use {
    anyhow::Context,
    reqwest::Method,
    serde_json::{Map, Value},
};

use gatehouse_protocol::{HttpMethod, InboundMessage};

use crate::{auth::Session, registry::Module};

pub const MODULE_TOKEN_HEADER: &str = "X-Module-Api-Token";
pub const USER_ID_HEADER: &str = "X-User-Id";

/// A fully resolved call to a module function.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Map<String, Value>,
    pub api_token: String,
    pub user_id: String,
}

impl ForwardRequest {
    /// Combine a validated message with its resolved module and the caller's
    /// session. The session's id overrides any `user_id` the client sent.
    pub fn build(module: &Module, message: &InboundMessage, session: &Session) -> Self {
        let mut body = message.data.clone();
        body.insert("user_id".into(), session.raw_id.clone());
        Self {
            method: message.method,
            url: module.function_url(&message.path),
            body,
            api_token: module.api_token.clone(),
            user_id: session.user_id.clone(),
        }
    }
}

/// How a forwarded call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamOutcome {
    /// The backend answered, with any status.
    Response { status: u16, body: Value },
    /// No response: connect error, timeout or a broken body.
    Failed(String),
}

pub struct ModuleClient {
    client: reqwest::Client,
}

impl ModuleClient {
    pub fn new(timeout: Duration, user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .context("failed to build module HTTP client")?;
        Ok(Self { client })
    }

    pub async fn forward(&self, req: &ForwardRequest) -> UpstreamOutcome {
        let result = self
            .client
            .request(to_reqwest(req.method), &req.url)
            .header(MODULE_TOKEN_HEADER, &req.api_token)
            .header(USER_ID_HEADER, &req.user_id)
            .json(&req.body)
            .send()
            .await;
        let resp = match result {
            Ok(resp) => resp,
            Err(e) => return UpstreamOutcome::Failed(e.to_string()),
        };
        let status = resp.status().as_u16();
        match resp.text().await {
            Ok(text) => UpstreamOutcome::Response {
                status,
                body: decode_body(&text),
            },
            Err(e) => UpstreamOutcome::Failed(e.to_string()),
        }
    }
}

fn to_reqwest(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// JSON bodies are relayed as parsed, anything else as a string, and an
/// empty body as `null`.
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
