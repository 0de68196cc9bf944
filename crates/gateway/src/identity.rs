//! Client for the identity service: token validation and the module directory.

use std::time::Duration;

use {
    anyhow::Context,
    reqwest::{
        StatusCode,
        header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue},
    },
    secrecy::ExposeSecret,
    serde_json::{Map, Value},
    tracing::debug,
};

use {
    gatehouse_config::{HttpConfig, IdentityConfig},
    gatehouse_protocol::message::id_key,
};

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity service unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("identity service answered HTTP {0}")]
    Status(u16),
    #[error("identity service returned an empty body")]
    EmptyBody,
    #[error("identity service returned malformed JSON")]
    Malformed,
    #[error("identity response carries no user id")]
    MissingUserId,
}

/// A verified user as reported by `GET /token/{token}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// String form of the `id` field, used for counters and headers.
    pub user_id: String,
    /// The `id` field exactly as received (number or string).
    pub raw_id: Value,
    /// The full response object.
    pub attributes: Map<String, Value>,
}

pub struct IdentityClient {
    client: reqwest::Client,
    base_url: String,
}

impl IdentityClient {
    pub fn new(
        base_url: &str,
        api_token: Option<&str>,
        timeout: Duration,
        user_agent: &str,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = api_token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .context("identity api token is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .context("failed to build identity HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(identity: &IdentityConfig, http: &HttpConfig) -> anyhow::Result<Self> {
        Self::new(
            &identity.base_url,
            identity.api_token.as_ref().map(|t| t.expose_secret().as_str()),
            Duration::from_secs(identity.timeout_secs),
            &http.user_agent,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Validate a client token.
    ///
    /// Only a `200` with a non-empty JSON object carrying `id` succeeds.
    pub async fn verify_token(&self, token: &str) -> Result<Identity, IdentityError> {
        let url = format!("{}/token/{}", self.base_url, urlencoding::encode(token));
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "token rejected by identity service");
            return Err(IdentityError::Status(status.as_u16()));
        }

        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Err(IdentityError::EmptyBody);
        }
        let Ok(Value::Object(attributes)) = serde_json::from_str::<Value>(&body) else {
            return Err(IdentityError::Malformed);
        };

        let raw_id = attributes.get("id").cloned().unwrap_or(Value::Null);
        let user_id = id_key(&raw_id).ok_or(IdentityError::MissingUserId)?;
        Ok(Identity {
            user_id,
            raw_id,
            attributes,
        })
    }

    /// Fetch the raw module directory (`GET /modules`).
    pub async fn fetch_modules(&self) -> Result<Vec<Value>, IdentityError> {
        let url = format!("{}/modules", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(IdentityError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;
        serde_json::from_slice::<Vec<Value>>(&body).map_err(|_| IdentityError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn client(server: &mockito::Server) -> IdentityClient {
        IdentityClient::new(
            &server.url(),
            Some("svc-token"),
            Duration::from_secs(5),
            "LAE-Gateway",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn verifies_token_and_sends_service_credentials() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/token/valid123")
            .match_header("authorization", "Bearer svc-token")
            .match_header("accept", "application/json")
            .match_header("user-agent", "LAE-Gateway")
            .with_status(200)
            .with_body(r#"{"id":42,"name":"ada"}"#)
            .create_async()
            .await;

        let identity = client(&server).verify_token("valid123").await.unwrap();
        assert_eq!(identity.user_id, "42");
        assert_eq!(identity.raw_id, json!(42));
        assert_eq!(identity.attributes.get("name"), Some(&json!("ada")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn token_is_path_encoded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/token/a%2Fb")
            .with_status(200)
            .with_body(r#"{"id":"u1"}"#)
            .create_async()
            .await;

        let identity = client(&server).verify_token("a/b").await.unwrap();
        assert_eq!(identity.user_id, "u1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_200_is_status_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/token/bad")
            .with_status(404)
            .create_async()
            .await;

        let err = client(&server).verify_token("bad").await.unwrap_err();
        assert!(matches!(err, IdentityError::Status(404)));
    }

    #[tokio::test]
    async fn empty_and_malformed_bodies() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/token/empty")
            .with_status(200)
            .with_body("  ")
            .create_async()
            .await;
        server
            .mock("GET", "/token/junk")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;
        server
            .mock("GET", "/token/noid")
            .with_status(200)
            .with_body(r#"{"name":"ada"}"#)
            .create_async()
            .await;

        let c = client(&server);
        assert!(matches!(
            c.verify_token("empty").await,
            Err(IdentityError::EmptyBody)
        ));
        assert!(matches!(
            c.verify_token("junk").await,
            Err(IdentityError::Malformed)
        ));
        assert!(matches!(
            c.verify_token("noid").await,
            Err(IdentityError::MissingUserId)
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_error() {
        // Port 9 (discard) on loopback is never served in test environments.
        let c = IdentityClient::new(
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(2),
            "LAE-Gateway",
        )
        .unwrap();
        assert!(matches!(
            c.verify_token("x").await,
            Err(IdentityError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn fetches_module_directory() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/modules")
            .with_status(200)
            .with_body(r#"[{"id":7,"url":"https://svc.example/","api_token":"t7"}]"#)
            .create_async()
            .await;

        let modules = client(&server).fetch_modules().await.unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0]["id"], json!(7));
    }

    #[tokio::test]
    async fn directory_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/modules")
            .with_status(503)
            .create_async()
            .await;
        assert!(matches!(
            client(&server).fetch_modules().await,
            Err(IdentityError::Status(503))
        ));
    }
}
