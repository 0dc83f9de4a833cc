//! Ownership-transfer client.
//!
//! `POST {endpoint}` with `{tokenId, newOwnerEmail}` and the caller's identity
//! token as bearer credentials. The endpoint answers with an [`ActionStatus`]
//! body for both outcomes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::config::Config;
use crate::errors::GatewayError;
use crate::models::ActionStatus;

/// Identity-provider capability: the current user's id token, if signed in.
#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    async fn get_auth_token(&self) -> Option<String>;
}

/// A fixed identity token (CLI usage, tests).
#[derive(Debug, Clone, Default)]
pub struct StaticAuthToken(pub Option<String>);

#[async_trait]
impl AuthTokenProvider for StaticAuthToken {
    async fn get_auth_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest<'a> {
    token_id: &'a str,
    new_owner_email: &'a str,
}

#[derive(Clone)]
pub struct TransferClient {
    client: reqwest::Client,
    endpoint: Url,
    auth: Arc<dyn AuthTokenProvider>,
}

impl TransferClient {
    pub fn new(
        endpoint: &str,
        auth: Arc<dyn AuthTokenProvider>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| GatewayError::Parse(format!("invalid transfer url: {}", e)))?;
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            auth,
        })
    }

    /// Build a client from config; `None` when no transfer endpoint is set.
    pub fn from_config(
        cfg: &Config,
        auth: Arc<dyn AuthTokenProvider>,
    ) -> Result<Option<Self>, GatewayError> {
        match cfg.transfer_url.as_deref() {
            Some(endpoint) => Ok(Some(Self::new(
                endpoint,
                auth,
                Duration::from_secs(cfg.http_timeout_secs),
            )?)),
            None => Ok(None),
        }
    }

    pub async fn transfer(
        &self,
        token_id: &str,
        new_owner_email: &str,
    ) -> Result<ActionStatus, GatewayError> {
        let Some(id_token) = self.auth.get_auth_token().await else {
            return Ok(ActionStatus::failure(
                "You must be signed in to transfer a token",
            ));
        };

        let resp = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(id_token)
            .json(&TransferRequest {
                token_id,
                new_owner_email,
            })
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        match serde_json::from_str::<ActionStatus>(&body) {
            Ok(result) => {
                tracing::info!(
                    token_id,
                    status = %status,
                    successful = result.is_successful,
                    "ownership transfer answered"
                );
                Ok(result)
            }
            Err(_) if !status.is_success() => Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(GatewayError::Parse(format!(
                "invalid transfer response: {}",
                e
            ))),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, token: Option<&str>) -> TransferClient {
        TransferClient::new(
            &format!("{}/transferToken", server.uri()),
            Arc::new(StaticAuthToken(token.map(String::from))),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_transfer_posts_body_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transferToken"))
            .and(header("authorization", "Bearer id-123"))
            .and(body_json(serde_json::json!({
                "tokenId": "tok1",
                "newOwnerEmail": "new@example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "isSuccessful": true,
                "message": "Token transferred"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let status = client(&server, Some("id-123"))
            .transfer("tok1", "new@example.com")
            .await
            .unwrap();
        assert!(status.is_successful);
        assert_eq!(status.message.as_deref(), Some("Token transferred"));
    }

    #[tokio::test]
    async fn test_failure_body_is_returned_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "isSuccessful": false,
                "message": "No user with that email"
            })))
            .mount(&server)
            .await;

        let status = client(&server, Some("id"))
            .transfer("tok1", "ghost@example.com")
            .await
            .unwrap();
        assert!(!status.is_successful);
        assert_eq!(status.message.as_deref(), Some("No user with that email"));
    }

    #[tokio::test]
    async fn test_server_error_without_status_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server, Some("id"))
            .transfer("tok1", "a@b.co")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_signed_out_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let status = client(&server, None).transfer("tok1", "a@b.co").await.unwrap();
        assert!(!status.is_successful);
    }
}
