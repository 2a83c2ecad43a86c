//! HTTP client for the credential broker.
//!
//! The broker owns the secret store and the cloud credentials. kiln sends it
//! encrypted references and ECR coordinates and gets plaintext and pull
//! tokens back.

use std::time::Duration;

use async_trait::async_trait;
use kiln_core::{AuthContext, DecryptError, EncryptedRef, Plaintext, SecretDecryptor};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};
use crate::secrets::{AwsCredentials, EcrAuthorization, RegistryTokenExchange};

/// HTTP client implementing [`SecretDecryptor`] and [`RegistryTokenExchange`].
#[derive(Debug, Clone)]
pub struct HttpCredentialBroker {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCredentialBroker {
    /// Create a broker client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the broker (e.g., "http://credential-broker:8080")
    ///
    /// # Errors
    ///
    /// Returns `Config` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url))
    }

    /// Create a broker client with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL of the broker.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, Serialize)]
struct DecryptRequest<'a> {
    reference: &'a str,
    account_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct DecryptResponse {
    plaintext: String,
}

#[derive(Debug, Serialize)]
struct EcrTokenRequest<'a> {
    account: &'a str,
    region: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_key_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_key: Option<&'a str>,
}

/// Error response from the broker.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    response
        .json::<ErrorResponse>()
        .await
        .map(|e| e.error)
        .unwrap_or_else(|_| format!("broker returned status {status}"))
}

#[async_trait]
impl SecretDecryptor for HttpCredentialBroker {
    async fn decrypt(
        &self,
        value: &EncryptedRef,
        ctx: &AuthContext,
    ) -> kiln_core::Result<Plaintext> {
        let url = format!("{}/v1/decrypt", self.base_url);
        let reference = value.as_str();

        let response = self
            .client
            .post(&url)
            .json(&DecryptRequest {
                reference,
                account_id: &ctx.account_id,
            })
            .send()
            .await
            .map_err(|e| DecryptError::Unavailable(format!("broker request failed: {e}")))?;

        match response.status() {
            status if status.is_success() => {
                let body: DecryptResponse =
                    response.json().await.map_err(|e| DecryptError::Malformed {
                        reference: reference.to_string(),
                        reason: format!("unreadable broker response: {e}"),
                    })?;
                tracing::debug!(reference, "Decrypted secret reference");
                Ok(Plaintext::new(body.plaintext))
            }
            StatusCode::NOT_FOUND => Err(DecryptError::NotFound(reference.to_string())),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                Err(DecryptError::AccessDenied(reference.to_string()))
            }
            status => {
                let error = error_message(response).await;
                tracing::warn!(reference, status = %status, error = %error, "Decryption failed");
                Err(DecryptError::Unavailable(error))
            }
        }
    }
}

#[async_trait]
impl RegistryTokenExchange for HttpCredentialBroker {
    async fn ecr_authorization(
        &self,
        credentials: &AwsCredentials,
        account: &str,
        region: &str,
    ) -> Result<EcrAuthorization> {
        let url = format!("{}/v1/ecr/token", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&EcrTokenRequest {
                account,
                region,
                access_key_id: credentials.access_key_id.as_deref(),
                secret_key: credentials.secret_key.as_ref().map(Plaintext::expose),
            })
            .send()
            .await
            .map_err(|e| OrchestratorError::InvalidRequest(format!("broker request failed: {e}")))?;

        if response.status().is_success() {
            tracing::debug!(account, region, "Obtained ECR authorization");
            response
                .json::<EcrAuthorization>()
                .await
                .map_err(|e| OrchestratorError::InvalidRequest(format!("Failed to parse response: {e}")))
        } else {
            let status = response.status();
            let error = error_message(response).await;
            tracing::error!(account, region, status = %status, error = %error, "ECR token exchange failed");
            Err(OrchestratorError::InvalidRequest(format!("Broker error: {error}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn broker(server: &MockServer) -> HttpCredentialBroker {
        HttpCredentialBroker::new(server.uri()).unwrap()
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let broker = HttpCredentialBroker::new("http://broker:8080/").unwrap();
        assert_eq!(broker.base_url(), "http://broker:8080");
    }

    #[tokio::test]
    async fn decrypt_sends_reference_and_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/decrypt"))
            .and(body_json(serde_json::json!({
                "reference": "acct/docker-pass",
                "account_id": "acct",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"plaintext": "hunter2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let plaintext = broker(&server)
            .decrypt(&EncryptedRef::new("acct/docker-pass"), &AuthContext::new("acct"))
            .await
            .unwrap();
        assert_eq!(plaintext.expose(), "hunter2");
    }

    #[tokio::test]
    async fn decrypt_status_mapping() {
        let server = MockServer::start().await;
        for (reference, status) in [("missing", 404), ("forbidden", 403), ("broken", 503)] {
            Mock::given(method("POST"))
                .and(path("/v1/decrypt"))
                .and(body_json(serde_json::json!({"reference": reference, "account_id": "acct"})))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;
        }
        let broker = broker(&server);
        let ctx = AuthContext::new("acct");

        let err = broker.decrypt(&EncryptedRef::new("missing"), &ctx).await.unwrap_err();
        assert!(matches!(err, DecryptError::NotFound(r) if r == "missing"));

        let err = broker.decrypt(&EncryptedRef::new("forbidden"), &ctx).await.unwrap_err();
        assert!(matches!(err, DecryptError::AccessDenied(_)));

        let err = broker.decrypt(&EncryptedRef::new("broken"), &ctx).await.unwrap_err();
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn decrypt_unreachable_broker_is_retriable() {
        let broker = HttpCredentialBroker::new("http://127.0.0.1:1").unwrap();
        let err = broker
            .decrypt(&EncryptedRef::new("ref"), &AuthContext::new("acct"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecryptError::Unavailable(_)));
    }

    #[tokio::test]
    async fn ecr_token_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/ecr/token"))
            .and(body_json(serde_json::json!({
                "account": "123456789012",
                "region": "us-east-1",
                "access_key_id": "AKIA",
                "secret_key": "s3cr3t",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": "QVdTOnB3",
                "proxy_endpoint": "https://123456789012.dkr.ecr.us-east-1.amazonaws.com",
            })))
            .mount(&server)
            .await;

        let credentials = AwsCredentials {
            access_key_id: Some("AKIA".into()),
            secret_key: Some(Plaintext::new("s3cr3t")),
        };
        let auth = broker(&server)
            .ecr_authorization(&credentials, "123456789012", "us-east-1")
            .await
            .unwrap();
        assert_eq!(auth.token, "QVdTOnB3");
        assert!(auth.proxy_endpoint.unwrap().starts_with("https://123456789012"));
    }

    #[tokio::test]
    async fn ecr_rejection_carries_broker_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/ecr/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "unknown region mars-1"})),
            )
            .mount(&server)
            .await;

        let err = broker(&server)
            .ecr_authorization(&AwsCredentials::default(), "123456789012", "mars-1")
            .await
            .unwrap_err();
        assert_eq!(err.category(), "InvalidRequestError");
        assert!(err.to_string().contains("unknown region mars-1"));
    }
}
