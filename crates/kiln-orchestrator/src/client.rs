//! Resolving a cluster connector into a gateway.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use kiln_core::{AuthContext, ClusterAuth, ClusterConnector, SecretDecryptor};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::gateway::ClusterGateway;
use crate::kube_gateway::KubeGateway;
use crate::types::OrchestratorConfig;
use crate::{OrchestratorError, Result};

const CONTEXT_NAME: &str = "kiln";

/// Turns a connector into a ready-to-use gateway.
#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    /// Resolve `connector`, decrypting credentials on behalf of `ctx`.
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the credentials cannot be decrypted, the
    /// client cannot be built, or connectivity verification fails.
    async fn resolve(
        &self,
        connector: &ClusterConnector,
        ctx: &AuthContext,
    ) -> Result<Arc<dyn ClusterGateway>>;
}

/// Factory producing [`KubeGateway`]s.
pub struct KubeClientFactory {
    decryptor: Arc<dyn SecretDecryptor>,
    config: OrchestratorConfig,
}

impl KubeClientFactory {
    /// Create a factory.
    #[must_use]
    pub fn new(decryptor: Arc<dyn SecretDecryptor>, config: OrchestratorConfig) -> Self {
        Self { decryptor, config }
    }

    async fn decrypt(&self, reference: &kiln_core::EncryptedRef, ctx: &AuthContext, what: &str) -> Result<String> {
        self.decryptor
            .decrypt_non_blank(reference, ctx)
            .await
            .map(kiln_core::Plaintext::into_inner)
            .map_err(|e| OrchestratorError::Resolution(format!("{what}: {e}")))
    }

    /// The in-memory kubeconfig document for a non-in-cluster connector.
    async fn kubeconfig(&self, connector: &ClusterConnector, ctx: &AuthContext) -> Result<Kubeconfig> {
        if let ClusterAuth::Kubeconfig { content } = &connector.auth {
            let yaml = self.decrypt(content, ctx, "kubeconfig").await?;
            return Kubeconfig::from_yaml(&yaml)
                .map_err(|e| OrchestratorError::Resolution(format!("invalid kubeconfig: {e}")));
        }

        let server = connector
            .master_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                OrchestratorError::Resolution(format!(
                    "master URL is required for {} auth",
                    connector.auth.mode()
                ))
            })?;

        let mut cluster = Map::new();
        cluster.insert("server".into(), json!(server));
        if connector.skip_tls_verify {
            cluster.insert("insecure-skip-tls-verify".into(), json!(true));
        }
        if let Some(ca) = &connector.ca_cert {
            let pem = self.decrypt(ca, ctx, "CA certificate").await?;
            cluster.insert("certificate-authority-data".into(), json!(STANDARD.encode(pem)));
        }

        let mut user = Map::new();
        match &connector.auth {
            ClusterAuth::ServiceAccountToken { token } => {
                user.insert("token".into(), json!(self.decrypt(token, ctx, "service account token").await?));
            }
            ClusterAuth::UsernamePassword { username, password } => {
                user.insert("username".into(), json!(username));
                user.insert("password".into(), json!(self.decrypt(password, ctx, "password").await?));
            }
            ClusterAuth::ClientCertificate { cert, key } => {
                let cert = self.decrypt(cert, ctx, "client certificate").await?;
                let key = self.decrypt(key, ctx, "client key").await?;
                user.insert("client-certificate-data".into(), json!(STANDARD.encode(cert)));
                user.insert("client-key-data".into(), json!(STANDARD.encode(key)));
            }
            ClusterAuth::InCluster | ClusterAuth::Kubeconfig { .. } => {}
        }

        let document = json!({
            "apiVersion": "v1",
            "kind": "Config",
            "clusters": [{ "name": CONTEXT_NAME, "cluster": Value::Object(cluster) }],
            "users": [{ "name": CONTEXT_NAME, "user": Value::Object(user) }],
            "contexts": [{
                "name": CONTEXT_NAME,
                "context": { "cluster": CONTEXT_NAME, "user": CONTEXT_NAME },
            }],
            "current-context": CONTEXT_NAME,
        });

        serde_json::from_value(document)
            .map_err(|e| OrchestratorError::Resolution(format!("kubeconfig assembly: {e}")))
    }

    async fn client_config(&self, connector: &ClusterConnector, ctx: &AuthContext) -> Result<Config> {
        if matches!(connector.auth, ClusterAuth::InCluster) {
            return Config::incluster()
                .map_err(|e| OrchestratorError::Resolution(format!("in-cluster config: {e}")));
        }

        let kubeconfig = self.kubeconfig(connector, ctx).await?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| OrchestratorError::Resolution(format!("client config: {e}")))
    }
}

#[async_trait]
impl ClusterClientFactory for KubeClientFactory {
    async fn resolve(
        &self,
        connector: &ClusterConnector,
        ctx: &AuthContext,
    ) -> Result<Arc<dyn ClusterGateway>> {
        let mode = connector.auth.mode();
        debug!(mode, master_url = ?connector.master_url, "Resolving cluster client");

        let config = self.client_config(connector, ctx).await?;
        let client = Client::try_from(config)
            .map_err(|e| OrchestratorError::Resolution(format!("client construction: {e}")))?;

        if self.config.verify_connectivity {
            let version = client.apiserver_version().await.map_err(|e| {
                OrchestratorError::Resolution(format!("API server unreachable: {e}"))
            })?;
            info!(mode, version = %version.git_version, "Connected to cluster");
        }

        Ok(Arc::new(KubeGateway::new(client, self.config.field_manager.clone())))
    }
}
