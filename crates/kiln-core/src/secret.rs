//! Secret references, decrypted material, and the decryption capability.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{DecryptError, Result};

/// A reference to an encrypted value held by the secret store.
///
/// The orchestrator never sees the ciphertext itself; it hands the reference
/// to a [`SecretDecryptor`] when the plaintext is needed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedRef(String);

impl EncryptedRef {
    /// Create a reference from its identifier.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Return the reference identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedRef({})", self.0)
    }
}

impl fmt::Display for EncryptedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A decrypted secret value. `Debug` never prints the contents.
#[derive(Clone, PartialEq, Eq)]
pub struct Plaintext(String);

impl Plaintext {
    /// Wrap a decrypted value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the decrypted value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the decrypted value.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns true if the decrypted value is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Plaintext(<redacted>)")
    }
}

/// Identity on whose behalf secrets are decrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Account that owns the build and its secrets.
    pub account_id: String,
}

impl AuthContext {
    /// Create a context for the given account.
    #[must_use]
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// How a secret value is consumed by a build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretKind {
    /// Injected verbatim as an environment value.
    #[default]
    Text,
    /// File content; injected as base64 text so the step can materialize it.
    File,
}

/// A build-time secret variable declared on a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretVariable {
    /// Variable name as seen by the build step.
    pub name: String,
    /// Whether the value is text or file content.
    #[serde(default)]
    pub kind: SecretKind,
    /// Encrypted value.
    pub value: EncryptedRef,
}

/// A decrypted key/value entry staged for a cluster Secret.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretMaterial {
    /// Text or file.
    pub kind: SecretKind,
    value: Vec<u8>,
}

impl SecretMaterial {
    /// Stage a decrypted value of the given kind.
    ///
    /// File content is stored as base64 text so that the environment value
    /// seen by the container is printable.
    #[must_use]
    pub fn new(kind: SecretKind, plaintext: &Plaintext) -> Self {
        let value = match kind {
            SecretKind::Text => plaintext.expose().as_bytes().to_vec(),
            SecretKind::File => STANDARD.encode(plaintext.expose()).into_bytes(),
        };
        Self { kind, value }
    }

    /// Stage a text value.
    #[must_use]
    pub fn text(plaintext: &Plaintext) -> Self {
        Self::new(SecretKind::Text, plaintext)
    }

    /// The bytes the container will observe.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.value
    }

    /// The base64 form written into the Secret's `data` map on the wire.
    #[must_use]
    pub fn encoded(&self) -> String {
        STANDARD.encode(&self.value)
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("kind", &self.kind)
            .field("len", &self.value.len())
            .finish()
    }
}

/// Capability that turns an encrypted reference into plaintext.
///
/// Implementations must be idempotent; a failure is terminal for the
/// secret-build step that requested it.
#[async_trait]
pub trait SecretDecryptor: Send + Sync {
    /// Decrypt a single reference on behalf of `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a [`DecryptError`] if the reference is unknown, inaccessible,
    /// malformed, or the backend is unreachable.
    async fn decrypt(&self, value: &EncryptedRef, ctx: &AuthContext) -> Result<Plaintext>;

    /// Decrypt a reference and reject blank payloads.
    ///
    /// # Errors
    ///
    /// Returns [`DecryptError::Malformed`] if the plaintext is blank, or any
    /// error from [`SecretDecryptor::decrypt`].
    async fn decrypt_non_blank(&self, value: &EncryptedRef, ctx: &AuthContext) -> Result<Plaintext> {
        let plaintext = self.decrypt(value, ctx).await?;
        if plaintext.is_blank() {
            return Err(DecryptError::Malformed {
                reference: value.to_string(),
                reason: "decrypted value is empty".to_string(),
            });
        }
        Ok(plaintext)
    }
}
