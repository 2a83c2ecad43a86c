//! Error types shared by kiln collaborators.

use thiserror::Error;

/// A result type using `DecryptError`.
pub type Result<T> = std::result::Result<T, DecryptError>;

/// Errors raised by a [`SecretDecryptor`](crate::SecretDecryptor).
#[derive(Debug, Error)]
pub enum DecryptError {
    /// The encrypted reference does not exist in the secret store.
    #[error("secret reference not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to read the referenced secret.
    #[error("access denied to secret reference {0}")]
    AccessDenied(String),

    /// The decrypted payload is not usable (empty, not UTF-8, ...).
    #[error("malformed secret {reference}: {reason}")]
    Malformed {
        /// The reference that produced the payload.
        reference: String,
        /// Why the payload was rejected.
        reason: String,
    },

    /// The decryption backend could not be reached.
    #[error("decryption backend unavailable: {0}")]
    Unavailable(String),
}

impl DecryptError {
    /// Returns true if retrying the decryption might succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retriable() {
        assert!(DecryptError::Unavailable("down".into()).is_retriable());
        assert!(!DecryptError::NotFound("ref".into()).is_retriable());
        assert!(!DecryptError::AccessDenied("ref".into()).is_retriable());
        assert!(!DecryptError::Malformed {
            reference: "ref".into(),
            reason: "empty".into()
        }
        .is_retriable());
    }

    #[test]
    fn messages_carry_reference() {
        let err = DecryptError::Malformed {
            reference: "account/docker-pass".into(),
            reason: "not utf-8".into(),
        };
        assert_eq!(
            err.to_string(),
            "malformed secret account/docker-pass: not utf-8"
        );
    }
}
