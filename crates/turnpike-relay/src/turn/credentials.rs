//! Long-term credentials (RFC 5389 Section 10.2).

use md5::{Digest, Md5};
use zeroize::Zeroizing;

/// Username, password, and the realm/nonce learned from challenges.
///
/// Until the first 401 arrives the realm and nonce are unknown and requests
/// go out unauthenticated.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
    realm: Option<String>,
    nonce: Option<String>,
}

impl Credentials {
    /// Create credentials with no realm or nonce yet.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
            realm: None,
            nonce: None,
        }
    }

    /// Username
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Realm from the last challenge
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// Nonce from the last challenge
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Whether a challenge has been answered, so requests should be signed
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.realm.is_some() && self.nonce.is_some()
    }

    /// Store a 401 challenge.
    pub fn set_challenge(&mut self, realm: impl Into<String>, nonce: impl Into<String>) {
        self.realm = Some(realm.into());
        self.nonce = Some(nonce.into());
    }

    /// Store a 438 replacement nonce.
    pub fn set_nonce(&mut self, nonce: impl Into<String>) {
        self.nonce = Some(nonce.into());
    }

    /// MESSAGE-INTEGRITY key: `MD5(username ":" realm ":" password)`.
    #[must_use]
    pub fn key(&self) -> Zeroizing<Vec<u8>> {
        let mut hasher = Md5::new();
        hasher.update(self.username.as_bytes());
        hasher.update(b":");
        hasher.update(self.realm.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b":");
        hasher.update(self.password.as_bytes());
        Zeroizing::new(hasher.finalize().to_vec())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("realm", &self.realm)
            .field("nonce", &self.nonce)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation() {
        let mut credentials = Credentials::new("user", "pass");
        credentials.set_challenge("realm", "nonce");

        let expected = Md5::digest(b"user:realm:pass");
        assert_eq!(credentials.key().as_slice(), expected.as_slice());
        assert_eq!(credentials.key().len(), 16);
    }

    #[test]
    fn test_challenge_state() {
        let mut credentials = Credentials::new("user", "pass");
        assert!(!credentials.is_authenticated());

        credentials.set_challenge("example.org", "n1");
        assert!(credentials.is_authenticated());
        assert_eq!(credentials.nonce(), Some("n1"));

        credentials.set_nonce("n2");
        assert_eq!(credentials.realm(), Some("example.org"));
        assert_eq!(credentials.nonce(), Some("n2"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let credentials = Credentials::new("user", "hunter2");
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("user"));
    }
}
