use std::fmt;

use sha2::{Digest, Sha256};

/// Challenge/response authentication used during the handshake.
///
/// The verifying side calls [`Authenticator::create_challenge`], the other
/// side answers with [`Authenticator::create_response`], and the verifier
/// checks the answer with [`Authenticator::authenticate`].
pub trait Authenticator: Send + Sync + fmt::Debug {
    fn create_challenge(&self) -> String;

    fn create_response(&self, challenge: &str) -> String;

    fn authenticate(&self, challenge: &str, response: &str) -> bool;
}

/// Proves knowledge of a shared secret.
///
/// The challenge is a random UUID; the response is the hex-encoded
/// SHA-256 digest of `secret || challenge`.
#[derive(Clone)]
pub struct SharedSecretAuthenticator {
    secret: String,
}

impl SharedSecretAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn digest(&self, challenge: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(challenge.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Authenticator for SharedSecretAuthenticator {
    fn create_challenge(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn create_response(&self, challenge: &str) -> String {
        self.digest(challenge)
    }

    fn authenticate(&self, challenge: &str, response: &str) -> bool {
        let expected = self.digest(challenge);
        expected.len() == response.len()
            && expected
                .bytes()
                .zip(response.bytes())
                .fold(0u8, |diff, (a, b)| diff | (a ^ b))
                == 0
    }
}

impl fmt::Debug for SharedSecretAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecretAuthenticator")
            .field(
                "secret",
                &format_args!("<redacted:{} bytes>", self.secret.len()),
            )
            .finish()
    }
}
