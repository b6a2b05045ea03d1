//! Constant-time check of the shared webhook secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The configured secret, stored as a keyed tag.
///
/// A presented token is tagged with the same key and the two tags are
/// compared with `verify_slice`, which does not short-circuit on the first
/// differing byte.
#[derive(Clone)]
pub struct SecretToken {
    mac: HmacSha256,
    expected: Vec<u8>,
}

impl SecretToken {
    pub fn new(secret: &str) -> Result<Self, String> {
        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| "invalid secret length".to_string())?;
        let mut tagger = mac.clone();
        tagger.update(secret.as_bytes());
        let expected = tagger.finalize().into_bytes().to_vec();
        Ok(Self { mac, expected })
    }

    /// Verify the header value, if any, against the secret.
    pub fn verify(&self, presented: Option<&str>) -> Result<(), &'static str> {
        let presented = presented.ok_or("missing secret token header")?;
        let mut mac = self.mac.clone();
        mac.update(presented.as_bytes());
        mac.verify_slice(&self.expected)
            .map_err(|_| "secret token mismatch")
    }
}

impl std::fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_verifies() {
        let token = SecretToken::new("s3cret").unwrap();
        assert!(token.verify(Some("s3cret")).is_ok());
    }

    #[test]
    fn wrong_or_missing_token_fails() {
        let token = SecretToken::new("s3cret").unwrap();
        assert_eq!(token.verify(Some("s3cre")), Err("secret token mismatch"));
        assert_eq!(token.verify(Some("s3cret ")), Err("secret token mismatch"));
        assert_eq!(token.verify(None), Err("missing secret token header"));
    }
}
