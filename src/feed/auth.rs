//! Exchange request signing.
//!
//! Both REST calls and the WebSocket upgrade authenticate with the same
//! header triple: key id, epoch timestamp, and a base64 RSA-PSS-SHA256
//! signature over `timestamp + method + path`. REST timestamps are seconds;
//! the streaming handshake uses milliseconds.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::pss::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use thiserror::Error;

pub const ACCESS_KEY_HEADER: &str = "KALSHI-ACCESS-KEY";
pub const ACCESS_TIMESTAMP_HEADER: &str = "KALSHI-ACCESS-TIMESTAMP";
pub const ACCESS_SIGNATURE_HEADER: &str = "KALSHI-ACCESS-SIGNATURE";

/// Fixed path signed for the WebSocket connection handshake.
pub const WS_AUTH_PATH: &str = "/trade-api/ws/v2";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),
    #[error("unreadable private key file: {0}")]
    KeyFile(String),
    #[error("invalid private key PEM: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

/// API key identifier plus the private signing key.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    signing_key: SigningKey<Sha256>,
}

impl Credentials {
    /// Accepts the PEM in PKCS#8 or PKCS#1 form.
    pub fn new(api_key: String, private_key_pem: &str) -> Result<Self, AuthError> {
        let key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_key_pem))
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        Ok(Self {
            api_key,
            signing_key: SigningKey::<Sha256>::new(key),
        })
    }

    /// Loads `KALSHI_API_KEY` plus either `KALSHI_PRIVATE_KEY_PEM` or a
    /// `KALSHI_PRIVATE_KEY_PATH` pointing at the PEM file.
    pub fn from_env() -> Result<Self, AuthError> {
        let api_key = std::env::var("KALSHI_API_KEY")
            .map_err(|_| AuthError::MissingCredential("KALSHI_API_KEY"))?;
        let pem = match std::env::var("KALSHI_PRIVATE_KEY_PEM") {
            Ok(pem) => pem,
            Err(_) => {
                let path = std::env::var("KALSHI_PRIVATE_KEY_PATH").map_err(|_| {
                    AuthError::MissingCredential(
                        "KALSHI_PRIVATE_KEY_PEM or KALSHI_PRIVATE_KEY_PATH",
                    )
                })?;
                std::fs::read_to_string(&path)
                    .map_err(|e| AuthError::KeyFile(format!("{path}: {e}")))?
            }
        };
        Self::new(api_key, &pem)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Base64 RSA-PSS-SHA256 signature over `timestamp + method + path`.
    pub fn sign(&self, timestamp: &str, method: &str, path: &str) -> Result<String, AuthError> {
        let payload = format!("{timestamp}{method}{path}");
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut rand::thread_rng(), payload.as_bytes())
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Headers for the WebSocket upgrade request (millisecond timestamp).
    pub fn ws_headers(&self) -> Result<Vec<(&'static str, String)>, AuthError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        self.headers_for(timestamp, "GET", WS_AUTH_PATH)
    }

    /// Headers for a REST request (second-resolution timestamp).
    pub fn rest_headers(
        &self,
        method: &str,
        path: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let timestamp = Utc::now().timestamp().to_string();
        self.headers_for(timestamp, method, path)
    }

    fn headers_for(
        &self,
        timestamp: String,
        method: &str,
        path: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let signature = self.sign(&timestamp, method, path)?;
        Ok(vec![
            (ACCESS_KEY_HEADER, self.api_key.clone()),
            (ACCESS_TIMESTAMP_HEADER, timestamp),
            (ACCESS_SIGNATURE_HEADER, signature),
        ])
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePrivateKey;
    use rsa::pss::Signature;
    use rsa::signature::{Keypair, Verifier};

    fn test_credentials() -> Credentials {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = key.to_pkcs8_pem(rsa::pkcs8::LineEnding::LF).unwrap();
        Credentials::new("key-id".to_string(), &pem).unwrap()
    }

    #[test]
    fn signature_verifies_over_signed_payload() {
        let creds = test_credentials();
        let encoded = creds.sign("1700000000000", "GET", WS_AUTH_PATH).unwrap();

        let raw = BASE64.decode(encoded).unwrap();
        let signature = Signature::try_from(raw.as_slice()).unwrap();
        let verifying_key = creds.signing_key.verifying_key();
        let payload = format!("1700000000000GET{WS_AUTH_PATH}");
        verifying_key
            .verify(payload.as_bytes(), &signature)
            .expect("signature must verify");
    }

    #[test]
    fn ws_headers_carry_the_access_triple() {
        let creds = test_credentials();
        let headers = creds.ws_headers().unwrap();
        let names: Vec<&str> = headers.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                ACCESS_KEY_HEADER,
                ACCESS_TIMESTAMP_HEADER,
                ACCESS_SIGNATURE_HEADER
            ]
        );
        assert_eq!(headers[0].1, "key-id");
        // Millisecond timestamps are 13 digits for the current era.
        assert_eq!(headers[1].1.len(), 13);
    }

    #[test]
    fn rest_headers_use_second_resolution_timestamps() {
        let creds = test_credentials();
        let headers = creds.rest_headers("GET", "/trade-api/v2/markets").unwrap();
        assert_eq!(headers[1].0, ACCESS_TIMESTAMP_HEADER);
        assert_eq!(headers[1].1.len(), 10);
    }

    #[test]
    fn garbage_pem_is_rejected() {
        let err = Credentials::new("k".to_string(), "not a pem").unwrap_err();
        assert!(matches!(err, AuthError::InvalidKey(_)));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let creds = test_credentials();
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("key-id"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
