//! HMAC-SHA256 signer/verifier.
//!
//! Signatures travel Base64-encoded in `X-Signature`. Verification recomputes
//! the tag and compares with `subtle::ConstantTimeEq`, never a short-circuiting
//! `==`. An empty secret is refused everywhere: there is no unsigned path.

use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::SignedRequest;

use super::canonical::canonicalize_request;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("signing secret is missing or empty")]
    EmptySecret,

    #[error("signing key rejected: {0}")]
    InvalidKey(String),
}

/// Shared HMAC secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn new(secret: impl Into<String>) -> Result<Self, SigningError> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(SigningError::EmptySecret);
        }
        Ok(Self(secret.into_bytes()))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(***)")
    }
}

/// Base64-encoded HMAC-SHA256 tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature(String);

impl Signature {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Keyed signer, built once at startup and shared by reference.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    pub fn new(secret: &SecretKey) -> Result<Self, SigningError> {
        let mac = <HmacSha256 as Mac>::new_from_slice(secret.expose())
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    fn tag(&self, canonical: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(canonical);
        mac.finalize().into_bytes().to_vec()
    }

    pub fn sign(&self, canonical: &[u8]) -> Signature {
        Signature(BASE64.encode(self.tag(canonical)))
    }

    pub fn sign_request(&self, request: &SignedRequest) -> Signature {
        self.sign(&canonicalize_request(request))
    }

    /// Constant-time check of a Base64 candidate against the recomputed tag.
    pub fn verify(&self, canonical: &[u8], candidate: &str) -> bool {
        let Ok(candidate) = BASE64.decode(candidate.trim()) else {
            return false;
        };
        let expected = self.tag(canonical);
        expected.as_slice().ct_eq(candidate.as_slice()).into()
    }

    pub fn verify_request(&self, request: &SignedRequest, candidate: &str) -> bool {
        self.verify(&canonicalize_request(request), candidate)
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

/// One-shot signing with a raw secret.
pub fn sign(secret: &str, canonical: &[u8]) -> Result<Signature, SigningError> {
    let key = SecretKey::new(secret)?;
    Ok(Signer::new(&key)?.sign(canonical))
}

/// One-shot verification with a raw secret. An empty secret never verifies.
pub fn verify(secret: &str, canonical: &[u8], candidate: &str) -> bool {
    let Ok(key) = SecretKey::new(secret) else {
        return false;
    };
    match Signer::new(&key) {
        Ok(signer) => signer.verify(canonical, candidate),
        Err(_) => false,
    }
}
