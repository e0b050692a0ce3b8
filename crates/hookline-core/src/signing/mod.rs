//! Request signing: canonical encoding + HMAC-SHA256.

pub mod canonical;
pub mod signer;

pub use canonical::{canonicalize, canonicalize_request, format_timestamp};
pub use signer::{SecretKey, Signature, Signer, SigningError, sign, verify};

/// Header carrying the Base64 HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Header carrying the ISO-8601 UTC timestamp that was signed.
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
