//! Request signing
//!
//! A request is authenticated by an HMAC-SHA256 over a canonical string
//! derived from it:
//!
//! ```text
//! UPPERCASE(method) \n Date header \n Content-Type header (or empty) \n path
//! ```
//!
//! The signature travels base64-encoded in the `Authorization` header as
//! `Havalo <AccessKey>:<Signature>`.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Authorization scheme token.
pub const AUTH_SCHEME: &str = "Havalo";

/// Build the canonical string-to-sign for a request. `path` carries no
/// query string; `content_type` is empty when the header is absent.
pub fn canonical_string(method: &str, date: &str, content_type: &str, path: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        method.to_uppercase(),
        date,
        content_type,
        path
    )
}

/// Sign the canonical string with the tenant secret.
pub fn sign(secret: &str, canonical: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    BASE64_STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a caller-supplied signature against the canonical string.
/// The comparison runs in constant time via the Mac verifier.
pub fn verify(secret: &str, canonical: &str, signature: &str) -> bool {
    let Ok(supplied) = BASE64_STANDARD.decode(signature) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&supplied).is_ok()
}
