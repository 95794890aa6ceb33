//! HMAC request-signing authentication
//!
//! Implements the `Havalo <AccessKey>:<Signature>` scheme: the access key
//! is the tenant UUID, the signature an HMAC-SHA256 over a canonical
//! rendering of the request, keyed by the tenant's secret.

pub mod authenticator;
pub mod signer;

pub use authenticator::{authenticate, require_admin, AuthenticatedTenant};
