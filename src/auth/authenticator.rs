//! Request authentication
//!
//! Resolves the access key from the `Authorization: Havalo <key>:<sig>`
//! header, recomputes the request signature with the tenant's secret, and
//! compares. Every failure mode (missing or malformed header, missing Date,
//! unknown access key, empty secret, signature mismatch) collapses to the
//! same opaque `Unauthorized` error on the wire; the concrete reason is
//! only logged.

use crate::auth::signer::{self, AUTH_SCHEME};
use crate::error::StoreError;
use crate::store::manager::RepositoryManager;
use crate::store::repository::KeyPair;
use actix_web::http::header;
use actix_web::HttpRequest;
use log::warn;
use uuid::Uuid;

/// A verified tenant identity, attached to the request after
/// authentication succeeds.
#[derive(Debug, Clone)]
pub struct AuthenticatedTenant {
    pub key_pair: KeyPair,
}

impl AuthenticatedTenant {
    pub fn id(&self) -> Uuid {
        self.key_pair.key
    }
}

/// Authenticate `req` against the credential store.
pub fn authenticate(
    manager: &RepositoryManager,
    req: &HttpRequest,
) -> Result<AuthenticatedTenant, StoreError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing or unreadable Authorization header");
            StoreError::Unauthorized
        })?;

    let (access_key, signature) = parse_authorization_header(header_value)?;
    let id: Uuid = access_key.parse().map_err(|_| {
        warn!("Access key is not a UUID");
        StoreError::Unauthorized
    })?;

    // The Date header is mandatory: it anchors the signed canonical string.
    let date = req
        .headers()
        .get(header::DATE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing Date header on signed request");
            StoreError::Unauthorized
        })?;
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let repo = manager.get_repository(id, true).map_err(|_| {
        warn!("Unknown access key {}", id);
        StoreError::Unauthorized
    })?;
    let key_pair = repo.key_pair();
    if key_pair.secret.is_empty() {
        warn!("Tenant {} has an empty secret, refusing to authenticate", id);
        return Err(StoreError::Unauthorized);
    }

    let canonical =
        signer::canonical_string(req.method().as_str(), date, content_type, req.path());
    if !signer::verify(&key_pair.secret, &canonical, signature) {
        warn!("Signature mismatch for tenant {}", id);
        return Err(StoreError::Unauthorized);
    }

    log_mdc::insert("tenant", id.to_string());
    Ok(AuthenticatedTenant { key_pair })
}

/// Require the ADMIN role for a privileged operation.
pub fn require_admin(tenant: &AuthenticatedTenant) -> Result<(), StoreError> {
    if tenant.key_pair.is_admin() {
        Ok(())
    } else {
        Err(StoreError::Forbidden)
    }
}

/// Split `Havalo <key>:<sig>` into its parts.
fn parse_authorization_header(value: &str) -> Result<(&str, &str), StoreError> {
    let rest = value.strip_prefix(AUTH_SCHEME).ok_or_else(|| {
        warn!("Authorization header does not use the {} scheme", AUTH_SCHEME);
        StoreError::Unauthorized
    })?;
    let rest = rest.trim_start();
    rest.split_once(':')
        .map(|(key, sig)| (key.trim(), sig.trim()))
        .ok_or_else(|| {
            warn!("Authorization header is missing the key:signature pair");
            StoreError::Unauthorized
        })
}
