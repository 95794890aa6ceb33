//! Repository and object entities
//!
//! A `Repository` is one tenant's namespace: its credential (`KeyPair`) plus
//! an ordered index from object key to `HashedObject` metadata. Object
//! content bytes never live here; they sit on disk under the tenant's
//! directory and only the headers (ETag, Content-Type, Content-Length,
//! Last-Modified) are tracked in memory.
//!
//! Both entity types carry their own `EntityLock`, excluded from
//! serialization. Repository equality is by tenant id, object equality by
//! name.

use crate::store::lock::EntityLock;
use base64::prelude::{Engine as _, BASE64_URL_SAFE_NO_PAD};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use uuid::Uuid;

/// Header names tracked per object.
pub mod headers {
    pub const ETAG: &str = "ETag";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const LAST_MODIFIED: &str = "Last-Modified";
}

/// Number of random bytes behind a freshly minted secret.
const SECRET_LENGTH: usize = 32;

/// Authorization roles attached to a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
}

/// A tenant credential: the tenant UUID doubling as the HMAC access key,
/// the signing secret, and the authorization roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub key: Uuid,
    pub secret: String,
    pub roles: Vec<Role>,
}

impl KeyPair {
    /// Mint a credential with a cryptographically random, URL-safe base64
    /// encoded secret.
    pub fn generate(key: Uuid, roles: Vec<Role>) -> Self {
        let mut bytes = [0u8; SECRET_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self {
            key,
            secret: BASE64_URL_SAFE_NO_PAD.encode(bytes),
            roles,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }
}

/// Metadata record for one object key within a tenant.
#[derive(Debug, Serialize, Deserialize)]
pub struct HashedObject {
    name: String,
    headers: Mutex<BTreeMap<String, Vec<String>>>,
    #[serde(skip)]
    lock: EntityLock,
}

impl HashedObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: Mutex::new(BTreeMap::new()),
            lock: EntityLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lock(&self) -> &EntityLock {
        &self.lock
    }

    /// Replace a header with a single value.
    pub fn set_header(&self, name: &str, value: impl Into<String>) {
        self.headers
            .lock()
            .insert(name.to_string(), vec![value.into()]);
    }

    /// First value of a header, if present.
    pub fn first_header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .get(name)
            .and_then(|values| values.first().cloned())
    }

    pub fn etag(&self) -> Option<String> {
        self.first_header(headers::ETAG)
    }

    /// Independent snapshot of all headers.
    pub fn header_snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.headers.lock().clone()
    }
}

impl PartialEq for HashedObject {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for HashedObject {}

/// One tenant's namespace of objects plus its credential.
#[derive(Debug, Serialize, Deserialize)]
pub struct Repository {
    id: Uuid,
    key_pair: Mutex<KeyPair>,
    objects: Mutex<BTreeMap<String, Arc<HashedObject>>>,
    #[serde(skip)]
    lock: EntityLock,
}

impl Repository {
    /// Fresh in-memory repository with an auto-minted USER credential.
    /// Nothing is persisted until the first metadata flush.
    pub fn new(id: Uuid) -> Self {
        Self::with_key_pair(id, KeyPair::generate(id, vec![Role::User]))
    }

    pub fn with_key_pair(id: Uuid, key_pair: KeyPair) -> Self {
        Self {
            id,
            key_pair: Mutex::new(key_pair),
            objects: Mutex::new(BTreeMap::new()),
            lock: EntityLock::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn lock(&self) -> &EntityLock {
        &self.lock
    }

    /// Cloned credential snapshot.
    pub fn key_pair(&self) -> KeyPair {
        self.key_pair.lock().clone()
    }

    /// Attach a credential, replacing any auto-minted one.
    pub fn set_key_pair(&self, key_pair: KeyPair) {
        *self.key_pair.lock() = key_pair;
    }

    pub fn get_object(&self, key: &str) -> Option<Arc<HashedObject>> {
        self.objects.lock().get(key).cloned()
    }

    /// Single atomic lookup-or-insert on the index. Callers still hold the
    /// repository lock in at least shared mode around this.
    pub fn get_or_insert_object(&self, key: &str) -> Arc<HashedObject> {
        self.objects
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(HashedObject::new(key)))
            .clone()
    }

    pub fn remove_object(&self, key: &str) -> Option<Arc<HashedObject>> {
        self.objects.lock().remove(key)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn clear_objects(&self) {
        self.objects.lock().clear();
    }

    /// Keys starting with `prefix` (all keys when empty), lexicographically
    /// ordered. The returned Vec is an independent copy of the live index.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let objects = self.objects.lock();
        if prefix.is_empty() {
            return objects.keys().cloned().collect();
        }
        objects
            .range::<String, _>((Bound::Included(prefix.to_string()), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Repository {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_are_unique_and_urlsafe() {
        let id = Uuid::new_v4();
        let a = KeyPair::generate(id, vec![Role::User]);
        let b = KeyPair::generate(id, vec![Role::User]);
        assert_ne!(a.secret, b.secret);
        assert!(!a.secret.is_empty());
        assert!(a
            .secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(!a.is_admin());
        assert!(KeyPair::generate(id, vec![Role::Admin]).is_admin());
    }

    #[test]
    fn test_object_equality_is_by_name() {
        let a = HashedObject::new("a/b");
        let b = HashedObject::new("a/b");
        b.set_header(headers::ETAG, "something");
        assert_eq!(a, b);
        assert_ne!(a, HashedObject::new("a/c"));
    }

    #[test]
    fn test_repository_equality_is_by_id() {
        let id = Uuid::new_v4();
        let a = Repository::new(id);
        let b = Repository::new(id);
        b.get_or_insert_object("x");
        assert_eq!(a, b);
        assert_ne!(a, Repository::new(Uuid::new_v4()));
    }

    #[test]
    fn test_header_set_and_snapshot() {
        let obj = HashedObject::new("doc");
        obj.set_header(headers::CONTENT_TYPE, "text/plain");
        obj.set_header(headers::ETAG, "abc123");
        assert_eq!(obj.etag().as_deref(), Some("abc123"));
        assert_eq!(
            obj.first_header(headers::CONTENT_TYPE).as_deref(),
            Some("text/plain")
        );

        let mut snapshot = obj.header_snapshot();
        snapshot.insert("X-Extra".into(), vec!["boo".into()]);
        // Mutating the snapshot must not leak into the live headers.
        assert!(obj.first_header("X-Extra").is_none());
    }

    #[test]
    fn test_prefix_listing_is_ordered_and_independent() {
        let repo = Repository::new(Uuid::new_v4());
        for key in ["a/b", "a/a", "b/a", "a/c", "zz"] {
            repo.get_or_insert_object(key);
        }

        let keys = repo.keys_with_prefix("a/");
        assert_eq!(keys, vec!["a/a", "a/b", "a/c"]);

        let mut all = repo.keys_with_prefix("");
        assert_eq!(all, vec!["a/a", "a/b", "a/c", "b/a", "zz"]);

        // The returned list is a copy.
        all.clear();
        assert_eq!(repo.object_count(), 5);
    }

    #[test]
    fn test_get_or_insert_is_idempotent() {
        let repo = Repository::new(Uuid::new_v4());
        let first = repo.get_or_insert_object("k");
        first.set_header(headers::ETAG, "v1");
        let second = repo.get_or_insert_object("k");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(repo.object_count(), 1);
    }

    #[test]
    fn test_json_shape() {
        let id: Uuid = "2cd4dbd6-3b9c-4b24-8f33-f7d1ed5cda9a".parse().unwrap();
        let repo = Repository::with_key_pair(
            id,
            KeyPair {
                key: id,
                secret: "s3cret".into(),
                roles: vec![Role::User, Role::Admin],
            },
        );
        let obj = repo.get_or_insert_object("a/b");
        obj.set_header(headers::ETAG, "deadbeef");

        let json = serde_json::to_value(&repo).unwrap();
        assert_eq!(json["id"], "2cd4dbd6-3b9c-4b24-8f33-f7d1ed5cda9a");
        assert_eq!(json["key_pair"]["secret"], "s3cret");
        assert_eq!(json["key_pair"]["roles"][0], "USER");
        assert_eq!(json["key_pair"]["roles"][1], "ADMIN");
        assert_eq!(json["objects"]["a/b"]["name"], "a/b");
        assert_eq!(json["objects"]["a/b"]["headers"]["ETag"][0], "deadbeef");

        let back: Repository = serde_json::from_value(json).unwrap();
        assert_eq!(back.id(), id);
        assert_eq!(back.key_pair().secret, "s3cret");
        assert_eq!(
            back.get_object("a/b").unwrap().etag().as_deref(),
            Some("deadbeef")
        );
    }
}
