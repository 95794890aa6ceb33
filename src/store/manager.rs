//! Repository cache and manager
//!
//! The single entry point for all tenant and object operations: resolves a
//! tenant id to its `Repository` (loading from disk or creating in memory),
//! owns the path scheme and metadata store, and wraps every operation in
//! the two-level locking protocol (repository lock first, then the object
//! lock it guards).
//!
//! The cache is a concurrent map from tenant id to a shared `Repository`
//! handle. A miss is computed while holding the map entry, so concurrent
//! callers racing on the same uncached tenant block until the winner's load
//! completes and then observe the same handle. Capacity and TTL are
//! unconfigured (unbounded); `evict` removes an entry and write-backs its
//! metadata so the on-disk snapshot catches up with memory.

use crate::error::StoreError;
use crate::store::lock::{EXCLUSIVE_WAIT, SHARED_WAIT};
use crate::store::meta_store::MetaObjectStore;
use crate::store::meta_writer::MetaWriter;
use crate::store::pathing::{self, DiskLocation};
use crate::store::repository::{headers, HashedObject, KeyPair, Repository};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{info, warn};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

pub struct RepositoryManager {
    root: PathBuf,
    max_filename_length: usize,
    cache: DashMap<Uuid, Arc<Repository>>,
    meta_store: Arc<MetaObjectStore>,
    meta_writer: MetaWriter,
}

impl RepositoryManager {
    /// Create a manager rooted at `root`, materializing the root directory.
    pub fn new(
        root: impl Into<PathBuf>,
        max_filename_length: usize,
        flush_pool_width: usize,
    ) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let meta_store = Arc::new(MetaObjectStore::new(root.clone(), max_filename_length));
        let meta_writer = MetaWriter::new(meta_store.clone(), flush_pool_width);
        Ok(Self {
            root,
            max_filename_length,
            cache: DashMap::new(),
            meta_store,
            meta_writer,
        })
    }

    fn tenant_dir(&self, id: &Uuid) -> PathBuf {
        pathing::tenant_dir(&self.root, id, self.max_filename_length)
    }

    /// Resolve `id` to its cached repository, loading metadata from disk on
    /// a miss. When the tenant has no backing directory: `fail_if_not_found`
    /// yields `RepositoryNotFound`, otherwise a fresh, not-yet-persisted
    /// repository is cached and returned.
    pub fn get_repository(
        &self,
        id: Uuid,
        fail_if_not_found: bool,
    ) -> Result<Arc<Repository>, StoreError> {
        match self.cache.entry(id) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                // The load runs while this shard entry is held: concurrent
                // callers for the same tenant block until it completes and
                // then all see the same Arc.
                let dir = self.tenant_dir(&id);
                let repo = if dir.is_dir() {
                    match self.meta_store.load(&id) {
                        Ok(repo) => repo,
                        // Directory exists but no snapshot was ever flushed.
                        Err(StoreError::RepositoryNotFound { .. }) => Repository::new(id),
                        Err(e) => return Err(e),
                    }
                } else if fail_if_not_found {
                    return Err(StoreError::RepositoryNotFound { id });
                } else {
                    Repository::new(id)
                };
                let repo = Arc::new(repo);
                entry.insert(repo.clone());
                Ok(repo)
            }
        }
    }

    /// Create the backing directory for `id` and attach `key_pair`.
    /// Fails with `DuplicateRepository` when the directory already exists.
    pub fn create_repository(
        &self,
        id: Uuid,
        key_pair: KeyPair,
    ) -> Result<Arc<Repository>, StoreError> {
        let repo = self.get_repository(id, false)?;
        repo.lock().write(
            true, // structural create blocks rather than failing fast
            || {
                let dir = self.tenant_dir(&id);
                if dir.exists() {
                    return Err(StoreError::DuplicateRepository { id });
                }
                fs::create_dir_all(&dir)
                    .map_err(|source| StoreError::RepositoryCreation { id, source })?;
                repo.set_key_pair(key_pair);
                info!("Created repository {} at {:?}", id, dir);
                Ok(())
            },
        )?;
        // Enqueued after release: the flush takes the repository's shared
        // lock itself.
        self.meta_writer.queue(repo.clone());
        Ok(repo)
    }

    /// Destroy `id`: clear the in-memory index, delete the directory tree
    /// and the metadata file, and drop the cache entry. The cache entry is
    /// dropped only on full success, so callers may retry a partial failure.
    pub fn delete_repository(&self, id: Uuid) -> Result<(), StoreError> {
        let repo = self.get_repository(id, true)?;
        repo.lock().write_then(
            EXCLUSIVE_WAIT,
            || {
                repo.clear_objects();
                let dir = self.tenant_dir(&id);
                fs::remove_dir_all(&dir)
                    .map_err(|source| StoreError::RepositoryDeletion { id, source })?;
                self.meta_store.delete(&id)?;
                info!("Deleted repository {}", id);
                Ok(())
            },
            |_| {
                self.cache.remove(&id);
            },
        )
    }

    /// Look up `key` in the repository's index. When absent:
    /// `fail_if_not_found` yields `ObjectNotFound`, otherwise a fresh
    /// object record is inserted and returned.
    pub fn get_hashed_file_object(
        &self,
        repo: &Arc<Repository>,
        key: &str,
        fail_if_not_found: bool,
    ) -> Result<Arc<HashedObject>, StoreError> {
        // Index lookups use a fail-fast shared acquisition: a repository
        // busy with a structural operation conflicts immediately.
        repo.lock().read(false, || match repo.get_object(key) {
            Some(object) => Ok(object),
            None if fail_if_not_found => Err(StoreError::ObjectNotFound { key: key.into() }),
            None => Ok(repo.get_or_insert_object(key)),
        })
    }

    /// On-disk location of an object's content, addressed by the SHA-256 of
    /// its key (not the raw key) under the tenant's directory, distinct
    /// from the metadata file addressing scheme.
    pub fn get_canonical_object(
        &self,
        repo: &Repository,
        object: &HashedObject,
        make_parent_dirs: bool,
    ) -> Result<DiskLocation, StoreError> {
        let digest = Sha256::digest(object.name().as_bytes());
        pathing::resolve(
            &self.tenant_dir(&repo.id()),
            &digest,
            "",
            self.max_filename_length,
            make_parent_dirs,
        )
    }

    /// Full upload path: write content atomically (temp file then rename),
    /// honor the If-Match precondition, refresh the object's headers, and
    /// enqueue a metadata flush. Returns the new ETag.
    ///
    /// With If-Match set, a never-seen key is `ObjectNotFound` rather than
    /// implicitly created.
    pub fn put_object(
        &self,
        repo: &Arc<Repository>,
        key: &str,
        content: &[u8],
        content_type: &str,
        if_match: Option<&str>,
    ) -> Result<String, StoreError> {
        let etag = repo.lock().read(
            false, // fail fast when a structural operation holds the repo
            || {
                let object = match repo.get_object(key) {
                    Some(object) => object,
                    None if if_match.is_some() => {
                        return Err(StoreError::ObjectNotFound { key: key.into() })
                    }
                    None => repo.get_or_insert_object(key),
                };

                object.lock().write(EXCLUSIVE_WAIT, || {
                    if let Some(expected) = if_match {
                        let found = object.etag();
                        if found.as_deref() != Some(expected) {
                            return Err(StoreError::ObjectConflict {
                                key: key.into(),
                                expected: expected.into(),
                                found,
                            });
                        }
                    }

                    let loc = self.get_canonical_object(repo, &object, true)?;
                    fs::write(&loc.temp, content).map_err(|source| StoreError::ObjectFlush {
                        key: key.into(),
                        source,
                    })?;
                    fs::rename(&loc.temp, &loc.path).map_err(|source| {
                        StoreError::ObjectFlush {
                            key: key.into(),
                            source,
                        }
                    })?;

                    let etag = hex::encode(Sha256::digest(content));
                    object.set_header(headers::ETAG, &etag);
                    object.set_header(headers::CONTENT_TYPE, content_type);
                    object.set_header(headers::CONTENT_LENGTH, content.len().to_string());
                    object.set_header(headers::LAST_MODIFIED, http_date_now());
                    Ok(etag)
                })
            },
        )?;
        self.meta_writer.queue(repo.clone());
        Ok(etag)
    }

    /// Read an object's content and a snapshot of its headers. An indexed
    /// key whose file cannot be read is a consistency fault (`ObjectLoad`),
    /// never a normal not-found.
    #[allow(clippy::type_complexity)]
    pub fn get_object(
        &self,
        repo: &Arc<Repository>,
        key: &str,
    ) -> Result<(Vec<u8>, BTreeMap<String, Vec<String>>), StoreError> {
        repo.lock().read(false, || {
            let object = repo
                .get_object(key)
                .ok_or_else(|| StoreError::ObjectNotFound { key: key.into() })?;
            object.lock().read(SHARED_WAIT, || {
                let loc = self.get_canonical_object(repo, &object, false)?;
                let content = fs::read(&loc.path).map_err(|source| StoreError::ObjectLoad {
                    key: key.into(),
                    source,
                })?;
                Ok((content, object.header_snapshot()))
            })
        })
    }

    /// Header snapshot only, for HEAD requests.
    pub fn get_object_headers(
        &self,
        repo: &Arc<Repository>,
        key: &str,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        repo.lock().read(false, || {
            let object = repo
                .get_object(key)
                .ok_or_else(|| StoreError::ObjectNotFound { key: key.into() })?;
            object.lock().read(SHARED_WAIT, || Ok(object.header_snapshot()))
        })
    }

    /// Delete an object: If-Match precondition, remove the content file,
    /// then drop the index entry, the entry only once the file was
    /// actually removed. A file missing despite being indexed is
    /// `ObjectNotFound`; a failed removal is `ObjectDeletion`.
    pub fn delete_hashed_file_object(
        &self,
        repo: &Arc<Repository>,
        key: &str,
        if_match: Option<&str>,
    ) -> Result<(), StoreError> {
        repo.lock().read(
            false, // fail fast when a structural operation holds the repo
            || {
                let object = repo
                    .get_object(key)
                    .ok_or_else(|| StoreError::ObjectNotFound { key: key.into() })?;
                object.lock().write(EXCLUSIVE_WAIT, || {
                    if let Some(expected) = if_match {
                        let found = object.etag();
                        if found.as_deref() != Some(expected) {
                            return Err(StoreError::ObjectConflict {
                                key: key.into(),
                                expected: expected.into(),
                                found,
                            });
                        }
                    }
                    let loc = self.get_canonical_object(repo, &object, false)?;
                    if !loc.path.is_file() {
                        warn!("Object {} indexed but file missing at {:?}", key, loc.path);
                        return Err(StoreError::ObjectNotFound { key: key.into() });
                    }
                    fs::remove_file(&loc.path).map_err(|source| StoreError::ObjectDeletion {
                        key: key.into(),
                        source,
                    })?;
                    repo.remove_object(key);
                    Ok(())
                })
            },
        )?;
        self.meta_writer.queue(repo.clone());
        Ok(())
    }

    /// Keys with the given prefix, lexicographic, as an independent copy.
    pub fn list_objects(
        &self,
        repo: &Arc<Repository>,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        repo.lock()
            .read(SHARED_WAIT, || Ok(repo.keys_with_prefix(prefix)))
    }

    /// Enqueue an asynchronous metadata flush without touching the
    /// repository otherwise.
    pub fn flush_repository(&self, repo: Arc<Repository>) {
        self.meta_writer.queue(repo);
    }

    /// Drop `id` from the cache, write-backing its metadata so the on-disk
    /// snapshot catches up with the evicted in-memory state.
    pub fn evict(&self, id: &Uuid) {
        if let Some((_, repo)) = self.cache.remove(id) {
            self.meta_writer.queue(repo);
        }
    }

    #[cfg(test)]
    fn cached(&self, id: &Uuid) -> bool {
        self.cache.contains_key(id)
    }
}

fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::pathing::DEFAULT_MAX_FILENAME_LENGTH;
    use crate::store::repository::Role;
    use std::thread;
    use tempfile::tempdir;

    fn manager(root: &std::path::Path) -> RepositoryManager {
        RepositoryManager::new(root, DEFAULT_MAX_FILENAME_LENGTH, 4).unwrap()
    }

    fn new_tenant(mgr: &RepositoryManager) -> (Uuid, Arc<Repository>) {
        let id = Uuid::new_v4();
        let repo = mgr
            .create_repository(id, KeyPair::generate(id, vec![Role::User]))
            .unwrap();
        (id, repo)
    }

    #[test]
    fn test_create_then_duplicate() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (id, _) = new_tenant(&mgr);
        let err = mgr.create_repository(id, KeyPair::generate(id, vec![Role::User]));
        assert!(matches!(err, Err(StoreError::DuplicateRepository { .. })));
    }

    #[test]
    fn test_get_repository_fail_if_not_found() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let id = Uuid::new_v4();
        assert!(matches!(
            mgr.get_repository(id, true),
            Err(StoreError::RepositoryNotFound { .. })
        ));
        // Non-failing resolution constructs a fresh in-memory repository.
        let repo = mgr.get_repository(id, false).unwrap();
        assert_eq!(repo.id(), id);
    }

    #[test]
    fn test_created_repository_survives_reload() {
        let tmp = tempdir().unwrap();
        let id;
        {
            let mgr = manager(tmp.path());
            let (tenant, repo) = new_tenant(&mgr);
            id = tenant;
            mgr.put_object(&repo, "a/b", b"hello", "text/plain", None)
                .unwrap();
        }
        // Fresh manager over the same root: load path, not cache.
        let mgr = manager(tmp.path());
        let repo = mgr.get_repository(id, true).unwrap();
        assert_eq!(repo.keys_with_prefix(""), vec!["a/b"]);
        let (content, _) = mgr.get_object(&repo, "a/b").unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn test_put_get_round_trip_with_etag() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (_, repo) = new_tenant(&mgr);

        let etag = mgr
            .put_object(&repo, "a/b", b"hello", "text/plain", None)
            .unwrap();
        assert_eq!(etag, hex::encode(Sha256::digest(b"hello")));

        let (content, headers_map) = mgr.get_object(&repo, "a/b").unwrap();
        assert_eq!(content, b"hello");
        assert_eq!(headers_map[headers::ETAG], vec![etag.clone()]);
        assert_eq!(headers_map[headers::CONTENT_TYPE], vec!["text/plain"]);
        assert_eq!(headers_map[headers::CONTENT_LENGTH], vec!["5"]);
        assert!(headers_map[headers::LAST_MODIFIED][0].ends_with("GMT"));
    }

    #[test]
    fn test_conditional_put() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (_, repo) = new_tenant(&mgr);

        let etag = mgr
            .put_object(&repo, "doc", b"v1", "text/plain", None)
            .unwrap();

        // Matching precondition succeeds and changes the ETag.
        let etag2 = mgr
            .put_object(&repo, "doc", b"v2", "text/plain", Some(&etag))
            .unwrap();
        assert_ne!(etag, etag2);

        // Stale precondition conflicts and leaves the object unchanged.
        let err = mgr.put_object(&repo, "doc", b"v3", "text/plain", Some(&etag));
        assert!(matches!(err, Err(StoreError::ObjectConflict { .. })));
        let (content, _) = mgr.get_object(&repo, "doc").unwrap();
        assert_eq!(content, b"v2");
    }

    #[test]
    fn test_if_match_on_unknown_key_is_not_found() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (_, repo) = new_tenant(&mgr);
        let err = mgr.put_object(&repo, "nope", b"x", "text/plain", Some("etag"));
        assert!(matches!(err, Err(StoreError::ObjectNotFound { .. })));
        assert_eq!(repo.object_count(), 0);
    }

    #[test]
    fn test_get_hashed_file_object_creates_on_miss() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (_, repo) = new_tenant(&mgr);

        assert!(matches!(
            mgr.get_hashed_file_object(&repo, "fresh", true),
            Err(StoreError::ObjectNotFound { .. })
        ));

        let created = mgr.get_hashed_file_object(&repo, "fresh", false).unwrap();
        assert_eq!(created.name(), "fresh");

        // Subsequent lookups observe the same record.
        let found = mgr.get_hashed_file_object(&repo, "fresh", true).unwrap();
        assert!(Arc::ptr_eq(&created, &found));
    }

    #[test]
    fn test_flush_repository_persists_current_state() {
        let tmp = tempdir().unwrap();
        let id;
        {
            let mgr = manager(tmp.path());
            let (tenant, repo) = new_tenant(&mgr);
            id = tenant;
            // Index mutation without a write path of its own.
            mgr.get_hashed_file_object(&repo, "pending", false).unwrap();
            mgr.flush_repository(repo);
        }
        let mgr = manager(tmp.path());
        let repo = mgr.get_repository(id, true).unwrap();
        assert_eq!(repo.keys_with_prefix(""), vec!["pending"]);
    }

    #[test]
    fn test_delete_object() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (_, repo) = new_tenant(&mgr);

        let etag = mgr
            .put_object(&repo, "doc", b"bytes", "text/plain", None)
            .unwrap();

        let err = mgr.delete_hashed_file_object(&repo, "doc", Some("stale"));
        assert!(matches!(err, Err(StoreError::ObjectConflict { .. })));

        mgr.delete_hashed_file_object(&repo, "doc", Some(&etag))
            .unwrap();
        assert!(matches!(
            mgr.get_object(&repo, "doc"),
            Err(StoreError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            mgr.delete_hashed_file_object(&repo, "doc", None),
            Err(StoreError::ObjectNotFound { .. })
        ));
    }

    #[test]
    fn test_canonical_object_is_deterministic_and_key_hashed() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (_, repo) = new_tenant(&mgr);
        let obj = HashedObject::new("some/long key");

        let a = mgr.get_canonical_object(&repo, &obj, false).unwrap();
        let b = mgr.get_canonical_object(&repo, &obj, false).unwrap();
        assert_eq!(a, b);

        // Addressed by hash of the key, so the raw key never appears.
        assert!(!a.path.to_str().unwrap().contains("some/long key"));

        let other = mgr
            .get_canonical_object(&repo, &HashedObject::new("other"), false)
            .unwrap();
        assert_ne!(a.path, other.path);
    }

    #[test]
    fn test_concurrent_gets_share_one_repository() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (id, _) = new_tenant(&mgr);

        // Fresh manager so the tenant is uncached, then race the load.
        let mgr = Arc::new(manager(tmp.path()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = mgr.clone();
                thread::spawn(move || mgr.get_repository(id, true).unwrap())
            })
            .collect();
        let repos: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for repo in &repos[1..] {
            assert!(Arc::ptr_eq(&repos[0], repo));
        }
    }

    #[test]
    fn test_delete_repository_conflicts_with_held_read_lock() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (id, repo) = new_tenant(&mgr);

        // A reader in flight holds the repository's shared lock; the
        // non-blocking exclusive acquisition must fail fast.
        let result = repo
            .lock()
            .read(SHARED_WAIT, || match mgr.delete_repository(id) {
                Err(StoreError::LockConflict) => Ok(()),
                other => panic!("expected LockConflict, got {:?}", other),
            });
        result.unwrap();

        // Once the reader released, deletion proceeds.
        mgr.delete_repository(id).unwrap();
    }

    #[test]
    fn test_delete_repository_removes_everything() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (id, repo) = new_tenant(&mgr);
        mgr.put_object(&repo, "a", b"1", "text/plain", None).unwrap();

        mgr.delete_repository(id).unwrap();
        assert!(!mgr.cached(&id));
        assert!(matches!(
            mgr.get_repository(id, true),
            Err(StoreError::RepositoryNotFound { .. })
        ));
        // Root only holds the (possibly empty) directory listing now.
        let remaining: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn test_evict_write_backs_metadata() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (id, repo) = new_tenant(&mgr);
        mgr.put_object(&repo, "k", b"v", "text/plain", None).unwrap();

        mgr.evict(&id);
        assert!(!mgr.cached(&id));

        // The reloaded snapshot reflects the evicted state.
        let reloaded = mgr.get_repository(id, true).unwrap();
        assert!(!Arc::ptr_eq(&repo, &reloaded));
        assert_eq!(reloaded.keys_with_prefix(""), vec!["k"]);
    }

    #[test]
    fn test_list_objects_prefix() {
        let tmp = tempdir().unwrap();
        let mgr = manager(tmp.path());
        let (_, repo) = new_tenant(&mgr);
        for key in ["a/1", "a/2", "b/1"] {
            mgr.put_object(&repo, key, b"x", "text/plain", None).unwrap();
        }
        assert_eq!(mgr.list_objects(&repo, "a/").unwrap(), vec!["a/1", "a/2"]);
        assert_eq!(
            mgr.list_objects(&repo, "").unwrap(),
            vec!["a/1", "a/2", "b/1"]
        );
        assert!(mgr.list_objects(&repo, "zzz").unwrap().is_empty());
    }
}
