//! Repository metadata persistence
//!
//! Persists a repository snapshot as gzip-compressed JSON addressed by the
//! tenant UUID through the path scheme, under a reserved suffix that keeps
//! metadata files distinct from content files. Writes go to the location's
//! temp path and are renamed into place only after the JSON writer and the
//! gzip stream have both been finished, so a crash mid-write never leaves a
//! truncated stream at the canonical path.

use crate::error::StoreError;
use crate::store::pathing::{self, DiskLocation};
use crate::store::repository::Repository;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::PathBuf;
use uuid::Uuid;

/// Reserved suffix for repository metadata files.
const META_SUFFIX: &str = ".meta.gz";

/// Loads and stores `Repository` snapshots under a root directory.
#[derive(Debug)]
pub struct MetaObjectStore {
    root: PathBuf,
    max_filename_length: usize,
}

impl MetaObjectStore {
    pub fn new(root: impl Into<PathBuf>, max_filename_length: usize) -> Self {
        Self {
            root: root.into(),
            max_filename_length,
        }
    }

    fn location(&self, id: &Uuid, create_parents: bool) -> Result<DiskLocation, StoreError> {
        pathing::resolve(
            &self.root,
            id.to_string().as_bytes(),
            META_SUFFIX,
            self.max_filename_length,
            create_parents,
        )
    }

    /// Whether a metadata snapshot exists on disk for `id`.
    pub fn exists(&self, id: &Uuid) -> bool {
        self.location(id, false)
            .map(|loc| loc.path.is_file())
            .unwrap_or(false)
    }

    /// Serialize `repo` to its canonical location. Callers hold the
    /// repository's shared lock so the object index cannot change
    /// mid-serialization.
    pub fn save(&self, repo: &Repository) -> Result<(), StoreError> {
        let id = repo.id();
        let flush_err = |reason: String| StoreError::RepositoryFlush { id, reason };

        let loc = self.location(&id, true).map_err(|e| flush_err(e.to_string()))?;

        // Open, compress, write, then close in reverse order before the
        // rename makes the snapshot visible.
        let file = File::create(&loc.temp).map_err(|e| flush_err(e.to_string()))?;
        let mut encoder = GzEncoder::new(file, Compression::best());
        serde_json::to_writer(&mut encoder, repo).map_err(|e| flush_err(e.to_string()))?;
        encoder.finish().map_err(|e| flush_err(e.to_string()))?;
        fs::rename(&loc.temp, &loc.path).map_err(|e| flush_err(e.to_string()))?;

        debug!("Flushed metadata for repository {} to {:?}", id, loc.path);
        Ok(())
    }

    /// Load the snapshot for `id`. A missing file is `RepositoryNotFound`;
    /// unreadable or malformed content is `RepositoryLoad`.
    pub fn load(&self, id: &Uuid) -> Result<Repository, StoreError> {
        let loc = self.location(id, false)?;
        let file = File::open(&loc.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::RepositoryNotFound { id: *id },
            _ => StoreError::RepositoryLoad {
                id: *id,
                reason: e.to_string(),
            },
        })?;
        let decoder = GzDecoder::new(file);
        let repo: Repository =
            serde_json::from_reader(decoder).map_err(|e| StoreError::RepositoryLoad {
                id: *id,
                reason: e.to_string(),
            })?;
        debug!(
            "Loaded metadata for repository {} ({} objects)",
            id,
            repo.object_count()
        );
        Ok(repo)
    }

    /// Remove the snapshot for `id`. Removal of an absent file is a no-op;
    /// any other failure is a flush error.
    pub fn delete(&self, id: &Uuid) -> Result<(), StoreError> {
        let loc = self.location(id, false)?;
        match fs::remove_file(&loc.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::RepositoryFlush {
                id: *id,
                reason: e.to_string(),
            }),
        }
    }
}
