//! Background metadata flushing
//!
//! Decouples metadata durability from the request path: mutations enqueue a
//! flush and return immediately, the flush pool persists the repository
//! snapshot later. At most `pool_width` flushes run concurrently. A flush
//! holds the repository's shared lock while serializing: shared, not
//! exclusive, because it only has to keep the object index stable during
//! serialization, not block concurrent content readers.
//!
//! Flush failures are logged and swallowed: a failed background flush never
//! fails the request that triggered it, and is not retried. Flushes for the
//! same repository may complete out of submission order; the last completed
//! write wins at file granularity.

use crate::error::StoreError;
use crate::store::lock::SHARED_WAIT;
use crate::store::meta_store::MetaObjectStore;
use crate::store::repository::Repository;
use log::{debug, error};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task;

/// Default number of concurrent background flushes.
pub const DEFAULT_POOL_WIDTH: usize = 20;

/// Bounded pool of background metadata flush workers.
#[derive(Debug)]
pub struct MetaWriter {
    meta_store: Arc<MetaObjectStore>,
    permits: Arc<Semaphore>,
}

impl MetaWriter {
    pub fn new(meta_store: Arc<MetaObjectStore>, pool_width: usize) -> Self {
        Self {
            meta_store,
            permits: Arc::new(Semaphore::new(pool_width.max(1))),
        }
    }

    /// Enqueue an asynchronous metadata flush for `repo`.
    ///
    /// Outside a tokio runtime (synchronous callers, unit tests) the flush
    /// runs inline instead; durability semantics are the same, only the
    /// latency decoupling is lost.
    pub fn queue(&self, repo: Arc<Repository>) {
        let id = repo.id();
        match Handle::try_current() {
            Ok(handle) => {
                let permits = self.permits.clone();
                let meta_store = self.meta_store.clone();
                handle.spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return, // semaphore closed, shutting down
                    };
                    let outcome =
                        task::spawn_blocking(move || flush(&meta_store, &repo)).await;
                    match outcome {
                        Ok(Ok(())) => debug!("Background flush completed for {}", id),
                        Ok(Err(e)) => error!("Background flush failed for {}: {}", id, e),
                        Err(e) => error!("Background flush panicked for {}: {}", id, e),
                    }
                });
            }
            Err(_) => {
                if let Err(e) = flush(&self.meta_store, &repo) {
                    error!("Inline flush failed for {}: {}", id, e);
                }
            }
        }
    }
}

fn flush(meta_store: &MetaObjectStore, repo: &Repository) -> Result<(), StoreError> {
    repo.lock().read(SHARED_WAIT, || meta_store.save(repo))
}
