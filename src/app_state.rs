//! Application State Management
//!
//! The application state carries the repository manager and the loaded
//! configuration, constructed once at startup and injected into every
//! handler; there is no ambient global state.

use crate::config::AppConfig;
use crate::error::StoreError;
use crate::store::manager::RepositoryManager;
use crate::store::repository::{KeyPair, Role};
use log::info;
use std::io;
use std::sync::Arc;
use uuid::Uuid;

/// Application state containing all services and their dependencies
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RepositoryManager>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> io::Result<Self> {
        info!(
            "Initializing storage engine at {} (max segment {}, flush pool {})",
            config.storage.root, config.storage.max_filename_length, config.meta_writer.pool_width
        );
        let manager = Arc::new(RepositoryManager::new(
            &config.storage.root,
            config.storage.max_filename_length,
            config.meta_writer.pool_width,
        )?);
        Ok(Self { manager, config })
    }

    /// The bootstrap admin tenant id, when configured. The admin repository
    /// may never be deleted through the API.
    pub fn admin_id(&self) -> Option<Uuid> {
        self.config.admin.as_ref().map(|admin| admin.uuid)
    }

    /// Create the admin repository from the configured credentials.
    /// Idempotent: an already existing admin repository is absorbed; any
    /// other failure aborts startup.
    pub fn bootstrap_admin(&self) -> Result<(), StoreError> {
        let admin = self.config.admin.as_ref().ok_or_else(|| {
            StoreError::RepositoryCreation {
                id: Uuid::nil(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "admin credentials missing from configuration",
                ),
            }
        })?;

        let key_pair = KeyPair {
            key: admin.uuid,
            secret: admin.secret.clone(),
            roles: vec![Role::Admin],
        };
        match self.manager.create_repository(admin.uuid, key_pair) {
            Ok(_) => {
                info!("Bootstrapped admin repository {}", admin.uuid);
                Ok(())
            }
            Err(StoreError::DuplicateRepository { .. }) => {
                info!("Admin repository {} already exists", admin.uuid);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
