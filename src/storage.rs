//! Object store resolution for a single cache partition.

use std::io;
use std::path::Path;
use std::sync::Arc;

use slatedb::Db;
use slatedb::object_store::ObjectStore;
use slatedb::object_store::local::LocalFileSystem;
use slatedb::object_store::memory::InMemory;
use thiserror::Error;
use tracing::debug;

use crate::settings::{Backend, PartitionConfig};

/// Failure to prepare the store of one partition. Every variant names the
/// partition so a misconfigured template is easy to trace.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("partition {partition} has an empty storage path")]
    EmptyPath { partition: String },
    #[error("partition {partition}: cannot prepare fs root {path}: {source}")]
    FsRoot {
        partition: String,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("partition {partition}: local store at {path}: {source}")]
    LocalStore {
        partition: String,
        path: String,
        #[source]
        source: slatedb::object_store::Error,
    },
    #[error("partition {partition}: cannot resolve object store url {url}: {source}")]
    Url {
        partition: String,
        url: String,
        #[source]
        source: slatedb::Error,
    },
}

/// Where a partition's SlateDB lives: the object store and the root path
/// inside it.
pub struct PartitionStore {
    pub store: Arc<dyn ObjectStore>,
    pub root: String,
}

/// Resolve the object store for `cfg`. Filesystem roots are created on
/// demand and canonicalized, since SlateDB encodes relative paths
/// inconsistently. Each in-memory partition gets a private store.
pub fn resolve_partition_store(cfg: &PartitionConfig) -> Result<PartitionStore, StorageError> {
    if cfg.path.trim().is_empty() && cfg.backend != Backend::Memory {
        return Err(StorageError::EmptyPath {
            partition: cfg.name.clone(),
        });
    }

    let resolved = match cfg.backend {
        Backend::Fs => fs_store(cfg)?,
        Backend::Memory => PartitionStore {
            store: Arc::new(InMemory::new()),
            root: if cfg.path.is_empty() {
                format!("partition-{}", cfg.name)
            } else {
                cfg.path.clone()
            },
        },
        Backend::Url => {
            let store = Db::resolve_object_store(&cfg.path).map_err(|source| StorageError::Url {
                partition: cfg.name.clone(),
                url: cfg.path.clone(),
                source,
            })?;
            PartitionStore {
                store,
                root: cfg.path.clone(),
            }
        }
    };
    debug!(partition = %cfg.name, backend = ?cfg.backend, root = %resolved.root, "resolved partition store");
    Ok(resolved)
}

fn fs_store(cfg: &PartitionConfig) -> Result<PartitionStore, StorageError> {
    let fs_err = |source: io::Error| StorageError::FsRoot {
        partition: cfg.name.clone(),
        path: cfg.path.clone(),
        source,
    };
    let dir = Path::new(&cfg.path);
    std::fs::create_dir_all(dir).map_err(fs_err)?;
    let root = dir
        .canonicalize()
        .map_err(fs_err)?
        .to_string_lossy()
        .into_owned();
    let store = LocalFileSystem::new_with_prefix(&root).map_err(|source| StorageError::LocalStore {
        partition: cfg.name.clone(),
        path: root.clone(),
        source,
    })?;
    Ok(PartitionStore {
        store: Arc::new(store),
        root,
    })
}
