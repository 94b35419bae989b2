// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persistent key-value storage for enrollment artifacts.
//!
//! The workflow caches the generated key pair and CSR so that an interrupted
//! enrollment can resume with the same CSR digest. Storage is a trait-based
//! abstraction so callers can plug in any backend:
//!
//! - [`MemoryStore`]: in-process map, useful for tests and one-shot runs
//! - [`FileStore`]: one file per key inside a directory
//!
//! # Example
//!
//! ```no_run
//! use caramel_request::store::{FileStore, KeyValueStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = FileStore::new("/var/lib/caramel");
//! store.set("caramel-request-csr", "-----BEGIN CERTIFICATE REQUEST-----\n...").await?;
//! let csr = store.get("caramel-request-csr").await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{EnrollError, Result};

/// String-keyed persistent store.
///
/// Only `get` and `set` are used by the workflow; there is no delete or
/// versioning.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// The artifacts the workflow persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKey {
    /// PEM-encoded private key.
    PrivateKey,
    /// PEM-encoded public key.
    PublicKey,
    /// PEM-encoded certification request.
    Csr,
}

impl StoreKey {
    /// Key name without prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrivateKey => "privateKey",
            Self::PublicKey => "publicKey",
            Self::Csr => "csr",
        }
    }
}

/// A store view that namespaces every [`StoreKey`] under a prefix.
#[derive(Clone)]
pub struct PrefixedStore {
    inner: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl PrefixedStore {
    /// Wrap `inner`, prefixing all keys with `prefix`.
    pub fn new(inner: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    /// Full key name as seen by the underlying store.
    pub fn full_key(&self, key: StoreKey) -> String {
        format!("{}{}", self.prefix, key.as_str())
    }

    /// Read an artifact. An empty or whitespace-only value counts as absent.
    pub async fn get(&self, key: StoreKey) -> Result<Option<String>> {
        let value = self.inner.get(&self.full_key(key)).await?;
        Ok(value.filter(|v| !v.trim().is_empty()))
    }

    /// Read an artifact that must already be present.
    pub async fn require(&self, key: StoreKey) -> Result<String> {
        self.get(key)
            .await?
            .ok_or_else(|| EnrollError::store(format!("missing {}", self.full_key(key))))
    }

    /// Write an artifact.
    pub async fn set(&self, key: StoreKey, value: &str) -> Result<()> {
        self.inner.set(&self.full_key(key), value).await
    }
}

impl std::fmt::Debug for PrefixedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixedStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns true if nothing has been stored.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Directory-backed store: each key is a file named after the key.
///
/// Writes go to a temporary sibling file that is synced to disk and then
/// renamed over the target. The directory is synced after the rename, so a
/// crash leaves either the old value or the new one.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
            || key.contains('\0')
        {
            return Err(EnrollError::store(format!("invalid file store key {key:?}")));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EnrollError::store(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let dir = self.dir.clone();
        let tmp = self.dir.join(format!(".{key}.tmp"));
        let data = value.as_bytes().to_vec();

        let target = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&dir, &tmp, &target, &data))
            .await
            .map_err(|e| EnrollError::store(format!("write task failed: {}", e)))??;

        tracing::debug!("Stored {}", path.display());
        Ok(())
    }
}

fn atomic_write(dir: &Path, tmp: &Path, path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut file = File::create(tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(tmp, path)?;
    fsync_dir(dir)
}

#[cfg(unix)]
fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
