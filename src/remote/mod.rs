// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Remote ROM catalog.
//!
//! Everything romsync knows about the remote library comes through
//! [`CatalogSource`]. [`RommClient`] talks to a RomM server over HTTP;
//! [`MemoryCatalog`] serves a fixed catalog from memory.

pub mod memory;
pub mod romm;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::types::{CatalogFile, CatalogItem, PlatformSummary};

pub use memory::MemoryCatalog;
pub use romm::RommClient;

/// Progress callback: `(bytes_done, bytes_total)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Errors from the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The requested platform, item or file does not exist.
    NotFound(String),
    /// Credentials were rejected.
    Unauthorized(String),
    /// The server could not be reached or answered with an error.
    Unavailable(String),
    /// Local storage failed while writing a download.
    Io(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "not found: {}", msg),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {}", msg),
            Self::Unavailable(msg) => write!(f, "{}", msg),
            Self::Io(msg) => write!(f, "storage error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound(msg) => SyncError::NotFound(msg),
            other => SyncError::TransientFetch(other.to_string()),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Read access to a remote ROM library.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// All platforms.
    async fn platforms(&self) -> RemoteResult<Vec<PlatformSummary>>;

    async fn platform(&self, id: u64) -> RemoteResult<PlatformSummary>;

    /// Every item of a platform, across all pages.
    async fn roms_for_platform(&self, platform_id: u64) -> RemoteResult<Vec<CatalogItem>>;

    async fn rom(&self, id: u64) -> RemoteResult<CatalogItem>;

    /// Stream `file` of `item` to `dest`.
    ///
    /// Bytes go to `<dest>.part` first and are renamed into place on
    /// success, so `dest` never holds a partial file. Returns the number of
    /// bytes written.
    async fn download_file(
        &self,
        item: &CatalogItem,
        file: &CatalogFile,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> RemoteResult<u64>;

    /// Cheap reachability check.
    async fn ping(&self) -> RemoteResult<()> {
        self.platforms().await.map(|_| ())
    }
}

/// `<dest>.part`
pub fn partial_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".");
    name.push(crate::scanner::PARTIAL_SUFFIX);
    std::path::PathBuf::from(name)
}

/// Fill in the platform name of items that came without one.
pub fn fill_platform_name(items: &mut [CatalogItem], platform: &PlatformSummary) {
    for item in items.iter_mut() {
        if item.platform_name.is_empty() {
            item.platform_name = platform.name.clone();
        }
        if item.platform_id == 0 {
            item.platform_id = platform.id;
        }
    }
}
