// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory catalog.
//!
//! Serves platforms, items and file contents from memory. Downloads can be
//! held behind a gate and released one at a time, which makes queue
//! behaviour observable step by step.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::{partial_path, CatalogSource, ProgressFn, RemoteError, RemoteResult};
use crate::locks::{resilient_read, resilient_write};
use crate::types::{CatalogFile, CatalogItem, PlatformSummary};

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    platforms: RwLock<Vec<PlatformSummary>>,
    items: RwLock<Vec<CatalogItem>>,
    /// file id -> bytes
    contents: RwLock<HashMap<u64, Vec<u8>>>,
    /// item id -> failure message
    failing: RwLock<HashMap<u64, String>>,
    offline: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    /// Item ids in the order their downloads started.
    started: RwLock<Vec<u64>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog whose downloads block until [`release`](Self::release).
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn add_platform(&self, id: u64, name: &str, slug: &str) {
        resilient_write(&self.platforms).push(PlatformSummary {
            id,
            name: name.to_string(),
            slug: slug.to_string(),
            rom_count: 0,
        });
    }

    /// Add an item with a single file whose content is `bytes`.
    ///
    /// The file id equals the item id.
    pub fn add_rom(&self, id: u64, platform_id: u64, platform_name: &str, file_name: &str, bytes: Vec<u8>) {
        let item = CatalogItem {
            id,
            name: format!("ROM {}", id),
            platform_id,
            platform_name: platform_name.to_string(),
            files: vec![CatalogFile::new(id, file_name, bytes.len() as u64)],
        };
        resilient_write(&self.contents).insert(id, bytes);
        self.add_item(item);
    }

    /// Add or replace an arbitrary item (contents for its files default to empty).
    pub fn add_item(&self, item: CatalogItem) {
        {
            let mut platforms = resilient_write(&self.platforms);
            if let Some(p) = platforms.iter_mut().find(|p| p.id == item.platform_id) {
                p.rom_count += 1;
            }
        }
        let mut items = resilient_write(&self.items);
        items.retain(|i| i.id != item.id);
        items.push(item);
    }

    /// Make downloads of `item_id` fail with `message`.
    pub fn fail_download(&self, item_id: u64, message: &str) {
        resilient_write(&self.failing).insert(item_id, message.to_string());
    }

    /// Simulate the remote server being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Let `n` held downloads finish.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Item ids in download start order.
    pub fn started(&self) -> Vec<u64> {
        resilient_read(&self.started).clone()
    }

    /// Downloads currently in flight.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous downloads seen.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(RemoteError::Unavailable("Request timed out".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Decrements the active counter on drop.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn platforms(&self) -> RemoteResult<Vec<PlatformSummary>> {
        self.check_online()?;
        Ok(resilient_read(&self.platforms).clone())
    }

    async fn platform(&self, id: u64) -> RemoteResult<PlatformSummary> {
        self.check_online()?;
        resilient_read(&self.platforms)
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("platform {}", id)))
    }

    async fn roms_for_platform(&self, platform_id: u64) -> RemoteResult<Vec<CatalogItem>> {
        self.check_online()?;
        Ok(resilient_read(&self.items)
            .iter()
            .filter(|i| i.platform_id == platform_id)
            .cloned()
            .collect())
    }

    async fn rom(&self, id: u64) -> RemoteResult<CatalogItem> {
        self.check_online()?;
        resilient_read(&self.items)
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("rom {}", id)))
    }

    async fn download_file(
        &self,
        item: &CatalogItem,
        file: &CatalogFile,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> RemoteResult<u64> {
        resilient_write(&self.started).push(item.id);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let bytes = resilient_read(&self.contents)
            .get(&file.id)
            .cloned()
            .unwrap_or_default();
        let total = Some(bytes.len() as u64);
        progress(0, total);

        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| RemoteError::Unavailable("download gate closed".to_string()))?;
            permit.forget();
        }
        self.check_online()?;

        let failure = resilient_read(&self.failing).get(&item.id).cloned();
        if let Some(message) = failure {
            return Err(RemoteError::Unavailable(message));
        }

        let part = partial_path(dest);
        if let Some(parent) = part.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Io(e.to_string()))?;
        }
        tokio::fs::write(&part, &bytes)
            .await
            .map_err(|e| RemoteError::Io(e.to_string()))?;
        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| RemoteError::Io(e.to_string()))?;

        progress(bytes.len() as u64, total);
        Ok(bytes.len() as u64)
    }
}
