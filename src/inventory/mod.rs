// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local Inventory Index.
//!
//! Maps `(platform folder, normalized file name)` to a presence record. The
//! scanner fills it; the reconciliation layer reads it on every catalog
//! request.
//!
//! A finished scan replaces each scanned platform wholesale. The only
//! incremental write is [`LocalInventory::register`], used after a download
//! completes so the new file shows up without a rescan.

pub mod store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::locks::{resilient_read, resilient_write};
use crate::scanner::PlatformScan;

pub use store::InventoryStore;

/// Maximum number of scan history records kept.
const HISTORY_LIMIT: usize = 100;

/// Normalize a file name for presence lookups.
///
/// Keeps only the last path component (either separator) and lowercases it,
/// so `"SNES\\Game.SFC"` and `"game.sfc"` compare equal.
pub fn normalize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.trim().to_lowercase()
}

/// Evidence that a file exists in the local collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPresenceRecord {
    /// Local platform folder (e.g. "snes").
    pub platform: String,
    /// File name as found on disk.
    pub file_name: String,
    pub file_path: PathBuf,
    /// Last observed size.
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub present: bool,
}

impl LocalPresenceRecord {
    pub fn new(
        platform: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> Self {
        Self {
            platform: platform.into(),
            file_name: file_name.into(),
            file_path: file_path.into(),
            size_bytes,
            modified_at: None,
            present: true,
        }
    }

    /// Lookup key within the platform.
    pub fn key(&self) -> String {
        normalize_file_name(&self.file_name)
    }
}

/// One completed platform scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub platform: String,
    pub files_scanned: usize,
    pub duration_secs: f64,
    pub scanned_at: DateTime<Utc>,
}

/// File count for one platform folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformCount {
    pub platform: String,
    pub count: usize,
}

/// Summary of the local collection.
#[derive(Debug, Clone, Serialize)]
pub struct InventoryStats {
    pub total_roms: usize,
    /// Sorted by count, largest first.
    pub by_platform: Vec<PlatformCount>,
    pub last_scan: Option<ScanRecord>,
}

/// Point-in-time content of the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// platform -> normalized name -> record
    platforms: HashMap<String, HashMap<String, LocalPresenceRecord>>,
    /// Most recent last.
    #[serde(default)]
    history: Vec<ScanRecord>,
    #[serde(default)]
    pub last_saved: Option<DateTime<Utc>>,
    /// Version for future migrations
    #[serde(default)]
    pub version: u32,
}

impl Default for InventorySnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl InventorySnapshot {
    pub fn new() -> Self {
        Self {
            platforms: HashMap::new(),
            history: Vec::new(),
            last_saved: None,
            version: 1,
        }
    }

    /// Record for a file, if any.
    pub fn lookup(&self, platform: &str, file_name: &str) -> Option<&LocalPresenceRecord> {
        self.platforms
            .get(platform)
            .and_then(|files| files.get(&normalize_file_name(file_name)))
    }

    /// Whether a present record exists for the file.
    pub fn is_present(&self, platform: &str, file_name: &str) -> bool {
        self.lookup(platform, file_name).is_some_and(|r| r.present)
    }

    /// Replace everything known about `platform` with `records`.
    pub fn replace_platform(&mut self, platform: &str, records: Vec<LocalPresenceRecord>) {
        let files: HashMap<String, LocalPresenceRecord> =
            records.into_iter().map(|r| (r.key(), r)).collect();
        self.platforms.insert(platform.to_string(), files);
    }

    /// Add or replace a single record.
    pub fn upsert(&mut self, record: LocalPresenceRecord) {
        self.platforms
            .entry(record.platform.clone())
            .or_default()
            .insert(record.key(), record);
    }

    /// Remove a single record, returning it.
    pub fn remove(&mut self, platform: &str, file_name: &str) -> Option<LocalPresenceRecord> {
        self.platforms
            .get_mut(platform)
            .and_then(|files| files.remove(&normalize_file_name(file_name)))
    }

    /// Every record of a platform, sorted by file name.
    pub fn platform_records(&self, platform: &str) -> Vec<&LocalPresenceRecord> {
        let mut records: Vec<_> = self
            .platforms
            .get(platform)
            .map(|files| files.values().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        records
    }

    pub fn platform_file_count(&self, platform: &str) -> usize {
        self.platforms.get(platform).map_or(0, |files| files.len())
    }

    pub fn total_files(&self) -> usize {
        self.platforms.values().map(|files| files.len()).sum()
    }

    pub fn record_scan(&mut self, record: ScanRecord) {
        self.history.push(record);
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }

    pub fn last_scan(&self) -> Option<&ScanRecord> {
        self.history.last()
    }

    pub fn stats(&self) -> InventoryStats {
        let mut by_platform: Vec<PlatformCount> = self
            .platforms
            .iter()
            .filter(|(_, files)| !files.is_empty())
            .map(|(platform, files)| PlatformCount {
                platform: platform.clone(),
                count: files.len(),
            })
            .collect();
        by_platform.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.platform.cmp(&b.platform)));

        InventoryStats {
            total_roms: self.total_files(),
            by_platform,
            last_scan: self.last_scan().cloned(),
        }
    }
}

/// Shared handle to the index, optionally backed by a snapshot file.
#[derive(Debug, Clone)]
pub struct LocalInventory {
    inner: Arc<RwLock<InventorySnapshot>>,
    store: Option<Arc<InventoryStore>>,
}

impl Default for LocalInventory {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl LocalInventory {
    /// An empty, non-persistent index.
    pub fn in_memory() -> Self {
        Self::from_snapshot(InventorySnapshot::new())
    }

    pub fn from_snapshot(snapshot: InventorySnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
            store: None,
        }
    }

    /// Open an index persisted at `store`, loading whatever is there.
    ///
    /// A corrupt snapshot is logged and replaced by an empty index; the next
    /// scan rebuilds it.
    pub fn open(store: InventoryStore) -> Self {
        let snapshot = match store.load() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Failed to load inventory snapshot, starting empty: {:#}", e);
                InventorySnapshot::new()
            }
        };
        tracing::info!(
            files = snapshot.total_files(),
            path = ?store.path(),
            "Local inventory loaded"
        );
        Self {
            inner: Arc::new(RwLock::new(snapshot)),
            store: Some(Arc::new(store)),
        }
    }

    /// Run `f` against the current content.
    pub fn read<R>(&self, f: impl FnOnce(&InventorySnapshot) -> R) -> R {
        f(&resilient_read(&self.inner))
    }

    /// Clone of the current content.
    pub fn snapshot(&self) -> InventorySnapshot {
        self.read(|s| s.clone())
    }

    pub fn is_present(&self, platform: &str, file_name: &str) -> bool {
        self.read(|s| s.is_present(platform, file_name))
    }

    pub fn stats(&self) -> InventoryStats {
        self.read(|s| s.stats())
    }

    /// Replace each scanned platform wholesale and record the scan.
    ///
    /// Blocking: writes the snapshot file when persistent.
    pub fn apply_scan(&self, results: Vec<PlatformScan>) -> Result<()> {
        self.merge_scan(results);
        self.persist()
    }

    /// In-memory part of [`apply_scan`](Self::apply_scan); nothing is written.
    pub(crate) fn merge_scan(&self, results: Vec<PlatformScan>) {
        let mut snapshot = resilient_write(&self.inner);
        for scan in results {
            let files_scanned = scan.records.len();
            tracing::info!(platform = %scan.platform, files = files_scanned, "Replacing platform inventory");
            snapshot.replace_platform(&scan.platform, scan.records);
            snapshot.record_scan(ScanRecord {
                platform: scan.platform,
                files_scanned,
                duration_secs: scan.duration.as_secs_f64(),
                scanned_at: Utc::now(),
            });
        }
    }

    /// Add or replace one record (used after a completed download).
    ///
    /// Blocking: writes the snapshot file when persistent.
    pub fn register(&self, record: LocalPresenceRecord) -> Result<()> {
        tracing::debug!(platform = %record.platform, file = %record.file_name, "Registering local file");
        resilient_write(&self.inner).upsert(record);
        self.persist()
    }

    pub(crate) fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let mut snapshot = self.snapshot();
        store.save(&mut snapshot)?;
        resilient_write(&self.inner).last_saved = snapshot.last_saved;
        Ok(())
    }
}
