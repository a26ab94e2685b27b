// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download queue manager.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::state::QueueState;
use super::types::{BatchOutcome, QueueCounts, QueueEntry, QueueStatus};
use crate::error::SyncError;
use crate::inventory::LocalInventory;
use crate::locks::{resilient_read, resilient_write};
use crate::remote::{partial_path, CatalogSource};
use crate::scanner::RomScanner;
use crate::types::CatalogItem;

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Maximum simultaneous transfers (at least 1).
    pub max_concurrent: usize,
    pub transfer_timeout: Duration,
    /// Pause between items of a batch.
    pub batch_delay: Duration,
    /// How long a completed entry stays visible.
    pub cleanup_delay: Duration,
    /// Wait before a completed file is registered in the inventory.
    pub refresh_delay: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            transfer_timeout: Duration::from_secs(30 * 60),
            batch_delay: Duration::from_millis(100),
            cleanup_delay: Duration::from_secs(3),
            refresh_delay: Duration::from_secs(1),
        }
    }
}

/// Admitted entry whose transfer still has to be spawned.
struct Admitted {
    id: u64,
    ticket: u64,
    item: CatalogItem,
    folder: String,
    destination: PathBuf,
}

struct Inner {
    state: RwLock<QueueState>,
    events: watch::Sender<Vec<QueueEntry>>,
    catalog: Arc<dyn CatalogSource>,
    inventory: LocalInventory,
    scanner: RomScanner,
    settings: QueueSettings,
}

/// Manager for ROM downloads.
///
/// Handles queueing, admission, transfer and cleanup. Every status change
/// and admission decision happens under one lock, so at most
/// `max_concurrent` entries are ever `downloading`, and queued entries are
/// admitted oldest first.
#[derive(Clone)]
pub struct DownloadManager {
    inner: Arc<Inner>,
}

impl DownloadManager {
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        inventory: LocalInventory,
        scanner: RomScanner,
        mut settings: QueueSettings,
    ) -> Self {
        settings.max_concurrent = settings.max_concurrent.max(1);
        let (events, _rx) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(QueueState::default()),
                events,
                catalog,
                inventory,
                scanner,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    /// Queue item `item_id` for download into local folder `folder`.
    ///
    /// Returns the entry as it stands after admission, so it is already
    /// `downloading` when a slot was free. An id that is still queued or
    /// downloading returns its existing entry; a finished or failed one is
    /// replaced by a fresh entry.
    pub async fn enqueue(&self, item_id: u64, folder: &str) -> Result<QueueEntry, SyncError> {
        let folder = folder.trim();
        if folder.is_empty() {
            return Err(SyncError::Configuration(format!(
                "no destination folder for rom {}",
                item_id
            )));
        }
        if let Some(existing) = self.active_entry(item_id) {
            tracing::debug!(item_id, "Already queued, returning existing entry");
            return Ok(existing);
        }

        let item = self.inner.catalog.rom(item_id).await.map_err(SyncError::from)?;
        let file = item
            .primary_file()
            .ok_or_else(|| SyncError::NotFound(format!("rom {} has no files", item_id)))?;
        let file_name = safe_file_name(&file.file_name).ok_or_else(|| {
            SyncError::NotFound(format!(
                "rom {} has no usable file name ({:?})",
                item_id, file.file_name
            ))
        })?;
        let destination = self.inner.scanner.folder_path(folder).join(&file_name);

        let mut entry = QueueEntry::new(
            item_id,
            item.display_name(),
            folder,
            file_name,
            destination,
        );
        if file.file_size_bytes > 0 {
            entry.bytes_total = Some(file.file_size_bytes);
        }

        let (entry, admitted) = {
            let mut state = resilient_write(&self.inner.state);
            // Another request may have queued the id while we were fetching.
            if let Some(slot) = state.get(item_id).filter(|s| s.entry.status.is_active()) {
                return Ok(slot.entry.clone());
            }
            state.push(entry, item);
            let admitted = self.admit(&mut state);
            let entry = state.get(item_id).map(|s| s.entry.clone());
            self.publish(&state);
            (entry, admitted)
        };
        self.spawn_transfers(admitted);

        tracing::info!(item_id, folder, "Queued download");
        entry.ok_or_else(|| SyncError::NotFound(format!("rom {} vanished from the queue", item_id)))
    }

    /// Queue several items, one after another with `batch_delay` between.
    ///
    /// A missing folder rejects the whole batch before anything is queued.
    /// Per-item failures are reported and do not stop the rest.
    pub async fn enqueue_batch(
        &self,
        item_ids: &[u64],
        folder: &str,
    ) -> Result<Vec<BatchOutcome>, SyncError> {
        if folder.trim().is_empty() {
            return Err(SyncError::Configuration(
                "no destination folder for batch".to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(item_ids.len());
        for (i, &id) in item_ids.iter().enumerate() {
            if i > 0 && !self.inner.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.inner.settings.batch_delay).await;
            }
            let outcome = match self.enqueue(id, folder).await {
                Ok(entry) => BatchOutcome {
                    rom_id: id,
                    entry: Some(entry),
                    error: None,
                    kind: None,
                },
                Err(e) => {
                    tracing::warn!(item_id = id, "Batch item failed: {}", e);
                    BatchOutcome {
                        rom_id: id,
                        entry: None,
                        error: Some(e.to_string()),
                        kind: Some(e.kind().to_string()),
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Run [`enqueue_batch`](Self::enqueue_batch) on its own task.
    ///
    /// The folder is checked before anything is spawned; outcomes show up in
    /// the queue as each item is enqueued and are returned by the handle.
    pub fn spawn_batch(
        &self,
        item_ids: Vec<u64>,
        folder: &str,
    ) -> Result<JoinHandle<Vec<BatchOutcome>>, SyncError> {
        let folder = folder.trim().to_string();
        if folder.is_empty() {
            return Err(SyncError::Configuration(
                "no destination folder for batch".to_string(),
            ));
        }
        let this = self.clone();
        Ok(tokio::spawn(async move {
            match this.enqueue_batch(&item_ids, &folder).await {
                Ok(outcomes) => {
                    let failed = outcomes.iter().filter(|o| o.entry.is_none()).count();
                    tracing::info!(
                        folder = %folder,
                        queued = outcomes.len() - failed,
                        failed,
                        "Batch enqueue finished"
                    );
                    outcomes
                }
                Err(e) => {
                    tracing::error!(folder = %folder, "Batch enqueue rejected: {}", e);
                    Vec::new()
                }
            }
        }))
    }

    /// All entries in enqueue order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        resilient_read(&self.inner.state).entries()
    }

    pub fn get(&self, id: u64) -> Option<QueueEntry> {
        resilient_read(&self.inner.state).get(id).map(|s| s.entry.clone())
    }

    pub fn counts(&self) -> QueueCounts {
        resilient_read(&self.inner.state).counts()
    }

    /// Remove an entry that is not transferring.
    pub fn dismiss(&self, id: u64) -> Result<QueueEntry, SyncError> {
        let mut state = resilient_write(&self.inner.state);
        match state.get(id).map(|s| s.entry.status) {
            None => Err(SyncError::NotFound(format!("no queue entry for rom {}", id))),
            Some(QueueStatus::Downloading) => Err(SyncError::AdmissionConflict(format!(
                "rom {} is downloading",
                id
            ))),
            Some(_) => {
                let slot = state
                    .remove(id)
                    .ok_or_else(|| SyncError::NotFound(format!("no queue entry for rom {}", id)))?;
                self.publish(&state);
                Ok(slot.entry)
            }
        }
    }

    /// Remove every completed and failed entry.
    pub fn clear_finished(&self) -> usize {
        let mut state = resilient_write(&self.inner.state);
        let removed = state.clear_finished();
        if removed > 0 {
            self.publish(&state);
        }
        removed
    }

    /// Receive the entry list on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<QueueEntry>> {
        self.inner.events.subscribe()
    }

    fn active_entry(&self, id: u64) -> Option<QueueEntry> {
        resilient_read(&self.inner.state)
            .get(id)
            .filter(|s| s.entry.status.is_active())
            .map(|s| s.entry.clone())
    }

    /// Move queued entries to `downloading` while slots are free.
    fn admit(&self, state: &mut QueueState) -> Vec<Admitted> {
        let mut admitted = Vec::new();
        while state.downloading_count() < self.inner.settings.max_concurrent {
            let Some(id) = state.next_queued() else {
                break;
            };
            let Some(slot) = state.get_mut(id) else {
                break;
            };
            slot.entry.update_status(QueueStatus::Downloading);
            slot.entry.progress = 0;
            tracing::debug!(item_id = id, "Admitted download");
            admitted.push(Admitted {
                id,
                ticket: slot.ticket,
                item: slot.item.clone(),
                folder: slot.entry.platform.clone(),
                destination: slot.entry.destination.clone(),
            });
        }
        admitted
    }

    fn spawn_transfers(&self, admitted: Vec<Admitted>) {
        for job in admitted {
            let this = self.clone();
            tokio::spawn(async move {
                this.transfer(job).await;
            });
        }
    }

    async fn transfer(&self, job: Admitted) {
        let Admitted {
            id,
            ticket,
            item,
            folder,
            destination,
        } = job;
        let Some(file) = item.primary_file().cloned() else {
            self.finish(id, ticket, Err(format!("rom {} has no files", id)));
            return;
        };

        tracing::info!(item_id = id, dest = ?destination, "Starting download");
        let reporter = self.clone();
        let progress = move |done: u64, total: Option<u64>| {
            reporter.report_progress(id, ticket, done, total);
        };

        let timeout = self.inner.settings.transfer_timeout;
        let result = tokio::time::timeout(
            timeout,
            self.inner
                .catalog
                .download_file(&item, &file, &destination, &progress),
        )
        .await;

        let outcome = match result {
            Ok(Ok(bytes)) => {
                tracing::info!(item_id = id, bytes, "Download completed");
                Ok(())
            }
            Ok(Err(e)) => Err(SyncError::Transfer(e.to_string()).to_string()),
            Err(_) => {
                let _ = tokio::fs::remove_file(partial_path(&destination)).await;
                Err(SyncError::Transfer(format!(
                    "download timed out after {}s",
                    timeout.as_secs()
                ))
                .to_string())
            }
        };

        let completed = outcome.is_ok();
        self.finish(id, ticket, outcome);
        if completed {
            let this = self.clone();
            tokio::spawn(async move {
                this.after_completion(id, ticket, folder, destination).await;
            });
        }
    }

    fn report_progress(&self, id: u64, ticket: u64, done: u64, total: Option<u64>) {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        // 100 is reserved for completed entries.
        let percent = ((done.saturating_mul(100)) / total).min(99) as u8;

        let mut state = resilient_write(&self.inner.state);
        let Some(slot) = state.get_ticket_mut(id, ticket) else {
            return;
        };
        if slot.entry.status != QueueStatus::Downloading || slot.entry.progress == percent {
            return;
        }
        slot.entry.progress = percent;
        slot.entry.bytes_total = Some(total);
        slot.entry.updated_at = chrono::Utc::now();
        self.publish(&state);
    }

    /// Record a transfer's outcome and admit the next entry.
    fn finish(&self, id: u64, ticket: u64, outcome: Result<(), String>) {
        let admitted = {
            let mut state = resilient_write(&self.inner.state);
            if let Some(slot) = state.get_ticket_mut(id, ticket) {
                match outcome {
                    Ok(()) => {
                        slot.entry.progress = 100;
                        slot.entry.error = None;
                        slot.entry.update_status(QueueStatus::Completed);
                    }
                    Err(message) => {
                        tracing::error!(item_id = id, "Download failed: {}", message);
                        slot.entry.error = Some(message);
                        slot.entry.update_status(QueueStatus::Error);
                    }
                }
            }
            let admitted = self.admit(&mut state);
            self.publish(&state);
            admitted
        };
        self.spawn_transfers(admitted);
    }

    /// Register the new file locally, then drop the entry from the queue.
    ///
    /// Registration happens even if the entry was dismissed or cleared in
    /// the meantime; only the removal is tied to `ticket`.
    async fn after_completion(&self, id: u64, ticket: u64, folder: String, destination: PathBuf) {
        let settings = &self.inner.settings;
        tokio::time::sleep(settings.refresh_delay).await;

        let scanner = self.inner.scanner.clone();
        let inventory = self.inner.inventory.clone();
        let dest = destination.clone();
        let refreshed = tokio::task::spawn_blocking(move || {
            let record = scanner.quick_scan_file(&folder, &dest)?;
            inventory.register(record)
        })
        .await;
        match refreshed {
            Ok(Ok(())) => tracing::debug!(item_id = id, "Registered downloaded file"),
            Ok(Err(e)) => tracing::warn!(item_id = id, "Failed to register {:?}: {:#}", destination, e),
            Err(e) => tracing::warn!(item_id = id, "Refresh task failed: {}", e),
        }

        tokio::time::sleep(settings.cleanup_delay.saturating_sub(settings.refresh_delay)).await;
        let mut state = resilient_write(&self.inner.state);
        let done = state
            .get(id)
            .is_some_and(|s| s.ticket == ticket && s.entry.status == QueueStatus::Completed);
        if done && state.remove_ticket(id, ticket).is_some() {
            self.publish(&state);
        }
    }

    fn publish(&self, state: &QueueState) {
        self.inner.events.send_replace(state.entries());
    }
}

/// Last path component of a remote file name, if it is a usable name.
fn safe_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Path::new(base)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryCatalog;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        catalog: Arc<MemoryCatalog>,
        inventory: LocalInventory,
        manager: DownloadManager,
    }

    fn settings() -> QueueSettings {
        QueueSettings {
            max_concurrent: 2,
            transfer_timeout: Duration::from_secs(10),
            batch_delay: Duration::from_millis(1),
            cleanup_delay: Duration::from_secs(60),
            refresh_delay: Duration::from_millis(10),
        }
    }

    fn fixture(catalog: MemoryCatalog, settings: QueueSettings) -> Fixture {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path().to_path_buf();
        let catalog = Arc::new(catalog);
        catalog.add_platform(1, "SNES", "snes");
        for id in 1..=5 {
            catalog.add_rom(id, 1, "SNES", &format!("Game {}.sfc", id), vec![id as u8; 64]);
        }
        let inventory = LocalInventory::in_memory();
        let manager = DownloadManager::new(
            catalog.clone(),
            inventory.clone(),
            RomScanner::new(&root),
            settings,
        );
        Fixture {
            _dir: dir,
            root,
            catalog,
            inventory,
            manager,
        }
    }

    async fn wait_until(manager: &DownloadManager, f: impl Fn(&[QueueEntry]) -> bool) {
        let mut rx = manager.subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if f(&manager.entries()) {
                    return;
                }
                if rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .expect("queue did not reach the expected state in time");
    }

    fn status_of(entries: &[QueueEntry], id: u64) -> Option<QueueStatus> {
        entries.iter().find(|e| e.id == id).map(|e| e.status)
    }

    fn count(entries: &[QueueEntry], status: QueueStatus) -> usize {
        entries.iter().filter(|e| e.status == status).count()
    }

    #[tokio::test]
    async fn test_missing_folder_creates_nothing() {
        let fx = fixture(MemoryCatalog::new(), settings());

        let err = fx.manager.enqueue(1, "  ").await.unwrap_err();
        assert_eq!(err.kind(), "configuration");
        let err = fx.manager.enqueue_batch(&[1, 2], "").await.unwrap_err();
        assert_eq!(err.kind(), "configuration");

        assert!(fx.manager.entries().is_empty());
        assert!(fx.catalog.started().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failures_create_nothing() {
        let fx = fixture(MemoryCatalog::new(), settings());
        fx.catalog.add_item(CatalogItem {
            id: 50,
            name: "No files".to_string(),
            platform_id: 1,
            platform_name: "SNES".to_string(),
            files: vec![],
        });

        assert_eq!(fx.manager.enqueue(99, "snes").await.unwrap_err().kind(), "not_found");
        assert_eq!(fx.manager.enqueue(50, "snes").await.unwrap_err().kind(), "not_found");
        fx.catalog.set_offline(true);
        assert_eq!(fx.manager.enqueue(1, "snes").await.unwrap_err().kind(), "transient_fetch");

        assert!(fx.manager.entries().is_empty());
    }

    #[tokio::test]
    async fn test_cap_and_fifo_admission() {
        let fx = fixture(MemoryCatalog::gated(), settings());

        for id in 1..=5 {
            fx.manager.enqueue(id, "snes").await.unwrap();
        }
        let entries = fx.manager.entries();
        assert_eq!(entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
        assert_eq!(status_of(&entries, 1), Some(QueueStatus::Downloading));
        assert_eq!(status_of(&entries, 2), Some(QueueStatus::Downloading));
        assert_eq!(count(&entries, QueueStatus::Queued), 3);

        // Release one transfer at a time; the oldest queued entry goes next.
        for (released, next) in [(1, Some(3)), (2, Some(4)), (3, Some(5)), (4, None), (5, None)] {
            fx.catalog.release(1);
            wait_until(&fx.manager, |e| count(e, QueueStatus::Completed) == released).await;
            let entries = fx.manager.entries();
            assert!(count(&entries, QueueStatus::Downloading) <= 2);
            if let Some(next) = next {
                assert_eq!(status_of(&entries, next), Some(QueueStatus::Downloading));
                for later in (next + 1)..=5 {
                    assert_eq!(status_of(&entries, later), Some(QueueStatus::Queued));
                }
            }
        }

        assert!(fx.catalog.peak() <= 2);
        assert_eq!(fx.catalog.started().len(), 5);
        let started = fx.catalog.started();
        assert_eq!(&started[2..], &[3, 4, 5]);
        assert!(fx.root.join("snes").join("Game 5.sfc").exists());
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let fx = fixture(MemoryCatalog::new(), settings());
        fx.catalog.fail_download(2, "connection reset by peer");

        for id in 1..=3 {
            fx.manager.enqueue(id, "snes").await.unwrap();
        }
        wait_until(&fx.manager, |e| e.iter().all(|x| x.status.is_terminal())).await;

        let entries = fx.manager.entries();
        assert_eq!(status_of(&entries, 1), Some(QueueStatus::Completed));
        assert_eq!(status_of(&entries, 3), Some(QueueStatus::Completed));
        let failed = entries.iter().find(|e| e.id == 2).unwrap();
        assert_eq!(failed.status, QueueStatus::Error);
        assert!(failed.error.as_deref().unwrap().contains("connection reset"));
        assert!(!fx.root.join("snes").join("Game 2.sfc").exists());
        assert!(!fx.root.join("snes").join("Game 2.sfc.part").exists());
    }

    #[tokio::test]
    async fn test_timeout_marks_error_and_frees_slot() {
        let mut short = settings();
        short.max_concurrent = 1;
        short.transfer_timeout = Duration::from_millis(100);
        let fx = fixture(MemoryCatalog::gated(), short);

        fx.manager.enqueue(1, "snes").await.unwrap();
        fx.manager.enqueue(2, "snes").await.unwrap();
        wait_until(&fx.manager, |e| status_of(e, 1) == Some(QueueStatus::Error)).await;

        let first = fx.manager.get(1).unwrap();
        assert!(first.error.unwrap().contains("timed out"));
        assert_eq!(fx.manager.get(2).unwrap().status, QueueStatus::Downloading);
    }

    #[tokio::test]
    async fn test_reenqueue_returns_existing_active_entry() {
        let fx = fixture(MemoryCatalog::gated(), settings());

        let first = fx.manager.enqueue(1, "snes").await.unwrap();
        let again = fx.manager.enqueue(1, "snes").await.unwrap();
        assert_eq!(first.created_at, again.created_at);
        assert_eq!(fx.manager.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_entry_replaced_on_reenqueue() {
        let fx = fixture(MemoryCatalog::new(), settings());
        fx.catalog.fail_download(1, "boom");
        fx.manager.enqueue(1, "snes").await.unwrap();
        wait_until(&fx.manager, |e| status_of(e, 1) == Some(QueueStatus::Error)).await;

        let failed = fx.manager.get(1).unwrap();
        let retried = fx.manager.enqueue(1, "snes").await.unwrap();
        assert!(retried.status.is_active());
        assert!(retried.created_at >= failed.created_at);
        assert!(retried.error.is_none());
        assert_eq!(fx.manager.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_registers_file_and_cleans_up() {
        let mut quick = settings();
        quick.cleanup_delay = Duration::from_millis(200);
        let fx = fixture(MemoryCatalog::new(), quick);

        let entry = fx.manager.enqueue(3, "snes").await.unwrap();
        assert_eq!(entry.destination, fx.root.join("snes").join("Game 3.sfc"));
        wait_until(&fx.manager, |e| status_of(e, 3) == Some(QueueStatus::Completed)).await;
        assert_eq!(fx.manager.get(3).unwrap().progress, 100);

        wait_until(&fx.manager, |e| e.is_empty()).await;
        assert!(fx.inventory.is_present("snes", "game 3.sfc"));
    }

    #[tokio::test]
    async fn test_cleared_completion_is_still_registered() {
        let mut slow = settings();
        slow.refresh_delay = Duration::from_millis(200);
        let fx = fixture(MemoryCatalog::new(), slow);

        fx.manager.enqueue(1, "snes").await.unwrap();
        wait_until(&fx.manager, |e| status_of(e, 1) == Some(QueueStatus::Completed)).await;
        assert_eq!(fx.manager.clear_finished(), 1);
        assert!(fx.manager.entries().is_empty());

        tokio::time::timeout(Duration::from_secs(5), async {
            while !fx.inventory.is_present("snes", "Game 1.sfc") {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("completed download never reached the inventory");
        assert!(fx.root.join("snes").join("Game 1.sfc").exists());
    }

    #[tokio::test]
    async fn test_refresh_uses_folder_of_finished_transfer() {
        let mut slow = settings();
        slow.refresh_delay = Duration::from_millis(200);
        let fx = fixture(MemoryCatalog::new(), slow);
        fx.catalog.add_platform(2, "Super Famicom", "sfc");

        fx.manager.enqueue(2, "snes").await.unwrap();
        wait_until(&fx.manager, |e| status_of(e, 2) == Some(QueueStatus::Completed)).await;
        // Same id queued again, into another folder, before the refresh runs.
        fx.catalog.fail_download(2, "gone");
        fx.manager.enqueue(2, "sfc").await.unwrap();
        wait_until(&fx.manager, |e| status_of(e, 2) == Some(QueueStatus::Error)).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while !fx.inventory.is_present("snes", "Game 2.sfc") {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("completed download never reached the inventory");
        assert!(!fx.inventory.is_present("sfc", "Game 2.sfc"));
    }

    #[tokio::test]
    async fn test_error_entries_persist_until_dismissed() {
        let mut quick = settings();
        quick.cleanup_delay = Duration::from_millis(50);
        let fx = fixture(MemoryCatalog::new(), quick);
        fx.catalog.fail_download(4, "disk full");

        fx.manager.enqueue(4, "snes").await.unwrap();
        wait_until(&fx.manager, |e| status_of(e, 4) == Some(QueueStatus::Error)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fx.manager.get(4).unwrap().status, QueueStatus::Error);

        let dismissed = fx.manager.dismiss(4).unwrap();
        assert_eq!(dismissed.id, 4);
        assert!(fx.manager.entries().is_empty());
        assert_eq!(fx.manager.dismiss(4).unwrap_err().kind(), "not_found");
    }

    #[tokio::test]
    async fn test_cannot_dismiss_downloading_entry() {
        let fx = fixture(MemoryCatalog::gated(), settings());
        fx.manager.enqueue(1, "snes").await.unwrap();
        assert_eq!(fx.manager.dismiss(1).unwrap_err().kind(), "admission_conflict");
    }

    #[tokio::test]
    async fn test_clear_finished() {
        let fx = fixture(MemoryCatalog::new(), settings());
        fx.catalog.fail_download(2, "boom");
        fx.manager.enqueue(1, "snes").await.unwrap();
        fx.manager.enqueue(2, "snes").await.unwrap();
        wait_until(&fx.manager, |e| e.iter().all(|x| x.status.is_terminal())).await;

        assert_eq!(fx.manager.clear_finished(), 2);
        assert!(fx.manager.entries().is_empty());
    }

    #[tokio::test]
    async fn test_batch_reports_per_item() {
        let fx = fixture(MemoryCatalog::gated(), settings());

        let outcomes = fx.manager.enqueue_batch(&[1, 99, 2, 3], "snes").await.unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].entry.is_some());
        assert_eq!(outcomes[1].kind.as_deref(), Some("not_found"));
        assert!(outcomes[1].entry.is_none());
        assert!(outcomes[2].entry.is_some());
        assert_eq!(outcomes[3].entry.as_ref().unwrap().status, QueueStatus::Queued);

        let counts = fx.manager.counts();
        assert_eq!((counts.downloading, counts.queued), (2, 1));
    }

    #[tokio::test]
    async fn test_spawned_batch_runs_in_background() {
        let mut spaced = settings();
        spaced.batch_delay = Duration::from_millis(100);
        let fx = fixture(MemoryCatalog::gated(), spaced);

        assert_eq!(
            fx.manager.spawn_batch(vec![1, 2], " ").unwrap_err().kind(),
            "configuration"
        );

        let handle = fx.manager.spawn_batch(vec![1, 99, 2, 3], "snes").unwrap();
        // The first item is not even queued yet when the call returns.
        assert!(fx.manager.entries().len() < 4);

        let outcomes = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("batch did not finish")
            .expect("batch task panicked");
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[1].kind.as_deref(), Some("not_found"));
        let ids: Vec<u64> = fx.manager.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("Game.sfc").as_deref(), Some("Game.sfc"));
        assert_eq!(safe_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_file_name("dir\\Game.sfc").as_deref(), Some("Game.sfc"));
        assert_eq!(safe_file_name(".."), None);
        assert_eq!(safe_file_name("a/"), None);
    }
}
