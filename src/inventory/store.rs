// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! On-disk inventory snapshot.
//!
//! The snapshot is a single JSON file written with a temp file + atomic
//! rename while holding an exclusive lock on a sibling `.lock` file, so a
//! second romsync instance (e.g. `romsync scan` next to a running server)
//! never reads a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use fs2::FileExt;

use super::InventorySnapshot;

/// Default timeout for acquiring file locks (5 seconds)
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry interval when waiting for lock acquisition
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Location of a persisted inventory snapshot.
#[derive(Debug, Clone)]
pub struct InventoryStore {
    path: PathBuf,
}

impl InventoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    /// Acquire an exclusive lock on `path`, retrying until `timeout`.
    fn acquire_exclusive_lock_with_timeout(path: &Path, timeout: Duration) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory for lock file: {:?}", parent))?;
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file: {:?}", path))?;

        let start = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&lock_file) {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!(
                            "Timed out waiting for exclusive lock on {:?} after {:?}. \
                             Another romsync instance may be writing the inventory.",
                            path,
                            timeout
                        );
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to acquire exclusive lock on {:?}", path));
                }
            }
        }
    }

    /// Acquire a shared lock on an open file, retrying until `timeout`.
    fn acquire_shared_lock_with_timeout(file: &File, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            match FileExt::try_lock_shared(file) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        bail!("Timed out waiting for shared lock after {:?}", timeout);
                    }
                    thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(e).context("Failed to acquire shared lock on inventory file");
                }
            }
        }
    }

    /// Load the snapshot. A missing file is an empty inventory.
    pub fn load(&self) -> Result<InventorySnapshot> {
        self.load_with_timeout(LOCK_TIMEOUT)
    }

    pub fn load_with_timeout(&self, timeout: Duration) -> Result<InventorySnapshot> {
        if !self.path.exists() {
            return Ok(InventorySnapshot::new());
        }

        let lock_path = self.lock_path();
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;
        Self::acquire_shared_lock_with_timeout(&lock_file, timeout)?;

        let content = fs::read_to_string(&self.path).context("Failed to read inventory file")?;
        let snapshot = serde_json::from_str(&content).context("Failed to parse inventory file")?;
        Ok(snapshot)
    }

    /// Write the snapshot atomically, stamping `last_saved`.
    pub fn save(&self, snapshot: &mut InventorySnapshot) -> Result<()> {
        self.save_with_timeout(snapshot, LOCK_TIMEOUT)
    }

    pub fn save_with_timeout(&self, snapshot: &mut InventorySnapshot, timeout: Duration) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let _lock_guard = Self::acquire_exclusive_lock_with_timeout(&self.lock_path(), timeout)?;

        let temp_path = self.path.with_extension("tmp");
        snapshot.last_saved = Some(Utc::now());
        let content = serde_json::to_string(snapshot).context("Failed to serialize inventory")?;

        {
            let mut temp_file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .with_context(|| format!("Failed to create temp file: {:?}", temp_path))?;
            temp_file
                .write_all(content.as_bytes())
                .context("Failed to write to temp file")?;
            temp_file.sync_all().context("Failed to sync temp file to disk")?;
        }

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!("Failed to rename {:?} -> {:?}", temp_path, self.path)
        })?;
        Ok(())
    }
}
