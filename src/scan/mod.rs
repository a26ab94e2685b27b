// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scan orchestrator.
//!
//! At most one scan job runs at a time. The job walks the requested platform
//! folders on the blocking pool and, once every folder is done, replaces
//! each scanned platform in the inventory wholesale.
//!
//! A job still marked running after `stale_after` is treated as abandoned:
//! status reports it as failed and a new scan may start. A late result from
//! an abandoned (or reset) job is discarded.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::error::SyncError;
use crate::inventory::LocalInventory;
use crate::locks::{resilient_read, resilient_write};
use crate::scanner::RomScanner;

/// Snapshot of the scan job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanJob {
    /// Increases with every started or reset job.
    pub generation: u64,
    pub in_progress: bool,
    pub started_at: Option<DateTime<Utc>>,
    /// Folders of the current or last job.
    pub platforms: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Files found by the last completed job.
    pub files_found: usize,
    pub last_error: Option<String>,
}

struct Inner {
    job: RwLock<ScanJob>,
    events: watch::Sender<ScanJob>,
    inventory: LocalInventory,
    scanner: RomScanner,
    stale_after: Duration,
}

/// Single-flight scan coordinator.
#[derive(Clone)]
pub struct ScanOrchestrator {
    inner: Arc<Inner>,
}

impl ScanOrchestrator {
    pub fn new(inventory: LocalInventory, scanner: RomScanner, stale_after: Duration) -> Self {
        let (events, _rx) = watch::channel(ScanJob::default());
        Self {
            inner: Arc::new(Inner {
                job: RwLock::new(ScanJob::default()),
                events,
                inventory,
                scanner,
                stale_after,
            }),
        }
    }

    /// Start scanning `platforms` (local folder names) in the background.
    ///
    /// Fails with `Configuration` for an empty list and with
    /// `AdmissionConflict` while another job is running. Must be called from
    /// within a tokio runtime.
    pub fn start_scan(&self, platforms: Vec<String>) -> Result<ScanJob, SyncError> {
        let mut folders: Vec<String> = Vec::new();
        for p in platforms.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            if !folders.iter().any(|f| f == p) {
                folders.push(p.to_string());
            }
        }
        if folders.is_empty() {
            return Err(SyncError::Configuration(
                "no platform folders given to scan".to_string(),
            ));
        }

        let job = {
            let mut job = resilient_write(&self.inner.job);
            self.expire_stale(&mut job);
            if job.in_progress {
                return Err(SyncError::AdmissionConflict(format!(
                    "scan already in progress for {}",
                    job.platforms.join(", ")
                )));
            }
            *job = ScanJob {
                generation: job.generation + 1,
                in_progress: true,
                started_at: Some(Utc::now()),
                platforms: folders.clone(),
                completed_at: None,
                files_found: 0,
                last_error: None,
            };
            job.clone()
        };
        self.publish(job.clone());
        tracing::info!(generation = job.generation, platforms = ?folders, "Starting scan");

        let this = self.clone();
        let generation = job.generation;
        tokio::spawn(async move {
            this.run(generation, folders).await;
        });
        Ok(job)
    }

    async fn run(&self, generation: u64, folders: Vec<String>) {
        let this = self.clone();
        let result = tokio::task::spawn_blocking(move || {
            let scans = this.inner.scanner.scan_all(&folders);
            let files: usize = scans.iter().map(|s| s.records.len()).sum();
            // The job lock is held across the merge so a reset either lands
            // before it (results dropped) or after it.
            let merged = {
                let job = resilient_read(&this.inner.job);
                if job.generation == generation {
                    this.inner.inventory.merge_scan(scans);
                    true
                } else {
                    false
                }
            };
            if !merged {
                tracing::warn!(generation, "Scan superseded, discarding results");
                return Ok(None);
            }
            this.inner.inventory.persist().map(|_| Some(files))
        })
        .await;

        let outcome = match result {
            Ok(Ok(files)) => Ok(files),
            Ok(Err(e)) => Err(format!("Failed to save inventory: {:#}", e)),
            Err(e) => Err(format!("Scan task failed: {}", e)),
        };

        let job = {
            let mut job = resilient_write(&self.inner.job);
            if job.generation != generation {
                return;
            }
            job.in_progress = false;
            job.completed_at = Some(Utc::now());
            match outcome {
                Ok(files) => {
                    job.files_found = files.unwrap_or(0);
                    tracing::info!(generation, files = job.files_found, "Scan completed");
                }
                Err(message) => {
                    tracing::error!(generation, "{}", message);
                    job.last_error = Some(message);
                }
            }
            job.clone()
        };
        self.publish(job);
    }

    /// Mark a job running longer than `stale_after` as abandoned.
    fn expire_stale(&self, job: &mut ScanJob) -> bool {
        if !job.in_progress {
            return false;
        }
        let Some(started) = job.started_at else {
            return false;
        };
        let limit = chrono::Duration::from_std(self.inner.stale_after)
            .unwrap_or_else(|_| chrono::Duration::MAX);
        if Utc::now() - started <= limit {
            return false;
        }
        tracing::warn!(
            generation = job.generation,
            "Scan running since {} considered abandoned",
            started
        );
        job.generation += 1;
        job.in_progress = false;
        job.completed_at = Some(Utc::now());
        job.last_error = Some(format!(
            "scan abandoned after {}s without finishing",
            self.inner.stale_after.as_secs()
        ));
        true
    }

    /// Current job snapshot.
    pub fn status(&self) -> ScanJob {
        let mut job = resilient_write(&self.inner.job);
        if self.expire_stale(&mut job) {
            let snapshot = job.clone();
            drop(job);
            self.publish(snapshot.clone());
            return snapshot;
        }
        job.clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().in_progress
    }

    /// Receive a new snapshot on every change.
    pub fn subscribe(&self) -> watch::Receiver<ScanJob> {
        self.inner.events.subscribe()
    }

    /// Force the job to idle. A running scan's result is discarded.
    pub fn reset(&self) -> ScanJob {
        let job = {
            let mut job = resilient_write(&self.inner.job);
            if job.in_progress {
                tracing::warn!(generation = job.generation, "Resetting running scan");
                job.generation += 1;
                job.in_progress = false;
                job.completed_at = Some(Utc::now());
                job.last_error = Some("scan reset".to_string());
            }
            job.clone()
        };
        self.publish(job.clone());
        job
    }

    /// Wait until no job is running and return the final snapshot.
    pub async fn wait_idle(&self) -> ScanJob {
        let mut rx = self.subscribe();
        loop {
            let job = self.status();
            if !job.in_progress {
                return job;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    fn publish(&self, job: ScanJob) {
        self.inner.events.send_replace(job);
    }

    pub fn inventory(&self) -> &LocalInventory {
        &self.inner.inventory
    }
}
