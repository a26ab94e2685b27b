// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download queue for romsync.
//!
//! Requested items wait in a FIFO queue; at most `max_concurrent` transfer at
//! once. Each transfer is an independent tokio task, so one failing item never
//! affects another.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  enqueue   ┌─────────────────┐
//! │ HTTP handlers   │───────────▶│ DownloadManager │
//! └─────────────────┘            └────────┬────────┘
//!                                         │ admit (under lock)
//!                                         ▼
//!                   ┌─────────────────┐     ┌─────────────────┐
//!                   │ transfer task   │────▶│ CatalogSource   │
//!                   │ (one per entry) │     │ (download_file) │
//!                   └────────┬────────┘     └─────────────────┘
//!                            │ completed
//!                            ▼
//!                   ┌─────────────────┐
//!                   │ LocalInventory  │
//!                   │ (register)      │
//!                   └─────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `queued` → `downloading` → `completed` (removed after the cleanup delay)
//! or `error` (kept until dismissed). Failed transfers are not retried.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use romsync::download::{DownloadManager, QueueSettings};
//! use romsync::inventory::LocalInventory;
//! use romsync::remote::MemoryCatalog;
//! use romsync::scanner::RomScanner;
//!
//! # async fn example() -> Result<(), romsync::error::SyncError> {
//! let manager = DownloadManager::new(
//!     Arc::new(MemoryCatalog::new()),
//!     LocalInventory::in_memory(),
//!     RomScanner::new("/roms"),
//!     QueueSettings::default(),
//! );
//! let entry = manager.enqueue(42, "snes").await?;
//! println!("{} is {:?}", entry.name, entry.status);
//! # Ok(())
//! # }
//! ```

mod manager;
mod state;
mod types;

pub use manager::{DownloadManager, QueueSettings};
pub use types::{BatchOutcome, QueueCounts, QueueEntry, QueueStatus};
