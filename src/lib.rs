// Copyright (c) 2024-2025 Jesse Morgan
// Licensed under the MIT License. See LICENSE file for details.

//! romsync - RomM to local collection sync proxy
//!
//! Browse a remote RomM library, see which ROMs are already in your local
//! collection, and queue the missing ones for download.
//!
//! **Remote catalog** -> **Reconciliation** <- **Local inventory** <- **Scanner**
//!
//! # Core Modules
//!
//! - [`inventory`] - Local inventory index and its on-disk snapshot
//! - [`scanner`] - Walks platform folders and builds presence records
//! - [`reconcile`] - Annotates catalog items with local availability
//! - [`download`] - Download queue with bounded concurrency
//! - [`scan`] - Single-flight scan orchestrator
//! - [`remote`] - RomM client behind the `CatalogSource` trait
//! - [`server`] - HTTP API for the browser client
//! - [`config`] - Configuration file and platform mapping
//! - [`error`] / [`errors`] - Core error kinds and HTTP error responses

pub mod config;
pub mod download;
pub mod error;
pub mod errors;
pub mod inventory;
pub mod locks;
pub mod reconcile;
pub mod remote;
pub mod scan;
pub mod scanner;
pub mod server;
pub mod types;
pub mod utils;

pub use config::{Config, PlatformMapping};
pub use download::{DownloadManager, QueueEntry, QueueSettings, QueueStatus};
pub use error::SyncError;
pub use inventory::{InventorySnapshot, LocalInventory, LocalPresenceRecord};
pub use reconcile::{annotate, AnnotatedItem, ViewFilter};
pub use remote::{CatalogSource, MemoryCatalog, RommClient};
pub use scan::{ScanJob, ScanOrchestrator};
pub use types::{CatalogFile, CatalogItem, PlatformSummary};
