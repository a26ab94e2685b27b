// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared catalog types used across romsync modules.
//!
//! These mirror the subset of the RomM API payloads that the sync core
//! actually reads. Unknown fields are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// A single file belonging to a remote catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFile {
    /// Remote file id (used to build the content URL).
    #[serde(default)]
    pub id: u64,
    /// File name as stored on the remote server.
    pub file_name: String,
    /// Size in bytes, zero when the server does not report it.
    #[serde(default)]
    pub file_size_bytes: u64,
}

impl CatalogFile {
    pub fn new(id: u64, file_name: impl Into<String>, file_size_bytes: u64) -> Self {
        Self {
            id,
            file_name: file_name.into(),
            file_size_bytes,
        }
    }
}

/// An entry from the remote ROM library.
///
/// Owned by the remote service; romsync never mutates one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Identifier, unique within its platform.
    pub id: u64,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Remote platform id.
    #[serde(default)]
    pub platform_id: u64,
    /// Remote platform name, the key of the platform mapping.
    #[serde(default, alias = "platform_display_name")]
    pub platform_name: String,
    /// Associated files. The first one is the primary file.
    #[serde(default)]
    pub files: Vec<CatalogFile>,
}

impl CatalogItem {
    /// The file a download transfers.
    pub fn primary_file(&self) -> Option<&CatalogFile> {
        self.files.first()
    }

    /// Display name, falling back to the primary file name.
    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            return &self.name;
        }
        self.primary_file()
            .map(|f| f.file_name.as_str())
            .unwrap_or("unknown")
    }
}

/// Summary of a remote platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformSummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub rom_count: u64,
}

/// Local presence figures attached to a platform summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LocalPlatformStats {
    /// Whether the platform has a mapped local folder.
    pub exists: bool,
    /// Number of files in the inventory for that folder.
    pub file_count: usize,
}

/// A platform summary enriched with local figures, as served to the browser.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformView {
    #[serde(flatten)]
    pub platform: PlatformSummary,
    /// Local folder the platform maps to, if any.
    pub local_folder: Option<String>,
    pub local_stats: LocalPlatformStats,
}
