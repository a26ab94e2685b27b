// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Download queue types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a queue entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for a transfer slot
    Queued,
    /// Transfer running
    Downloading,
    /// File is in place
    Completed,
    /// Transfer failed; see the entry's error
    Error,
}

impl QueueStatus {
    /// Returns true if the entry is waiting or transferring.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Queued | QueueStatus::Downloading)
    }

    /// Returns true if the entry will not change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Error)
    }
}

/// A requested download, as shown to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    /// Remote item id.
    pub id: u64,
    /// Display name
    pub name: String,
    /// Local platform folder.
    pub platform: String,
    /// Remote file name of the primary file.
    pub file_name: String,
    pub destination: PathBuf,
    pub status: QueueStatus,
    /// 0-100; 100 only once completed.
    pub progress: u8,
    pub bytes_total: Option<u64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        platform: impl Into<String>,
        file_name: impl Into<String>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            platform: platform.into(),
            file_name: file_name.into(),
            destination: destination.into(),
            status: QueueStatus::Queued,
            progress: 0,
            bytes_total: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update the status and timestamp.
    pub fn update_status(&mut self, status: QueueStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Outcome of one id in a batch request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BatchOutcome {
    pub rom_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<QueueEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error kind, e.g. `not_found`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Entry counts by status.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct QueueCounts {
    pub queued: usize,
    pub downloading: usize,
    pub completed: usize,
    pub error: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.queued + self.downloading + self.completed + self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(QueueStatus::Queued.is_active());
        assert!(QueueStatus::Downloading.is_active());
        assert!(QueueStatus::Completed.is_terminal());
        assert!(QueueStatus::Error.is_terminal());
        assert!(!QueueStatus::Error.is_active());
    }

    #[test]
    fn test_entry_serializes_lowercase_status() {
        let entry = QueueEntry::new(7, "Game", "snes", "Game.sfc", "/roms/snes/Game.sfc");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "queued");
        assert_eq!(json["progress"], 0);
        assert_eq!(json["platform"], "snes");
        assert!(json["error"].is_null());
    }
}
