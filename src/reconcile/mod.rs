// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reconciliation of remote catalog items against the local inventory.
//!
//! [`annotate`] is pure: the same items, snapshot and mapping always give the
//! same answer, and nothing is written anywhere.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::PlatformMapping;
use crate::inventory::InventorySnapshot;
use crate::types::CatalogItem;

/// A catalog item with its local availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedItem {
    #[serde(flatten)]
    pub item: CatalogItem,
    /// Every file of the item is present locally.
    pub local_available: bool,
    /// Local folder the item's platform maps to, if any.
    pub local_folder: Option<String>,
}

/// Whether every file of `item` is present under its mapped folder.
///
/// Items without files, or whose platform has no mapped folder, are never
/// available.
pub fn is_locally_available(
    item: &CatalogItem,
    snapshot: &InventorySnapshot,
    mapping: &PlatformMapping,
) -> bool {
    let Some(folder) = mapping.folder_for(&item.platform_name) else {
        return false;
    };
    !item.files.is_empty()
        && item
            .files
            .iter()
            .all(|f| snapshot.is_present(folder, &f.file_name))
}

/// Annotate items in order.
pub fn annotate(
    items: Vec<CatalogItem>,
    snapshot: &InventorySnapshot,
    mapping: &PlatformMapping,
) -> Vec<AnnotatedItem> {
    items
        .into_iter()
        .map(|item| {
            let local_available = is_locally_available(&item, snapshot, mapping);
            let local_folder = mapping.folder_for(&item.platform_name).map(str::to_string);
            AnnotatedItem {
                item,
                local_available,
                local_folder,
            }
        })
        .collect()
}

/// Which annotated items a listing shows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewFilter {
    #[default]
    All,
    /// Only items present locally.
    Downloaded,
    /// Only items not yet present locally.
    Available,
}

impl ViewFilter {
    pub fn matches(self, item: &AnnotatedItem) -> bool {
        match self {
            Self::All => true,
            Self::Downloaded => item.local_available,
            Self::Available => !item.local_available,
        }
    }

    pub fn apply(self, items: Vec<AnnotatedItem>) -> Vec<AnnotatedItem> {
        items.into_iter().filter(|i| self.matches(i)).collect()
    }
}

impl FromStr for ViewFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "downloaded" | "local" => Ok(Self::Downloaded),
            "available" | "missing" => Ok(Self::Available),
            other => Err(format!(
                "unknown view '{}', expected all, downloaded or available",
                other
            )),
        }
    }
}
