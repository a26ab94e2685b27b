// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory queue state.
//!
//! Entries are kept in enqueue order; admission always picks the oldest
//! queued entry. Only the manager mutates this, always under its lock.

use indexmap::IndexMap;

use super::types::{QueueCounts, QueueEntry, QueueStatus};
use crate::types::CatalogItem;

/// An entry plus what its transfer needs.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub entry: QueueEntry,
    pub item: CatalogItem,
    /// Distinguishes a re-enqueued id from its previous entry.
    pub ticket: u64,
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    slots: IndexMap<u64, Slot>,
    next_ticket: u64,
}

impl QueueState {
    pub fn get(&self, id: u64) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Slot> {
        self.slots.get_mut(&id)
    }

    /// Get the slot for `id` only if it is still the one identified by `ticket`.
    pub fn get_ticket_mut(&mut self, id: u64, ticket: u64) -> Option<&mut Slot> {
        self.slots.get_mut(&id).filter(|s| s.ticket == ticket)
    }

    /// Insert a fresh entry at the back, replacing any previous one for the id.
    pub fn push(&mut self, entry: QueueEntry, item: CatalogItem) -> u64 {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.slots.shift_remove(&entry.id);
        self.slots.insert(entry.id, Slot { entry, item, ticket });
        ticket
    }

    pub fn remove(&mut self, id: u64) -> Option<Slot> {
        self.slots.shift_remove(&id)
    }

    /// Remove `id` only if it still holds `ticket`.
    pub fn remove_ticket(&mut self, id: u64, ticket: u64) -> Option<Slot> {
        if self.slots.get(&id).is_some_and(|s| s.ticket == ticket) {
            self.slots.shift_remove(&id)
        } else {
            None
        }
    }

    /// Oldest queued entry.
    pub fn next_queued(&self) -> Option<u64> {
        self.slots
            .values()
            .find(|s| s.entry.status == QueueStatus::Queued)
            .map(|s| s.entry.id)
    }

    pub fn downloading_count(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.entry.status == QueueStatus::Downloading)
            .count()
    }

    /// Remove completed and errored entries, returning how many went.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, s| !s.entry.status.is_terminal());
        before - self.slots.len()
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.slots.values().map(|s| s.entry.clone()).collect()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for slot in self.slots.values() {
            match slot.entry.status {
                QueueStatus::Queued => counts.queued += 1,
                QueueStatus::Downloading => counts.downloading += 1,
                QueueStatus::Completed => counts.completed += 1,
                QueueStatus::Error => counts.error += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(state: &mut QueueState, id: u64) -> u64 {
        let item = CatalogItem {
            id,
            name: format!("Game {}", id),
            platform_id: 1,
            platform_name: "SNES".to_string(),
            files: vec![],
        };
        state.push(
            QueueEntry::new(id, &item.name, "snes", "g.sfc", "/roms/snes/g.sfc"),
            item,
        )
    }

    #[test]
    fn test_fifo_next_queued() {
        let mut state = QueueState::default();
        push(&mut state, 3);
        push(&mut state, 1);
        push(&mut state, 2);
        assert_eq!(state.next_queued(), Some(3));

        state.get_mut(3).unwrap().entry.update_status(QueueStatus::Downloading);
        assert_eq!(state.next_queued(), Some(1));
        assert_eq!(state.downloading_count(), 1);
    }

    #[test]
    fn test_replacing_moves_to_back_and_changes_ticket() {
        let mut state = QueueState::default();
        let first = push(&mut state, 1);
        push(&mut state, 2);
        state.get_mut(1).unwrap().entry.update_status(QueueStatus::Error);

        let second = push(&mut state, 1);
        assert_ne!(first, second);
        let ids: Vec<u64> = state.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(state.remove_ticket(1, first).is_none());
        assert!(state.get_ticket_mut(1, second).is_some());
    }

    #[test]
    fn test_clear_finished_and_counts() {
        let mut state = QueueState::default();
        for id in 1..=4 {
            push(&mut state, id);
        }
        state.get_mut(1).unwrap().entry.update_status(QueueStatus::Completed);
        state.get_mut(2).unwrap().entry.update_status(QueueStatus::Error);
        state.get_mut(3).unwrap().entry.update_status(QueueStatus::Downloading);

        let counts = state.counts();
        assert_eq!((counts.queued, counts.downloading, counts.completed, counts.error), (1, 1, 1, 1));
        assert_eq!(state.clear_finished(), 2);
        assert_eq!(state.counts().total(), 2);
    }
}
