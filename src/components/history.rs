use std::collections::VecDeque;

use crate::canvas::{Surface, TiledImage};

/// Default number of retained snapshots.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

// ============================================================================
// HISTORY ENTRY - one full-frame ink snapshot
// ============================================================================

/// Ink pixels after one completed interaction.
///
/// The pixels are a `TiledImage` clone, so an entry shares every chunk the
/// interaction did not touch with its neighbours.
#[derive(Clone, Debug)]
struct HistoryEntry {
    pixels: TiledImage,
    description: String,
}

// ============================================================================
// HISTORY MANAGER
// ============================================================================

/// Bounded sequence of snapshots with a cursor at the state currently shown.
///
/// Entries past the cursor are the redo "future"; the next push drops them.
pub struct HistoryManager {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    max_history_size: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            max_history_size: max_history_size.max(1),
        }
    }

    /// Drop everything and start over from a single entry.
    pub fn seed(&mut self, pixels: TiledImage, description: impl Into<String>) {
        self.entries.clear();
        self.entries.push_back(HistoryEntry { pixels, description: description.into() });
        self.cursor = 0;
    }

    pub fn push(&mut self, pixels: TiledImage, description: impl Into<String>) {
        if !self.entries.is_empty() {
            self.entries.truncate(self.cursor + 1);
        }
        self.entries.push_back(HistoryEntry { pixels, description: description.into() });
        self.cursor = self.entries.len() - 1;

        while self.entries.len() > self.max_history_size {
            if let Some(evicted) = self.entries.pop_front() {
                log::debug!("history: evicted '{}'", evicted.description);
            }
            self.cursor = self.cursor.saturating_sub(1);
        }
    }

    /// Step back one entry and restore it. Returns the description of the
    /// interaction that was undone, or `None` at the oldest entry.
    pub fn undo(&mut self, surface: &mut Surface) -> Option<String> {
        if !self.can_undo() {
            return None;
        }
        let undone = self.entries[self.cursor].description.clone();
        self.cursor -= 1;
        surface.restore_ink(&self.entries[self.cursor].pixels);
        Some(undone)
    }

    /// Step forward one entry and restore it. `None` at the newest entry.
    pub fn redo(&mut self, surface: &mut Surface) -> Option<String> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        let entry = &self.entries[self.cursor];
        surface.restore_ink(&entry.pixels);
        Some(entry.description.clone())
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.can_undo().then(|| self.entries[self.cursor].description.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Approximate bytes held by the snapshots. Shared chunks are weighted
    /// down so unchanged regions are not counted once per entry.
    pub fn memory_usage(&self) -> usize {
        self.entries.iter().map(|e| e.pixels.memory_bytes()).sum()
    }
}
