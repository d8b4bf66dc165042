//! Fixed-capacity process table.
//!
//! Owned by the orchestrator alone and never shared. Slots go
//! `Free -> Occupied` when a worker is forked and back to `Free` the moment the
//! child is reaped, so entries are reused.

use oss_env::{ClockState, ProcessHandle};
use serde::Serialize;
use std::fmt;

/// Default number of slots.
pub const PROCESS_TABLE_CAPACITY: usize = 20;

/// Bookkeeping for one active worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSlot {
    /// Whether the slot tracks a live child
    pub occupied: bool,

    /// The child's pid (`ProcessHandle::NONE` when free)
    pub child_id: ProcessHandle,

    /// Simulated clock just before the fork
    pub launch_time: ClockState,
}

/// The orchestrator's process table.
#[derive(Debug, Clone)]
pub struct ProcessTable {
    slots: Vec<ProcessSlot>,
}

impl ProcessTable {
    /// Creates a table with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![ProcessSlot::default(); capacity],
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    /// Index of the first free slot.
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|s| !s.occupied)
    }

    /// Records a freshly forked child in slot `index`.
    ///
    /// Returns false (and changes nothing) if the slot is out of range or
    /// already occupied.
    pub fn occupy(&mut self, index: usize, child: ProcessHandle, launch_time: ClockState) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if !slot.occupied => {
                *slot = ProcessSlot {
                    occupied: true,
                    child_id: child,
                    launch_time,
                };
                true
            }
            _ => false,
        }
    }

    /// Index of the occupied slot tracking `child`.
    pub fn find(&self, child: ProcessHandle) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.occupied && s.child_id == child)
    }

    /// Frees the slot tracking `child` and returns what it held.
    ///
    /// Returns `None` if no occupied slot matches.
    pub fn release(&mut self, child: ProcessHandle) -> Option<ProcessSlot> {
        let index = self.find(child)?;
        let previous = self.slots[index];
        self.slots[index] = ProcessSlot::default();
        Some(previous)
    }

    /// Occupied slots with their indices.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &ProcessSlot)> {
        self.slots.iter().enumerate().filter(|(_, s)| s.occupied)
    }

    /// Children of every occupied slot.
    pub fn occupied_children(&self) -> Vec<ProcessHandle> {
        self.occupied().map(|(_, s)| s.child_id).collect()
    }

    /// All slots in order.
    pub fn slots(&self) -> &[ProcessSlot] {
        &self.slots
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new(PROCESS_TABLE_CAPACITY)
    }
}

impl fmt::Display for ProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Process Table:")?;
        writeln!(f, "{:<6}{:<10}{:<10}{:<8}{}", "Entry", "Occupied", "PID", "StartS", "StartN")?;
        for (i, slot) in self.slots.iter().enumerate() {
            writeln!(
                f,
                "{:<6}{:<10}{:<10}{:<8}{}",
                i,
                slot.occupied as u8,
                slot.child_id,
                slot.launch_time.seconds,
                slot.launch_time.nanoseconds
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_table_is_free() {
        let table = ProcessTable::default();
        assert_eq!(table.capacity(), 20);
        assert_eq!(table.active_count(), 0);
        assert_eq!(table.first_free(), Some(0));
    }

    #[test]
    fn test_occupy_and_release_reuses_slot() {
        let mut table = ProcessTable::new(3);
        assert!(table.occupy(0, ProcessHandle(100), ClockState::new(1, 0)));
        assert!(table.occupy(1, ProcessHandle(101), ClockState::new(1, 5)));
        assert_eq!(table.first_free(), Some(2));
        assert_eq!(table.active_count(), 2);

        let freed = table.release(ProcessHandle(100)).unwrap();
        assert_eq!(freed.child_id, ProcessHandle(100));
        assert_eq!(freed.launch_time, ClockState::new(1, 0));
        assert_eq!(table.first_free(), Some(0));
        assert_eq!(table.slots()[0], ProcessSlot::default());

        assert!(table.occupy(0, ProcessHandle(102), ClockState::new(2, 0)));
        assert_eq!(table.find(ProcessHandle(102)), Some(0));
    }

    #[test]
    fn test_occupy_rejects_busy_or_missing_slot() {
        let mut table = ProcessTable::new(1);
        assert!(table.occupy(0, ProcessHandle(1), ClockState::ZERO));
        assert!(!table.occupy(0, ProcessHandle(2), ClockState::ZERO));
        assert!(!table.occupy(5, ProcessHandle(3), ClockState::ZERO));
        assert_eq!(table.find(ProcessHandle(1)), Some(0));
        assert_eq!(table.first_free(), None);
    }

    #[test]
    fn test_release_unknown_child_is_ignored() {
        let mut table = ProcessTable::new(2);
        table.occupy(0, ProcessHandle(10), ClockState::ZERO);
        assert!(table.release(ProcessHandle(99)).is_none());
        assert_eq!(table.active_count(), 1);
    }

    #[test]
    fn test_display_lists_every_slot() {
        let mut table = ProcessTable::new(2);
        table.occupy(1, ProcessHandle(4242), ClockState::new(3, 7));
        let text = table.to_string();
        assert!(text.starts_with("Process Table:\n"));
        assert_eq!(text.lines().count(), 4);
        let row = text.lines().nth(3).unwrap();
        let cols: Vec<&str> = row.split_whitespace().collect();
        assert_eq!(cols, vec!["1", "1", "4242", "3", "7"]);
    }
}
