//! Fixed-size history storage shared by concurrent producers.
//!
//! Producers claim slots through an atomic cursor and never wait on each
//! other. Each slot carries a readiness flag: a row is only handed to readers
//! while that flag is set. Readers only *try* the row lock and skip a slot
//! that is being written. A writer waits at most for one row copy by a reader.

use crate::error::HistoryError;
use crate::row::Row;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

struct Slot {
    completed: AtomicBool,
    row: RwLock<Row>,
}

impl Slot {
    fn new() -> Self {
        Self {
            completed: AtomicBool::new(false),
            row: RwLock::new(Row::default()),
        }
    }

    fn try_read(&self) -> Option<RwLockReadGuard<'_, Row>> {
        match self.row.try_read() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Row> {
        self.row.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct RingBuffer {
    slots: Box<[Slot]>,
    next_index: AtomicUsize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Result<Self, HistoryError> {
        if capacity == 0 {
            return Err(HistoryError::InvalidCapacity);
        }

        let slots = (0..capacity).map(|_| Slot::new()).collect();
        Ok(Self {
            slots,
            next_index: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Raw write cursor. Equal to `capacity()` right after the last slot was
    /// claimed; the next claim wraps to 0.
    pub fn cursor(&self) -> usize {
        self.next_index.load(Ordering::Acquire)
    }

    /// Reserves the next slot for writing.
    ///
    /// Returns `None` when a concurrent wraparound raced this claim. The
    /// cursor is reset and the caller drops its update.
    pub fn claim_slot(&self) -> Option<usize> {
        let capacity = self.capacity();

        // Only reset from exactly `capacity`, so a claim that already moved
        // past the wrap is not clobbered.
        let _ = self.next_index.compare_exchange(
            capacity,
            0,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );

        let index = self.next_index.fetch_add(1, Ordering::AcqRel);
        if index >= capacity {
            self.next_index.store(0, Ordering::Release);
            log::debug!("History slot collision at cursor {index}, dropping update");
            return None;
        }

        Some(index)
    }

    pub fn mark_in_progress(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            slot.completed.store(false, Ordering::Release);
        }
    }

    pub fn mark_complete(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            slot.completed.store(true, Ordering::Release);
        }
    }

    pub fn is_completed(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .map(|slot| slot.completed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Fills the row at `index`. Returns `false` for an index outside the
    /// buffer.
    pub fn write_row<F>(&self, index: usize, populate: F) -> bool
    where
        F: FnOnce(&mut Row),
    {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };

        populate(&mut slot.write());
        true
    }

    /// Visits every completed row in slot order.
    ///
    /// Rows are copied out before `visit` runs. A slot that is being
    /// rewritten while we look at it is skipped.
    pub fn for_each_completed<F>(&self, mut visit: F)
    where
        F: FnMut(usize, &Row),
    {
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.completed.load(Ordering::Acquire) {
                continue;
            }

            let row = match slot.try_read() {
                Some(guard) => guard.clone(),
                None => continue,
            };

            if !slot.completed.load(Ordering::Acquire) {
                continue;
            }

            visit(index, &row);
        }
    }

    pub fn snapshot(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        self.for_each_completed(|_, row| rows.push(row.clone()));
        rows
    }

    pub fn completed_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.completed.load(Ordering::Acquire))
            .count()
    }

    /// Forgets every stored row and rewinds the cursor.
    pub fn reset(&self) {
        for slot in self.slots.iter() {
            slot.completed.store(false, Ordering::Release);
            *slot.write() = Row::default();
        }
        self.next_index.store(0, Ordering::Release);
    }

    /// Replaces the row at `index` during startup restore. `Some` rows are
    /// marked completed, `None` leaves a blank, unfinished slot.
    pub(crate) fn restore_row(&self, index: usize, restored: Option<Row>) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };

        slot.completed.store(false, Ordering::Release);
        let completed = restored.is_some();
        *slot.write() = restored.unwrap_or_default();
        slot.completed.store(completed, Ordering::Release);
    }

    pub(crate) fn set_cursor(&self, position: usize) {
        self.next_index
            .store(position.min(self.capacity()), Ordering::Release);
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("cursor", &self.cursor())
            .field("completed", &self.completed_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn fill(buffer: &RingBuffer, id: &str) -> Option<usize> {
        let index = buffer.claim_slot()?;
        buffer.mark_in_progress(index);
        assert!(buffer.write_row(index, |row| row.set_message_id(id)));
        buffer.mark_complete(index);
        Some(index)
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            RingBuffer::new(0),
            Err(HistoryError::InvalidCapacity)
        ));
    }

    #[test]
    fn test_new_buffer_has_no_completed_rows() {
        for capacity in [1, 2, 7, 200] {
            let buffer = RingBuffer::new(capacity).unwrap();
            assert_eq!(buffer.capacity(), capacity);
            assert_eq!(buffer.completed_count(), 0);
            assert_eq!(buffer.cursor(), 0);
            assert!((0..capacity).all(|i| !buffer.is_completed(i)));
        }
    }

    #[test]
    fn test_sequential_claims_wrap_around() {
        let buffer = RingBuffer::new(3).unwrap();
        let claimed: Vec<_> = (0..3).map(|_| buffer.claim_slot().unwrap()).collect();
        assert_eq!(claimed, vec![0, 1, 2]);
        assert_eq!(buffer.cursor(), 3);

        assert_eq!(buffer.claim_slot(), Some(0));
        assert_eq!(buffer.cursor(), 1);
    }

    #[test]
    fn test_claim_past_capacity_is_a_collision() {
        let buffer = RingBuffer::new(2).unwrap();
        // Simulate a racing producer that advanced the cursor past the wrap
        buffer.next_index.store(3, Ordering::SeqCst);

        assert_eq!(buffer.claim_slot(), None);
        assert_eq!(buffer.cursor(), 0);
        assert_eq!(buffer.claim_slot(), Some(0));
    }

    #[test]
    fn test_in_progress_rows_are_skipped() {
        let buffer = RingBuffer::new(3).unwrap();
        fill(&buffer, "first");

        let index = buffer.claim_slot().unwrap();
        buffer.mark_in_progress(index);
        buffer.write_row(index, |row| row.set_message_id("half-written"));

        let ids: Vec<_> = buffer
            .snapshot()
            .into_iter()
            .map(|row| row.message_id)
            .collect();
        assert_eq!(ids, vec!["first".to_string()]);
    }

    #[test]
    fn test_write_waits_for_reader_copy() {
        let buffer = Arc::new(RingBuffer::new(1).unwrap());
        fill(&buffer, "old");

        let guard = buffer.slots[0].row.read().unwrap();
        let writer = {
            let buffer = buffer.clone();
            thread::spawn(move || buffer.write_row(0, |row| row.set_message_id("new")))
        };
        thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(guard.message_id, "old");
        drop(guard);

        assert!(writer.join().unwrap());
        assert_eq!(buffer.snapshot()[0].message_id, "new");
    }

    #[test]
    fn test_snapshots_never_cost_a_write() {
        let buffer = Arc::new(RingBuffer::new(8).unwrap());
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let buffer = buffer.clone();
            let done = done.clone();
            thread::spawn(move || {
                let mut snapshots = 0usize;
                while !done.load(Ordering::Acquire) {
                    let rows = buffer.snapshot();
                    assert!(rows.len() <= 8);
                    snapshots += 1;
                }
                snapshots
            })
        };

        let total = 20_000u64;
        let mut landed = 0u64;
        for n in 0..total {
            let index = buffer.claim_slot().unwrap();
            buffer.mark_in_progress(index);
            if buffer.write_row(index, |row| row.length = n) {
                buffer.mark_complete(index);
            }
            if buffer.is_completed(index) {
                landed += 1;
            }
        }
        done.store(true, Ordering::Release);
        assert!(reader.join().unwrap() > 0);

        assert_eq!(landed, total);
        assert_eq!(buffer.completed_count(), 8);
        let lengths: Vec<_> = buffer.snapshot().into_iter().map(|r| r.length).collect();
        assert_eq!(lengths, ((total - 8)..total).collect::<Vec<_>>());
    }

    #[test]
    fn test_for_each_completed_visits_in_slot_order() {
        let buffer = RingBuffer::new(4).unwrap();
        for id in ["a", "b", "c"] {
            fill(&buffer, id);
        }

        let mut seen = Vec::new();
        buffer.for_each_completed(|index, row| seen.push((index, row.message_id.clone())));
        assert_eq!(
            seen,
            vec![
                (0, "a".to_string()),
                (1, "b".to_string()),
                (2, "c".to_string())
            ]
        );
    }

    #[test]
    fn test_reset_clears_rows_and_cursor() {
        let buffer = RingBuffer::new(2).unwrap();
        fill(&buffer, "a");
        fill(&buffer, "b");

        buffer.reset();
        assert_eq!(buffer.completed_count(), 0);
        assert_eq!(buffer.cursor(), 0);
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn test_restore_row_marks_completion() {
        let buffer = RingBuffer::new(2).unwrap();
        let row = Row {
            message_id: "restored".to_string(),
            ..Default::default()
        };
        buffer.restore_row(0, Some(row));
        buffer.restore_row(1, None);
        buffer.set_cursor(5);

        assert!(buffer.is_completed(0));
        assert!(!buffer.is_completed(1));
        assert_eq!(buffer.cursor(), 2);
    }

    #[test]
    fn test_concurrent_claims_are_unique_between_wraps() {
        // Capacity larger than the total number of claims: no wraparound can
        // happen, so every successful claim must be distinct.
        let buffer = Arc::new(RingBuffer::new(4096).unwrap());
        let claimed = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buffer = buffer.clone();
                let claimed = claimed.clone();
                thread::spawn(move || {
                    let mut local = Vec::new();
                    for _ in 0..500 {
                        if let Some(index) = buffer.claim_slot() {
                            local.push(index);
                        }
                    }
                    claimed.lock().unwrap().extend(local);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let claimed = claimed.lock().unwrap();
        assert_eq!(claimed.len(), 4000);
        let unique: HashSet<_> = claimed.iter().copied().collect();
        assert_eq!(unique.len(), claimed.len());
    }

    #[test]
    fn test_concurrent_claims_stay_in_bounds_across_wraps() {
        let buffer = Arc::new(RingBuffer::new(16).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    let mut successes = 0usize;
                    for _ in 0..2000 {
                        if let Some(index) = buffer.claim_slot() {
                            assert!(index < 16);
                            buffer.mark_in_progress(index);
                            buffer.write_row(index, |row| row.length = index as u64);
                            buffer.mark_complete(index);
                            successes += 1;
                        }
                    }
                    successes
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total > 0);
        assert!(buffer.cursor() <= 16);
        buffer.for_each_completed(|index, row| assert_eq!(row.length, index as u64));
    }
}
