use crate::entry::TimerEntry;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bounded recycler for timer entries.
///
/// Under steady-state load every arming is served from here instead of the
/// allocator. An entry is only pooled once the pool holds its last reference;
/// if a handle from the previous arming is still alive the entry is discarded
/// to the allocator instead, so a recycled entry can never be reached through
/// a stale handle.
pub(crate) struct EntryPool {
    free: Mutex<Vec<Arc<TimerEntry>>>,
    max: AtomicUsize,
    /// Entries drawn out and not yet released back. This is the live-timer
    /// count the host can watch for leaks.
    outstanding: AtomicUsize,
}

impl EntryPool {
    pub fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            max: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Configure `{min, max}` bounds and pre-warm up to `min` entries.
    pub fn set_size(&self, min: usize, max: usize) {
        self.max.store(max, Ordering::Relaxed);
        let mut free = self.free.lock();
        while free.len() < min {
            free.push(Arc::new(TimerEntry::new()));
        }
    }

    /// A recycled entry with an open gate and no slot linkage, or a fresh
    /// allocation when the pool is empty.
    pub fn acquire(&self) -> Arc<TimerEntry> {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = self.free.lock().pop() {
            entry.recycle();
            return entry;
        }
        Arc::new(TimerEntry::new())
    }

    /// Return a resolved entry. Pools it only below the `max` bound and only
    /// when no external handle still references it.
    pub fn release(&self, entry: Arc<TimerEntry>) {
        entry.clear_callback();
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if Arc::strong_count(&entry) == 1 {
            let mut free = self.free.lock();
            if free.len() < self.max.load(Ordering::Relaxed) {
                free.push(entry);
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn pooled(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_entries_are_reused() {
        let pool = EntryPool::new();
        pool.set_size(0, 16);

        let entry = pool.acquire();
        assert!(entry.try_acquire_gate());
        let raw = Arc::as_ptr(&entry) as usize;
        pool.release(entry);

        let again = pool.acquire();
        assert_eq!(Arc::as_ptr(&again) as usize, raw, "pool did not recycle");
        // recycled entries come back with an open gate
        assert!(again.is_valid());
    }

    #[test]
    fn max_bound_discards_overflow() {
        let pool = EntryPool::new();
        pool.set_size(0, 2);

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        pool.release(a);
        pool.release(b);
        pool.release(c);
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn set_size_pre_warms_to_min() {
        let pool = EntryPool::new();
        pool.set_size(8, 32);
        assert_eq!(pool.pooled(), 8);
        // shrinking min later does not drop what is already pooled
        pool.set_size(2, 32);
        assert_eq!(pool.pooled(), 8);
    }

    #[test]
    fn outstanding_tracks_live_entries() {
        let pool = EntryPool::new();
        pool.set_size(0, 16);
        assert_eq!(pool.outstanding(), 0);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.outstanding(), 2);

        pool.release(a);
        assert_eq!(pool.outstanding(), 1);
        pool.release(b);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn entry_with_live_handle_is_not_pooled() {
        let pool = EntryPool::new();
        pool.set_size(0, 16);

        let entry = pool.acquire();
        let handle_ref = entry.clone(); // simulates an outstanding TimerHandle
        pool.release(entry);

        assert_eq!(pool.pooled(), 0);
        assert_eq!(pool.outstanding(), 0);
        drop(handle_ref);
    }
}
