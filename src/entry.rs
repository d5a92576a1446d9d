use log::error;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// The deferred action a timer runs when it fires.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Sentinel for "not currently linked into any slot".
const NULL_REF: u64 = u64::MAX;

/// Location of an entry inside the wheel: which level, which slot of that
/// level, and the arena key inside that slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotRef {
    pub level: usize,
    pub slot: usize,
    pub key: usize,
}

impl SlotRef {
    // level and slot are tiny (<= a dozen levels, <= 64 slots); the key gets
    // the low 32 bits. The packed form can never collide with NULL_REF.
    fn pack(self) -> u64 {
        debug_assert!(self.level < 1 << 8 && self.slot < 1 << 8 && self.key < 1 << 32);
        (self.level as u64) << 40 | (self.slot as u64) << 32 | self.key as u64
    }

    fn unpack(raw: u64) -> Option<Self> {
        if raw == NULL_REF {
            return None;
        }
        Some(Self {
            level: (raw >> 40) as usize & 0xff,
            slot: (raw >> 32) as usize & 0xff,
            key: raw as u32 as usize,
        })
    }
}

/// One armed timer.
///
/// The `gate` arbitrates between firing and cancellation: whoever flips it
/// open -> held wins the entry, the loser backs off. It is reopened only when
/// the entry is recycled out of the pool for a new arming.
///
/// `slot_ref` is a snapshot-readable back-reference to the slot the entry is
/// currently linked into. It is written under that slot's lock, so a reader
/// may observe a stale location; erase-by-identity makes that harmless.
pub(crate) struct TimerEntry {
    callback: Mutex<Option<Callback>>,
    gate: AtomicBool,
    slot_ref: AtomicU64,
    /// Absolute deadline, in ticks since the wheel's epoch.
    deadline: AtomicU64,
}

impl TimerEntry {
    pub fn new() -> Self {
        Self {
            callback: Mutex::new(None),
            gate: AtomicBool::new(false),
            slot_ref: AtomicU64::new(NULL_REF),
            deadline: AtomicU64::new(0),
        }
    }

    /// Reset for a fresh arming. Only the pool calls this, and only on
    /// entries with no outstanding handles, so reopening the gate cannot
    /// resurrect an already-resolved timer for an old handle.
    pub fn recycle(&self) {
        self.gate.store(false, Ordering::Release);
        self.slot_ref.store(NULL_REF, Ordering::Release);
        self.deadline.store(0, Ordering::Release);
    }

    pub fn arm(&self, cb: Callback, deadline: u64) {
        self.deadline.store(deadline, Ordering::Release);
        *self.callback.lock() = Some(cb);
    }

    /// Attempt the single open -> held transition. At most one caller over
    /// the lifetime of an arming ever sees `true`.
    pub fn try_acquire_gate(&self) -> bool {
        self.gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Still pending: neither fired nor canceled yet.
    pub fn is_valid(&self) -> bool {
        !self.gate.load(Ordering::Acquire)
    }

    pub fn deadline(&self) -> u64 {
        self.deadline.load(Ordering::Acquire)
    }

    pub fn link(&self, at: SlotRef) {
        self.slot_ref.store(at.pack(), Ordering::Release);
    }

    pub fn unlink(&self) {
        self.slot_ref.store(NULL_REF, Ordering::Release);
    }

    pub fn slot_ref(&self) -> Option<SlotRef> {
        SlotRef::unpack(self.slot_ref.load(Ordering::Acquire))
    }

    pub fn clear_callback(&self) {
        self.callback.lock().take();
    }

    /// Run the callback. The caller must have won the gate. A panicking
    /// callback is contained here so the driver can keep firing the rest of
    /// the drained slot.
    pub fn run(&self) {
        let cb = self.callback.lock().take();
        if let Some(cb) = cb {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(cb)) {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "opaque panic payload".to_string());
                error!("timer callback panicked: {}", msg);
            }
        }
    }
}
