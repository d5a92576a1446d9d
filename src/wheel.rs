use crate::clock::{Clock, MonotonicClock};
use crate::entry::{SlotRef, TimerEntry};
use crate::pool::EntryPool;
use crate::slot::Slot;
use log::debug;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

// Level 0 trades a smaller radix for finer near-term resolution; every
// coarser level carries a full 6-bit digit.
const GEAR1_SIZE: usize = 4;
const GEAR1_BITS: u32 = 2;
const GEAR1_MASK: u64 = GEAR1_SIZE as u64 - 1;
const GEAR_SIZE: usize = 64;
const GEAR_BITS: u32 = 6;
const GEAR_MASK: u64 = GEAR_SIZE as u64 - 1;

/// Every wheel is built with enough levels to cover at least four Gregorian
/// years at its precision.
const HORIZON: Duration = Duration::from_secs(4 * 31_556_952);

/// One digit position of the mixed-radix encoding of ticks-until-fire.
struct Level {
    slots: Box<[Slot]>,
    /// Index of the slot most recently consumed. Written only by the driver.
    cursor: AtomicUsize,
}

impl Level {
    fn new(size: usize) -> Self {
        Self {
            slots: (0..size).map(|_| Slot::new()).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    fn size(&self) -> usize {
        self.slots.len()
    }
}

struct WheelCore<C: Clock> {
    clock: C,
    epoch: Instant,
    precision: Duration,
    precision_ns: u64,
    levels: Box<[Level]>,
    pool: EntryPool,
    /// Absolute tick count as of the most recent driver pass.
    current_ticks: AtomicU64,
    /// Time point of the most recent driver pass. The lock doubles as the
    /// guard that serializes driver passes.
    last_advanced: Mutex<Instant>,
}

/// A hierarchical timing wheel.
///
/// Arms, cancels and fires large timer populations in O(1) amortized time:
/// a timer lands in the coarsest bucket that can represent its remaining
/// time and is relocated toward level 0 as the driver cascades, paying for
/// at most one move per level over its whole lifetime.
///
/// Cloning is cheap and clones share one wheel, so producer threads arm and
/// cancel concurrently while a single dedicated thread runs [`run_driver`]
/// (or calls [`tick`] cooperatively).
///
/// [`run_driver`]: TimingWheel::run_driver
/// [`tick`]: TimingWheel::tick
pub struct TimingWheel<C: Clock = MonotonicClock> {
    core: Arc<WheelCore<C>>,
}

impl<C: Clock> Clone for TimingWheel<C> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

/// Cancellation handle for one armed timer.
///
/// Cheap to clone and safe to keep around arbitrarily long after the timer
/// resolves; at worst `cancel` reports that there was nothing left to do. A
/// default-constructed handle refers to nothing and cancels as `true`.
pub struct TimerHandle<C: Clock = MonotonicClock> {
    entry: Option<Arc<TimerEntry>>,
    wheel: Weak<WheelCore<C>>,
}

impl<C: Clock> Clone for TimerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry.clone(),
            wheel: self.wheel.clone(),
        }
    }
}

impl<C: Clock> Default for TimerHandle<C> {
    fn default() -> Self {
        Self {
            entry: None,
            wheel: Weak::new(),
        }
    }
}

impl<C: Clock> TimerHandle<C> {
    /// Try to prevent the timer from ever firing.
    ///
    /// `true` means the callback is guaranteed never to execute: either this
    /// call won the fire/cancel gate, or there was no live timer behind the
    /// handle to begin with. `false` means the timer already fired, is
    /// firing right now on the driver thread, or was canceled earlier;
    /// either way this call changed nothing.
    pub fn cancel(&self) -> bool {
        let (Some(entry), Some(core)) = (self.entry.as_ref(), self.wheel.upgrade()) else {
            return true;
        };
        core.cancel(entry)
    }
}

impl TimingWheel<MonotonicClock> {
    /// Build a wheel ticking at `precision` against the system clock.
    pub fn new(precision: Duration) -> Self {
        Self::with_clock(precision, MonotonicClock)
    }
}

impl<C: Clock> TimingWheel<C> {
    /// Build a wheel against a caller-supplied clock. Levels are added until
    /// the representable horizon covers at least four years at `precision`.
    pub fn with_clock(precision: Duration, clock: C) -> Self {
        assert!(precision > Duration::ZERO, "precision must be nonzero");

        let mut levels = vec![Level::new(GEAR1_SIZE)];
        let mut span = precision * GEAR1_SIZE as u32;
        while span < HORIZON {
            levels.push(Level::new(GEAR_SIZE));
            span *= GEAR_SIZE as u32;
        }

        let epoch = clock.now();
        Self {
            core: Arc::new(WheelCore {
                clock,
                epoch,
                precision,
                precision_ns: precision.as_nanos() as u64,
                levels: levels.into_boxed_slice(),
                pool: EntryPool::new(),
                current_ticks: AtomicU64::new(0),
                last_advanced: Mutex::new(epoch),
            }),
        }
    }

    /// Configure the entry pool: pre-warm `min` entries, retain at most `max`.
    pub fn set_pool_size(&self, min: usize, max: usize) {
        self.core.pool.set_size(min, max);
    }

    /// Arm a timer: `f` runs once on the driver thread no earlier than `dur`
    /// from now. A zero duration fires on the next driver pass.
    pub fn start_timer(&self, dur: Duration, f: impl FnOnce() + Send + 'static) -> TimerHandle<C> {
        let core = &self.core;
        let due = core
            .clock
            .now()
            .checked_add(dur)
            .unwrap_or(core.epoch + HORIZON);
        let deadline = core.ticks_at(due);

        let entry = core.pool.acquire();
        entry.arm(Box::new(f), deadline);
        core.place(&entry, deadline);

        TimerHandle {
            entry: Some(entry),
            wheel: Arc::downgrade(core),
        }
    }

    /// Cancel through the wheel. Equivalent to [`TimerHandle::cancel`].
    pub fn stop_timer(&self, handle: &TimerHandle<C>) -> bool {
        handle.cancel()
    }

    /// One driver pass: advance the cursors to the clock's current tick,
    /// firing due entries and cascading coarse levels on the way.
    ///
    /// Intended for a single driving thread; concurrent callers are
    /// serialized, not interleaved.
    pub fn tick(&self) {
        let core = &self.core;
        let now = core.clock.now();
        let mut last = core.last_advanced.lock();
        core.advance_to(now);
        *last = now;
    }

    /// Drive the wheel forever from the calling thread. Sleeps one tick
    /// between passes; correctness does not depend on the interval, only
    /// lateness does.
    pub fn run_driver(&self) {
        debug!(
            "timing wheel driver running: precision {:?}, {} levels",
            self.core.precision,
            self.core.levels.len()
        );
        loop {
            self.tick();
            thread::sleep(self.core.precision);
        }
    }

    /// Number of armed timers not yet fired or canceled.
    pub fn outstanding(&self) -> usize {
        self.core.pool.outstanding()
    }

    /// Time point of the most recent driver pass.
    pub fn last_advanced(&self) -> Instant {
        *self.core.last_advanced.lock()
    }
}

impl<C: Clock> WheelCore<C> {
    fn ticks_at(&self, t: Instant) -> u64 {
        (t.saturating_duration_since(self.epoch).as_nanos() / self.precision_ns as u128) as u64
    }

    fn slot(&self, at: SlotRef) -> &Slot {
        &self.levels[at.level].slots[at.slot]
    }

    /// Mixed-radix decomposition of ticks-until-fire: the 2-bit digit, then
    /// successive 6-bit digits up to the most significant nonzero one,
    /// clamped to the coarsest level when the value exceeds the horizon.
    fn decompose(&self, remaining: u64) -> (usize, u64) {
        let digit0 = remaining & GEAR1_MASK;
        let mut rest = remaining >> GEAR1_BITS;
        if rest == 0 {
            return (0, digit0);
        }
        let mut level = 1;
        while rest >> GEAR_BITS > 0 && level + 1 < self.levels.len() {
            rest >>= GEAR_BITS;
            level += 1;
        }
        (level, rest & GEAR_MASK)
    }

    /// Link the entry into the coarsest-needed bucket for its remaining
    /// time. A due or overdue deadline still waits one tick: only the driver
    /// fires, never the arming path.
    fn place(&self, entry: &Arc<TimerEntry>, deadline: u64) {
        let now_ticks = self.current_ticks.load(Ordering::Acquire);
        let remaining = deadline.saturating_sub(now_ticks).max(1);
        let (level, digit) = self.decompose(remaining);

        let lvl = &self.levels[level];
        let cursor = lvl.cursor.load(Ordering::Acquire);
        let slot = (cursor + digit as usize) % lvl.size();
        lvl.slots[slot].push(entry, level, slot);
    }

    fn cancel(&self, entry: &Arc<TimerEntry>) -> bool {
        if !entry.try_acquire_gate() {
            return false;
        }
        // The gate is held: the callback can never run. Drop it eagerly.
        entry.clear_callback();

        // The snapshot may be stale if a cascade is relocating the entry
        // right now; erase verifies identity, and the cascade sees the held
        // gate and releases the entry itself.
        if let Some(at) = entry.slot_ref() {
            if let Some(owned) = self.slot(at).erase(at.key, entry) {
                self.pool.release(owned);
            }
        }
        true
    }

    /// Walk the absolute tick count up to `now`, one tick per step so no
    /// level-0 slot is ever skipped, no matter how late the driver is.
    fn advance_to(&self, now: Instant) {
        let target = self.ticks_at(now);
        let mut scratch = Vec::new();
        let mut cur = self.current_ticks.load(Ordering::Acquire);
        while cur < target {
            cur += 1;
            self.current_ticks.store(cur, Ordering::Release);

            let lvl0 = &self.levels[0];
            let c = (lvl0.cursor.load(Ordering::Acquire) + 1) % GEAR1_SIZE;
            lvl0.cursor.store(c, Ordering::Release);

            lvl0.slots[c].drain(&mut scratch);
            self.resolve_drained(cur, &mut scratch);

            if c == 0 {
                self.cascade(1, cur, &mut scratch);
            }
        }
    }

    /// A full revolution of level `level - 1` just completed: step `level`'s
    /// cursor and reclassify everything in the slot it lands on by remaining
    /// time. Iterative, chaining upward while revolutions keep completing.
    fn cascade(&self, level: usize, now_ticks: u64, scratch: &mut Vec<Arc<TimerEntry>>) {
        let mut level = level;
        while level < self.levels.len() {
            let lvl = &self.levels[level];
            let c = (lvl.cursor.load(Ordering::Acquire) + 1) % lvl.size();
            lvl.cursor.store(c, Ordering::Release);

            lvl.slots[c].drain(scratch);
            self.resolve_drained(now_ticks, scratch);

            if c != 0 {
                break;
            }
            level += 1;
        }
    }

    /// Dispatch a drained batch: still-pending entries with time left are
    /// re-placed by their remaining ticks, due ones fire, and entries whose
    /// gate is already held (canceled elsewhere) fall through to the pool.
    fn resolve_drained(&self, now_ticks: u64, scratch: &mut Vec<Arc<TimerEntry>>) {
        for entry in scratch.drain(..) {
            if entry.is_valid() && entry.deadline() > now_ticks {
                self.place(&entry, entry.deadline());
                continue;
            }
            if entry.try_acquire_gate() {
                entry.run();
            }
            self.pool.release(entry);
        }
    }
}
