//! Concurrent hierarchical timing wheel.
//!
//! Based on Varghese and Lauck's paper
//! "Hashed and Hierarchical Timing Wheels: Efficient Data Structures for
//! Implementing a Timer Facility", extended with a lock-free fire/cancel
//! gate per timer so that arming and canceling threads can race a single
//! driver thread safely.
//!
//! Arming, canceling and firing are all O(1) amortized; a timer is
//! relocated at most once per level over its lifetime as coarse buckets
//! cascade into finer ones, and a bounded entry pool keeps steady-state
//! load free of per-timer allocation.

mod clock;
mod entry;
mod pool;
mod slot;
pub mod wheel;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use wheel::{TimerHandle, TimingWheel};
