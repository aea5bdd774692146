//! Timer tick counter.
//!
//! Advanced by the timer interrupt; read for runtime accounting timestamps.

use core::sync::atomic::{AtomicU64, Ordering};

/// Ticks since the timer was started.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Called from the timer interrupt.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}
