#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared status storage for the firmware target.
//!
//! Atomics carry the tick configuration from the registry to the timer task
//! and a few counters that are useful when inspecting a board over RTT.

use core::time::Duration;

use portable_atomic::{AtomicU32, Ordering};

/// Tick period in milliseconds (0 == stopped).
static TICK_PERIOD_MS: AtomicU32 = AtomicU32::new(0);
/// Ticks processed since boot.
static TICKS: AtomicU32 = AtomicU32::new(0);
/// Button presses seen since boot.
static PRESSES: AtomicU32 = AtomicU32::new(0);
/// Heartbeat loop iterations since boot.
static HEARTBEATS: AtomicU32 = AtomicU32::new(0);

/// Publishes the tick period; `None` stops the timer.
pub fn set_tick_period(period: Option<Duration>) {
    let millis = period.map_or(0, |period| {
        u32::try_from(period.as_millis()).unwrap_or(u32::MAX).max(1)
    });
    TICK_PERIOD_MS.store(millis, Ordering::Release);
}

/// Returns the published tick period, if the timer should run.
pub fn tick_period() -> Option<Duration> {
    match TICK_PERIOD_MS.load(Ordering::Acquire) {
        0 => None,
        millis => Some(Duration::from_millis(u64::from(millis))),
    }
}

pub fn record_tick() -> u32 {
    TICKS.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

pub fn record_press() -> u32 {
    PRESSES.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

pub fn record_heartbeat() -> u32 {
    HEARTBEATS.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}
