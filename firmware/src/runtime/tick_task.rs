use cortex_m::peripheral::SCB;
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Timer};

use super::BUTTON;
use crate::badge::{FirmwareBadge, SharedTicks};
use crate::status;

#[embassy_executor::task]
pub async fn run(badge: &'static mut FirmwareBadge<SharedTicks>) -> ! {
    loop {
        let Some(period) = status::tick_period() else {
            BUTTON.wait().await;
            continue;
        };
        Timer::after(embassy_duration(period)).await;

        if BUTTON.try_take().is_some() {
            if let Err(err) = badge.press() {
                defmt::error!("button press lost: {}", defmt::Display2Format(&err));
            }
        }

        let report = badge.tick();
        let ticks = status::record_tick();
        if report.faulted > 0 {
            defmt::warn!("tick {}: {} task(s) faulted", ticks, report.faulted);
        }

        if let Some(wake_after) = badge.take_sleep_request() {
            standby(wake_after).await;
        }
    }
}

/// Parks the core until the wake timer or the button fires, then resets:
/// waking from deep sleep is a fresh boot.
async fn standby(wake_after: Option<core::time::Duration>) -> ! {
    BUTTON.reset();
    match wake_after {
        Some(duration) => {
            let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
            defmt::info!("standby for {} ms", millis);
            match select(Timer::after(embassy_duration(duration)), BUTTON.wait()).await {
                Either::First(()) => defmt::info!("wake timer expired"),
                Either::Second(()) => defmt::info!("woken by button"),
            }
        }
        None => {
            defmt::info!("standby until button press");
            BUTTON.wait().await;
        }
    }
    SCB::sys_reset()
}

fn embassy_duration(duration: core::time::Duration) -> Duration {
    Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}
