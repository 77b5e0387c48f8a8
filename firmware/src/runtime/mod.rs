use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::Pull;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use static_cell::StaticCell;

use badge_core::power::PowerConfig;

use crate::badge::{FirmwareBadge, SharedTicks};
use crate::logger;

mod button_task;
mod tick_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Raised by the button task, drained by the tick task before each tick.
pub(super) static BUTTON: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static BADGE: StaticCell<FirmwareBadge<SharedTicks>> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    logger::init();

    let config = hal::Config::default();
    let hal::Peripherals { PA0, EXTI0, .. } = hal::init(config);

    let button = ExtiInput::new(PA0, EXTI0, Pull::Up);
    let badge = BADGE.init(FirmwareBadge::boot(SharedTicks, PowerConfig::default()));

    spawner
        .spawn(button_task::run(button))
        .expect("failed to spawn button task");

    spawner
        .spawn(tick_task::run(badge))
        .expect("failed to spawn tick task");

    core::future::pending::<()>().await;
}
