use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Timer};

use super::BUTTON;
use crate::status;

/// Contact bounce settles well within this.
const DEBOUNCE: Duration = Duration::from_millis(20);

#[embassy_executor::task]
pub async fn run(mut button: ExtiInput<'static>) -> ! {
    loop {
        button.wait_for_falling_edge().await;
        let presses = status::record_press();
        defmt::debug!("button press #{}", presses);
        BUTTON.signal(());

        Timer::after(DEBOUNCE).await;
        button.wait_for_high().await;
    }
}
