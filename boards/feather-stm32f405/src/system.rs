#![deny(unsafe_code)]
//! Reset button, restart and watchdog

use defmt::{info, warn};
use embassy_stm32::gpio::Input;
use embassy_stm32::wdg::IndependentWatchdog;
use embassy_time::Timer;
use envnode_hal::{ResetButton, SystemControl};

/// Watchdog timeout in microseconds
pub const WATCHDOG_TIMEOUT_US: u32 = 120_000_000;
pub const WATCHDOG_FEED_MS: u64 = 2_000;

/// Active-low push button with the internal pull-up enabled
pub struct ActiveLowButton {
    pin: Input<'static>,
}

impl ActiveLowButton {
    pub fn new(pin: Input<'static>) -> Self {
        Self { pin }
    }
}

impl ResetButton for ActiveLowButton {
    fn is_pressed(&self) -> bool {
        self.pin.is_low()
    }
}

pub struct CortexReset;

impl SystemControl for CortexReset {
    fn restart(&self) {
        warn!("Restarting");
        cortex_m::peripheral::SCB::sys_reset();
    }
}

/// Start the independent watchdog and keep feeding it
pub async fn feed_watchdog(mut watchdog: IndependentWatchdog<'static>) -> ! {
    watchdog.unleash();
    info!("Watchdog armed ({} s)", WATCHDOG_TIMEOUT_US / 1_000_000);
    loop {
        watchdog.pet();
        Timer::after_millis(WATCHDOG_FEED_MS).await;
    }
}
