#![deny(unsafe_code)]
//! Status LEDs driven by mode signals
//!
//! Callers set a mode through `SignalIndicator`; a driver future owns the
//! pin and keeps blinking until the next mode arrives.

use embassy_futures::select::{select, Either};
use embassy_stm32::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::Timer;
use envnode_hal::{Indicator, LedMode};

pub type LedSignal = Signal<CriticalSectionRawMutex, LedMode>;

pub struct SignalIndicator {
    signal: &'static LedSignal,
}

impl SignalIndicator {
    pub const fn new(signal: &'static LedSignal) -> Self {
        Self { signal }
    }
}

impl Indicator for SignalIndicator {
    fn set_mode(&self, mode: LedMode) {
        self.signal.signal(mode);
    }
}

/// Drive `led` from the modes published on `signal`
pub async fn drive_led(led: &mut Output<'static>, signal: &'static LedSignal) -> ! {
    let mut mode = LedMode::Off;
    loop {
        match mode {
            LedMode::On => {
                led.set_high();
                mode = signal.wait().await;
            }
            LedMode::Off => {
                led.set_low();
                mode = signal.wait().await;
            }
            LedMode::Blinking(half_period_ms) => {
                led.toggle();
                match select(signal.wait(), Timer::after_millis(half_period_ms.into())).await {
                    Either::First(next) => mode = next,
                    Either::Second(()) => {}
                }
            }
        }
    }
}
