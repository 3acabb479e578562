//! Factory reset by long button press

use envnode_hal::{DelayNs, FileStore, ResetButton, SystemControl};

use crate::config_store::ConfigManager;

/// Ignore the button right after boot
pub const STARTUP_GRACE_MS: u32 = 3_000;
pub const IDLE_POLL_MS: u32 = 1_000;
pub const HOLD_POLL_MS: u32 = 500;
pub const RESET_HOLD_MS: u32 = 10_000;
pub const RESET_RESTART_MS: u32 = 1_000;

pub struct FactoryResetMonitor<'a, B, S, Sys> {
    button: B,
    configs: &'a ConfigManager<'a, S>,
    system: &'a Sys,
}

impl<'a, B, S, Sys> FactoryResetMonitor<'a, B, S, Sys>
where
    B: ResetButton,
    S: FileStore,
    Sys: SystemControl,
{
    pub fn new(button: B, configs: &'a ConfigManager<'a, S>, system: &'a Sys) -> Self {
        Self {
            button,
            configs,
            system,
        }
    }

    /// Follow one press. Returns `true` if it was held long enough to reset.
    pub async fn check_once<D: DelayNs>(&self, delay: &mut D) -> bool {
        if !self.button.is_pressed() {
            return false;
        }

        info!("Button held, waiting to confirm factory reset");
        let mut held_ms = 0;
        loop {
            delay.delay_ms(HOLD_POLL_MS).await;
            if !self.button.is_pressed() {
                debug!("Button released after {} ms", held_ms);
                return false;
            }
            held_ms += HOLD_POLL_MS;
            if held_ms >= RESET_HOLD_MS {
                break;
            }
        }

        warn!("Restoring default configuration");
        match self.configs.factory_reset() {
            Ok(()) => info!("Defaults restored, restarting"),
            Err(e) => error!("Factory reset failed: {}", e),
        }
        delay.delay_ms(RESET_RESTART_MS).await;
        self.system.restart();
        true
    }

    pub async fn run<D: DelayNs>(&self, delay: &mut D) -> ! {
        delay.delay_ms(STARTUP_GRACE_MS).await;
        info!("Factory reset button armed");
        loop {
            let _ = self.check_once(delay).await;
            delay.delay_ms(IDLE_POLL_MS).await;
        }
    }
}
