//! Ethernet link orchestration
//!
//! `connect()` walks `Resetting -> Activating -> AttemptLoop(1..=K)` and
//! either reaches `Connected` or gives up: indicator off, cooldown, restart.
//! A supervisor re-runs `connect()` whenever the link is found down and no
//! attempt is in flight, and a second loop keeps the indicator in step with
//! link and session readiness.

use core::cell::Cell;

use envnode_hal::{DelayNs, EthernetInterface, Indicator, LedMode, SystemControl};

use crate::config::EthernetConfig;
use crate::state::ConnectivityState;

/// Blink half-period while connecting
pub const CONNECTING_BLINK_MS: u32 = 2_500;
/// Settle time after activation, before the first check
pub const ACTIVATE_WAIT_MS: u32 = 1_000;
/// Wait at the start of each attempt, before checking the link
pub const ATTEMPT_CHECK_MS: u32 = 500;
pub const INDICATOR_REFRESH_MS: u32 = 1_000;

pub struct LinkOrchestrator<'a, E, I, S> {
    nic: E,
    indicator: &'a I,
    system: &'a S,
    state: &'a ConnectivityState,
    config: &'a EthernetConfig,
    /// Mode last pushed to the indicator by either loop
    shown: Cell<Option<LedMode>>,
}

impl<'a, E, I, S> LinkOrchestrator<'a, E, I, S>
where
    E: EthernetInterface,
    I: Indicator,
    S: SystemControl,
{
    pub fn new(
        nic: E,
        indicator: &'a I,
        system: &'a S,
        state: &'a ConnectivityState,
        config: &'a EthernetConfig,
    ) -> Self {
        Self {
            nic,
            indicator,
            system,
            state,
            config,
            shown: Cell::new(None),
        }
    }

    /// Push `mode` unless the indicator already shows it
    fn show(&self, mode: LedMode) {
        if self.shown.get() != Some(mode) {
            self.indicator.set_mode(mode);
            self.shown.set(Some(mode));
        }
    }

    /// Bring the link up. Returns `false` only after the restart request,
    /// which on hardware does not return.
    pub async fn connect<D: DelayNs>(&self, delay: &mut D) -> bool {
        if self.nic.is_link_up() {
            debug!("Link already up");
            self.state.set_link_up(true);
            return true;
        }

        info!("Resetting network interface");
        self.nic.reset_pulse().await;
        delay.delay_ms(self.config.settle_delay_ms).await;

        match self.config.ip_settings() {
            Ok(settings) => {
                if let Err(e) = self.nic.activate(&settings).await {
                    error!("Interface activation failed: {:?}", dbg_fmt!(e));
                }
            }
            Err(e) => error!("Unusable IP settings: {:?}", dbg_fmt!(e)),
        }
        delay.delay_ms(ACTIVATE_WAIT_MS).await;

        let attempts = self.config.connect_attempts;
        for attempt in 1..=attempts {
            delay.delay_ms(ATTEMPT_CHECK_MS).await;
            if self.nic.is_link_up() {
                info!("Link up after attempt {}/{}", attempt, attempts);
                self.state.set_link_up(true);
                self.show(LedMode::On);
                return true;
            }
            warn!("Link attempt {}/{} failed", attempt, attempts);
            self.show(LedMode::Blinking(CONNECTING_BLINK_MS));
            delay.delay_ms(self.config.attempt_delay_ms).await;
        }

        error!(
            "Link down after {} attempts, restarting in {} ms",
            attempts, self.config.cooldown_ms
        );
        self.state.set_link_up(false);
        self.show(LedMode::Off);
        delay.delay_ms(self.config.cooldown_ms).await;
        self.system.restart();
        false
    }

    /// One supervisor pass: reconnect if the link is down and idle
    pub async fn supervise_once<D: DelayNs>(&self, delay: &mut D) -> Option<bool> {
        let up = self.nic.is_link_up();
        self.state.set_link_up(up);
        if up || self.state.snapshot().link_connecting {
            return None;
        }

        warn!("Link down, reconnecting");
        self.state.set_link_connecting(true);
        let connected = self.connect(delay).await;
        self.state.set_link_connecting(false);
        Some(connected)
    }

    pub async fn run_supervisor<D: DelayNs>(&self, delay: &mut D) -> ! {
        loop {
            let _ = self.supervise_once(delay).await;
            delay.delay_ms(self.config.retry_interval_ms).await;
        }
    }

    /// Indicator mode for the current readiness
    pub fn indicator_mode(&self) -> LedMode {
        let readiness = self.state.snapshot();
        if readiness.link_up && readiness.session_ready {
            LedMode::On
        } else {
            LedMode::Blinking(CONNECTING_BLINK_MS)
        }
    }

    /// Re-read the link and update the indicator if the mode changed
    pub fn refresh_indicator(&self) {
        if !self.state.snapshot().link_connecting {
            self.state.set_link_up(self.nic.is_link_up());
        }
        self.show(self.indicator_mode());
    }

    pub async fn run_indicator<D: DelayNs>(&self, delay: &mut D) -> ! {
        loop {
            self.refresh_indicator();
            delay.delay_ms(INDICATOR_REFRESH_MS).await;
        }
    }
}
