//! Indicators, user input and system control

/// Indicator LED behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedMode {
    On,
    Off,
    /// Toggle with the given half-period in milliseconds
    Blinking(u32),
}

/// A status LED. Setting a new mode replaces any running blink pattern.
pub trait Indicator {
    fn set_mode(&self, mode: LedMode);
}

/// Momentary push button, active while held
pub trait ResetButton {
    fn is_pressed(&self) -> bool;
}

pub trait SystemControl {
    /// Cold-reset the device. On hardware this never returns.
    fn restart(&self);
}
