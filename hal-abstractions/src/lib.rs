//! Hardware capability traits for the environmental telemetry node
//!
//! This crate defines the seams between the platform-agnostic telemetry
//! logic (`envnode-core`) and a concrete board. Boards implement these
//! traits; the core only calls them.
//!
//! Async capabilities use `-> impl Future` in trait position so they can be
//! implemented with plain `async fn` on the board side and driven by any
//! executor (RTIC, embassy, or `block_on` in host tests).

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod network;
pub mod sensor;
pub mod storage;
pub mod system;
pub mod time;

pub use embedded_hal_async::delay::DelayNs;
pub use network::{EthernetInterface, IpSettings, MessagingTransport, QoS};
pub use sensor::{Reading, TempHumSensor};
pub use storage::FileStore;
pub use system::{Indicator, LedMode, ResetButton, SystemControl};
pub use time::{Monotonic, TimeSource};
