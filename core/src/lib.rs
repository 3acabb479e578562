//! Platform-agnostic core of the environmental telemetry node
//!
//! Sampling, alarm evaluation, durable delivery and connectivity
//! orchestration, written against the capability traits in `envnode-hal`.
//! It has NO hardware dependencies.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

extern crate alloc;

// Must come first so the logging macros are visible everywhere
#[macro_use]
mod fmt;

pub mod alarm;
pub mod config;
pub mod config_store;
pub mod delivery;
pub mod device;
pub mod maintenance;
pub mod network;
pub mod sampling;
pub mod service;
pub mod state;
pub mod time;

#[cfg(test)]
mod mock;
