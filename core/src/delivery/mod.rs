//! Durable telemetry delivery

pub mod ledger;
pub mod pipeline;
pub mod record;

pub use ledger::{BacklogEntry, Ledger, LedgerError};
pub use pipeline::{DeliveryOutcome, DeliveryPipeline, ReplayOutcome};
pub use record::{build_records, ChannelRef, DeliveryRecord};
