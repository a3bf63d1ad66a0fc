//! # Flows
//!
//! The concrete controllers the manager builds from configuration:
//!
//! - [`relay`] one [`Controller`](crate::Controller) per configured flow; a session per inbound record.
//! - [`canary`] periodic sequential probes with clock sync and CDC comparison.
//! - [`cdc`] CDC consumption into dedup buffers, queried by the canary.

pub mod canary;
pub mod cdc;
pub mod cdc_data;
pub mod relay;
pub mod time_sync;

pub use canary::{
    CanaryFactory, CanaryRequest, CanaryResponse, ConnectionStatus, ProbeSnapshot, ProbeState,
    ProbeTransport, StatusSink,
};
pub use cdc::{CdcController, CdcSettings};
pub use cdc_data::CdcEntry;
pub use relay::RelayFactory;
pub use time_sync::{RoundTrip, determine_sync_time};
