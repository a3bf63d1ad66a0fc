//! # tos-mediator
//!
//! **tos-mediator** sits between a Terminal Operating System (TOS) and an
//! automation engine. It relays messages from bus channels to HTTP/SOAP
//! endpoints, correlates asynchronous answers with their requests, and runs
//! a canary that measures clock skew and checks that both sides see the
//! same change-data-capture (CDC) activity.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                     ┌────────────────────────────────────────┐
//!  MediatorConfig ───►│  Manager                               │
//!                     │  - connectors (Endpoint + Transformer) │
//!                     │  - EventBus ─► SubscriberSet(LogWriter)│
//!                     │  - CorrelationRegistry + dispatchers   │
//!                     └──────┬──────────────┬──────────────┬───┘
//!                            ▼              ▼              ▼
//!                   ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!                   │ Controller   │ │ Controller   │ │ Controller   │
//!                   │ relay flow   │ │ canary       │ │ cdc          │
//!                   │ BusSource    │ │ IntervalSrc  │ │ StartupSrc   │
//!                   └──────┬───────┘ └──────┬───────┘ └──────┬───────┘
//!                          ▼                ▼                ▼
//!                    RelaySession     CanarySession   CdcConsumeSession
//!                    (per record)     (per tick)      (per CDC channel)
//!                          │                │                │
//!                          ▼                ▼                ▼
//!                    Endpoint.send   round trip +     DedupWindowBuffer
//!                    ─► response     time sync +        ▲
//!                       channel      CDC compare ───────┘
//! ```
//!
//! ### Session lifecycle
//! ```text
//! WorkSource.next() ─► SessionFactory.create(item) ─► run_session()
//!
//!   ACTIVE ─► execute(ctx)
//!     ├─ Ok                ─► DONE
//!     ├─ Err(e)            ─► FAILED (reason = e)
//!     ├─ panic             ─► FAILED (reason = panic message)
//!     └─ ctx.interrupt()   ─► FAILED ("session interrupted")
//!   ─► session.notify_status(record)  failures logged, never propagated
//!   ─► owner.session_ended(record)     exactly once
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Own controllers, start/stop them with bounded waits.           | [`Manager`], [`Controller`]                 |
//! | **Sessions**      | One unit of work with a terminal state recorded exactly once.  | [`Session`], [`SessionRecord`]              |
//! | **Correlation**   | Await the answer to a published request by key.                | [`CorrelationRegistry`]                     |
//! | **CDC**           | Buffer first-seen keys and compare both sides.                 | [`DedupWindowBuffer`], [`CdcController`]    |
//! | **Endpoints**     | HTTP/SOAP connectors with template transformers.               | [`Endpoint`], [`Transformer`]               |
//! | **Events**        | Lifecycle events fanned out to subscribers.                    | [`Event`], [`Subscribe`]                    |
//! | **Errors**        | Typed errors per concern.                                      | [`SessionError`], [`ConfigError`]           |
//! | **Configuration** | TOML file with flows, endpoints, canary and CDC tables.        | [`MediatorConfig`]                          |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use tos_mediator::{Manager, MediatorConfig, MemoryBus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MediatorConfig::load("mediator.toml")?;
//!     let mut manager = Manager::new(config, Arc::new(MemoryBus::default()));
//!     manager.start().await;
//!
//!     tos_mediator::wait_for_shutdown_signal().await?;
//!     manager.stop().await;
//!     println!("{manager}");
//!     Ok(())
//! }
//! ```

mod buffer;
mod clock;
mod config;
mod controller;
mod correlation;
mod endpoint;
mod error;
mod events;
pub mod flows;
mod manager;
mod messaging;
mod policies;
mod session;
mod shutdown;
mod subscribers;

// ---- Public re-exports ----

pub use buffer::{BufferedRecord, DedupWindowBuffer};
pub use config::{
    CanaryConfig, CdcConfig, CdcTableConfig, EndpointConfig, FlowConfig, MediatorConfig, RuntimeConfig,
    TransformerConfig,
};
pub use controller::{
    BusSource, Controller, ControllerKind, ControllerSettings, ControllerState, ExecutionMode, IntervalSource,
    SessionFactory, SessionStats, StartupSource, WorkItem, WorkSource,
};
pub use correlation::{CorrelationRegistry, PendingResponse, ResponseDispatcher};
pub use endpoint::{Endpoint, HttpEndpoint, TemplateTransformer, Transformer, detect_fault};
pub use error::{BusError, ConfigError, ControllerError, CorrelationError, EndpointError, MediatorError, SessionError};
pub use events::{Event, EventBus, EventKind};
pub use flows::{CdcController, ProbeSnapshot, ProbeState};
pub use manager::Manager;
pub use messaging::{BusRecord, MemoryBus, MessageBus, Subscription};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use session::{
    Session, SessionContext, SessionHistory, SessionId, SessionOwner, SessionRecord, SessionState, run_session,
};
pub use shutdown::wait_for_shutdown_signal;
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
