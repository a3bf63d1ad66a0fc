//! # Controllers
//!
//! A controller owns one stream of work and the sessions it produces.
//!
//! ```text
//! WorkSource ──next()──► [WorkItem..] ──SessionFactory::create──► Session
//!                                                                   │
//!          ExecutionMode::Sequential ─► run inline (one at a time)  │
//!          ExecutionMode::Concurrent ─► JoinSet (+ optional permit) ┘
//!                                                                   │
//!                    SessionOwner::session_ended ◄── run_session ◄──┘
//!                                │
//!                                ▼
//!               ledger: live map, totals, last, history ──► report()
//! ```
//!
//! ## Rules
//! - A controller runs once: `Idle → Running → Stopping → Stopped`.
//! - `stop_controller` stops intake; in-flight sessions get a grace period,
//!   then the interrupt, then are aborted and recorded `FAILED`.
//! - Source errors are retried with backoff; they never end the loop.

mod core;
mod mode;
mod report;
mod source;

pub use core::{
    Controller, ControllerKind, ControllerSettings, ControllerState, SessionFactory, SessionStats,
};
pub use mode::ExecutionMode;
pub use report::wrap_lines;
pub use source::{BusSource, IntervalSource, StartupSource, WorkItem, WorkSource};
