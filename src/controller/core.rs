use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clock;
use crate::error::{BusError, ControllerError, SessionError};
use crate::events::{Event, EventBus, EventKind};
use crate::policies::BackoffPolicy;
use crate::session::{
    Session, SessionContext, SessionHistory, SessionId, SessionOwner, SessionRecord, SessionState,
    run_session,
};

use super::mode::ExecutionMode;
use super::report::wrap_lines;
use super::source::{WorkItem, WorkSource};

/// Turns work items into sessions.
pub trait SessionFactory: Send + Sync + 'static {
    /// Builds the session for `item`; `None` skips the item.
    fn create(&self, item: WorkItem) -> Option<Arc<dyn Session>>;
}

/// Which family a controller belongs to (report grouping and wording).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerKind {
    Relay,
    Canary,
    Cdc,
}

impl ControllerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerKind::Relay => "FlowController",
            ControllerKind::Canary => "CanaryController",
            ControllerKind::Cdc => "CDCController",
        }
    }
}

/// Controller lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ControllerState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ControllerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ControllerState::Idle,
            1 => ControllerState::Running,
            2 => ControllerState::Stopping,
            _ => ControllerState::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControllerState::Idle => "IDLE",
            ControllerState::Running => "RUNNING",
            ControllerState::Stopping => "STOPPING",
            ControllerState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables of one controller.
#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub mode: ExecutionMode,
    /// How long in-flight sessions get after the loop exits, before the
    /// interrupt is raised (and again before they are aborted).
    pub drain_grace: Duration,
    /// Keep a history of this many finished sessions (`None` = no history).
    pub history_capacity: Option<usize>,
    /// Endpoint description for the report.
    pub endpoint: Option<String>,
    /// Extra `key=value` shown in the report.
    pub detail: Option<String>,
    /// Pacing of source retries.
    pub backoff: BackoffPolicy,
    /// Report wrap width (`0` = no wrapping).
    pub report_width: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            drain_grace: Duration::from_secs(1),
            history_capacity: None,
            endpoint: None,
            detail: None,
            backoff: BackoffPolicy::default(),
            report_width: 0,
        }
    }
}

/// Point-in-time session counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions currently running.
    pub active: usize,
    /// Sessions ever admitted.
    pub started: u64,
    pub done: u64,
    pub failed: u64,
}

struct Ledger {
    live: HashMap<SessionId, SessionRecord>,
    totals: [u64; 3],
    last: Option<SessionRecord>,
    last_failure: Option<SessionRecord>,
    history: Option<SessionHistory>,
}

impl Ledger {
    fn account(&mut self, record: &SessionRecord) {
        self.totals[record.state().index()] += 1;
        self.last = Some(record.clone());
        if record.state() == SessionState::Failed {
            self.last_failure = Some(record.clone());
        }
        if let Some(history) = self.history.as_mut() {
            history.push(record.clone());
        }
    }
}

/// Supervises the sessions of one flow, probe or consumer group.
///
/// A controller is a [`WorkSource`] plus a [`SessionFactory`]: the run loop
/// asks the source for work, turns each item into a session and runs it per
/// [`ExecutionMode`]. Outcomes come back through the single
/// [`SessionOwner::session_ended`] entry point.
pub struct Controller {
    name: Arc<str>,
    kind: ControllerKind,
    settings: ControllerSettings,
    source_label: String,
    source: Mutex<Option<Box<dyn WorkSource>>>,
    factory: Arc<dyn SessionFactory>,
    state: AtomicU8,
    stop: CancellationToken,
    interrupt: CancellationToken,
    seq: AtomicU64,
    ledger: Mutex<Ledger>,
    events: EventBus,
}

impl Controller {
    pub fn new(
        name: impl Into<Arc<str>>,
        kind: ControllerKind,
        source: Box<dyn WorkSource>,
        factory: Arc<dyn SessionFactory>,
        settings: ControllerSettings,
        events: EventBus,
    ) -> Arc<Self> {
        let history = settings.history_capacity.map(SessionHistory::new);
        Arc::new(Self {
            name: name.into(),
            kind,
            source_label: source.describe(),
            source: Mutex::new(Some(source)),
            factory,
            settings,
            state: AtomicU8::new(ControllerState::Idle as u8),
            stop: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            seq: AtomicU64::new(0),
            ledger: Mutex::new(Ledger {
                live: HashMap::new(),
                totals: [0; 3],
                last: None,
                last_failure: None,
                history,
            }),
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ControllerKind {
        self.kind
    }

    pub fn state(&self) -> ControllerState {
        ControllerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ControllerState, to: ControllerState) -> Result<(), ControllerState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ControllerState::from_u8)
    }

    /// Lets the work source subscribe ahead of [`run`](Self::run), so work
    /// published once this returns is not missed. Call before `run`; a failure
    /// is retried by the run loop on its first poll.
    pub async fn prepare_source(&self) -> Result<(), BusError> {
        let taken = self.source.lock().take();
        let Some(mut source) = taken else {
            return Ok(());
        };
        let res = source.prepare().await;
        *self.source.lock() = Some(source);
        res
    }

    /// Runs the supervision loop until stopped, then drains in-flight sessions.
    ///
    /// A controller runs at most once; a stopped controller is never restarted.
    pub async fn run(self: Arc<Self>) -> Result<(), ControllerError> {
        self.transition(ControllerState::Idle, ControllerState::Running)
            .map_err(|current| match current {
                ControllerState::Running => ControllerError::AlreadyStarted {
                    name: self.name.to_string(),
                },
                _ => ControllerError::Stopped {
                    name: self.name.to_string(),
                },
            })?;
        let Some(mut source) = self.source.lock().take() else {
            return Err(ControllerError::AlreadyStarted {
                name: self.name.to_string(),
            });
        };

        info!(controller = %self.name, source = %self.source_label, mode = ?self.settings.mode, "controller started");
        self.publish(Event::new(EventKind::ControllerStarted));

        let limiter = match self.settings.mode {
            ExecutionMode::Concurrent { max } if max > 0 => Some(Arc::new(Semaphore::new(max))),
            _ => None,
        };
        let mut sessions: JoinSet<()> = JoinSet::new();
        let mut failures: u32 = 0;

        loop {
            if self.stop.is_cancelled() {
                break;
            }
            while let Some(res) = sessions.try_join_next() {
                self.reap(res);
            }

            let polled = tokio::select! {
                _ = self.stop.cancelled() => break,
                polled = source.next() => polled,
            };

            match polled {
                Ok(items) => {
                    failures = 0;
                    for item in items {
                        if self.stop.is_cancelled() {
                            debug!(controller = %self.name, "stopped; remaining work dropped");
                            break;
                        }
                        self.launch(item, limiter.as_ref(), &mut sessions).await;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.settings.backoff.next(failures - 1);
                    warn!(controller = %self.name, error = %e, failures, ?delay, "work source failed");
                    self.publish(
                        Event::new(EventKind::SourceFailed)
                            .with_reason(e.to_string())
                            .with_attempt(failures),
                    );
                    self.publish(
                        Event::new(EventKind::BackoffScheduled)
                            .with_delay(delay)
                            .with_attempt(failures),
                    );
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        drop(source);
        self.drain(sessions).await;
        Ok(())
    }

    async fn launch(
        self: &Arc<Self>,
        item: WorkItem,
        limiter: Option<&Arc<Semaphore>>,
        sessions: &mut JoinSet<()>,
    ) {
        let Some(session) = self.factory.create(item) else {
            return;
        };

        match self.settings.mode {
            ExecutionMode::Sequential => {
                let (record, ctx) = self.admit();
                run_session(session.as_ref(), record, ctx, self.as_ref()).await;
            }
            ExecutionMode::Concurrent { .. } => {
                let permit: Option<OwnedSemaphorePermit> = match limiter {
                    Some(sem) => tokio::select! {
                        _ = self.stop.cancelled() => return,
                        permit = Arc::clone(sem).acquire_owned() => match permit {
                            Ok(p) => Some(p),
                            Err(_) => return,
                        },
                    },
                    None => None,
                };
                let (record, ctx) = self.admit();
                let owner = Arc::clone(self);
                sessions.spawn(async move {
                    let _permit = permit;
                    run_session(session.as_ref(), record, ctx, owner.as_ref()).await;
                });
            }
        }
    }

    fn admit(&self) -> (SessionRecord, SessionContext) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let id = SessionId::new(Arc::clone(&self.name), seq);
        let record = SessionRecord::active(id.clone());
        {
            let mut ledger = self.ledger.lock();
            ledger.totals[SessionState::Active.index()] += 1;
            ledger.live.insert(id.clone(), record.clone());
        }
        self.publish(Event::new(EventKind::SessionStarted).with_session(id.to_string()));
        let ctx = SessionContext::new(id, self.stop.child_token(), self.interrupt.child_token());
        (record, ctx)
    }

    fn reap(&self, res: Result<(), JoinError>) {
        if let Err(e) = res {
            if e.is_panic() {
                error!(controller = %self.name, error = %e, "session task panicked outside its runner");
            }
        }
    }

    /// Waits for in-flight sessions: grace, then interrupt and grace, then abort.
    async fn drain(&self, mut sessions: JoinSet<()>) {
        let _ = self.transition(ControllerState::Running, ControllerState::Stopping);
        let grace = self.settings.drain_grace;

        let mut reason = None;
        if !self.join_within(&mut sessions, grace).await {
            warn!(controller = %self.name, in_flight = sessions.len(), "sessions still running, interrupting");
            self.interrupt.cancel();
            if !self.join_within(&mut sessions, grace).await {
                sessions.abort_all();
                while let Some(res) = sessions.join_next().await {
                    self.reap(res);
                }
            }
            let abandoned = self.abandon_live("aborted during controller shutdown");
            reason = Some(format!("sessions interrupted; {abandoned} aborted"));
        }

        self.state.store(ControllerState::Stopped as u8, Ordering::Release);
        info!(controller = %self.name, "controller stopped");
        let mut ev = Event::new(EventKind::ControllerStopped);
        if let Some(reason) = reason {
            ev = ev.with_reason(reason);
        }
        self.publish(ev);
    }

    async fn join_within(&self, sessions: &mut JoinSet<()>, grace: Duration) -> bool {
        let all = async {
            while let Some(res) = sessions.join_next().await {
                self.reap(res);
            }
        };
        tokio::time::timeout(grace, all).await.is_ok()
    }

    /// Fails every session still in the live map (their tasks are gone).
    fn abandon_live(&self, reason: &str) -> usize {
        let mut ledger = self.ledger.lock();
        let live: Vec<SessionRecord> = ledger.live.drain().map(|(_, r)| r).collect();
        for record in &live {
            let record = record.clone().finish(vec![reason.to_string()], String::new());
            ledger.account(&record);
        }
        live.len()
    }

    /// Stops accepting work; in-flight sessions keep running.
    ///
    /// The loop observes this at the top of its next iteration (or while
    /// waiting on the source) and then drains.
    pub fn stop_controller(&self) {
        self.stop.cancel();
        if self.transition(ControllerState::Idle, ControllerState::Stopped).is_ok() {
            self.publish(Event::new(EventKind::ControllerStopped).with_reason("never started"));
        } else if self
            .transition(ControllerState::Running, ControllerState::Stopping)
            .is_ok()
        {
            self.publish(Event::new(EventKind::ControllerStopping));
        }
    }

    /// Stops and makes every in-flight session give up its blocking waits.
    pub fn interrupt(&self) {
        self.stop_controller();
        self.interrupt.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ControllerState::Stopped
    }

    pub fn stats(&self) -> SessionStats {
        let ledger = self.ledger.lock();
        SessionStats {
            active: ledger.live.len(),
            started: ledger.totals[SessionState::Active.index()],
            done: ledger.totals[SessionState::Done.index()],
            failed: ledger.totals[SessionState::Failed.index()],
        }
    }

    /// Finished sessions, newest first (empty when no history is kept).
    pub fn last_sessions(&self) -> Vec<SessionRecord> {
        self.ledger
            .lock()
            .history
            .as_ref()
            .map(SessionHistory::snapshot)
            .unwrap_or_default()
    }

    /// Sessions currently running.
    pub fn live_sessions(&self) -> Vec<SessionRecord> {
        self.ledger.lock().live.values().cloned().collect()
    }

    /// Resizes the history; shrinking evicts immediately. No-op without history.
    pub fn set_history_capacity(&self, capacity: usize) {
        if let Some(history) = self.ledger.lock().history.as_mut() {
            history.set_capacity(capacity);
        }
    }

    /// Operator-facing snapshot. Holds the ledger lock only to copy counters.
    pub fn report(&self) -> String {
        let (stats, last, last_failure) = {
            let ledger = self.ledger.lock();
            (
                SessionStats {
                    active: ledger.live.len(),
                    started: ledger.totals[SessionState::Active.index()],
                    done: ledger.totals[SessionState::Done.index()],
                    failed: ledger.totals[SessionState::Failed.index()],
                },
                ledger.last.clone(),
                ledger.last_failure.clone(),
            )
        };

        // A failure followed by later sessions stays visible on its own line.
        let failure_line = match (&last_failure, &last) {
            (Some(failed), Some(latest)) if failed.id() != latest.id() => {
                let at = failed.finished_at().map(|ts| clock::format_ts(&ts)).unwrap_or_default();
                format!(
                    "\n\t\tLast failure @ {at}, session={}, error={}",
                    failed.id(),
                    failed.failure_reason().unwrap_or_default()
                )
            }
            _ => String::new(),
        };

        let last_line = match last {
            None => "No sessions yet.".to_string(),
            Some(rec) => {
                let at = rec.finished_at().map(|ts| clock::format_ts(&ts)).unwrap_or_default();
                let mut line = format!("Last session finished @ {at}, State={}", rec.state());
                if let Some(reason) = rec.failure_reason() {
                    line.push_str(", error=");
                    line.push_str(reason);
                } else if !rec.message().is_empty() {
                    line.push_str(", message=");
                    line.push_str(rec.message());
                }
                line
            }
        };

        let detail = self
            .settings
            .detail
            .as_deref()
            .map(|d| format!(", {d}"))
            .unwrap_or_default();
        let text = format!(
            "{} {} subscribed to {}, state={}, endPoint={}{}\n\tSessionsStats: #ACTIVE={}, DONE={}, FAILED={} \n\t\t{}{}",
            self.kind.as_str(),
            self.name,
            self.source_label,
            self.state(),
            self.settings.endpoint.as_deref().unwrap_or("-"),
            detail,
            stats.active,
            stats.done,
            stats.failed,
            last_line,
            failure_line,
        );
        wrap_lines(&text, self.settings.report_width)
    }

    fn publish(&self, ev: Event) {
        self.events.publish(ev.with_controller(Arc::clone(&self.name)));
    }
}

impl SessionOwner for Controller {
    fn session_ended(&self, record: SessionRecord) {
        if !record.state().is_terminal() {
            warn!(controller = %self.name, session = %record.id(), "session_ended with non-terminal state ignored");
            return;
        }
        {
            let mut ledger = self.ledger.lock();
            if ledger.live.remove(record.id()).is_none() {
                drop(ledger);
                warn!(controller = %self.name, session = %record.id(), "session_ended for unknown session ignored");
                return;
            }
            ledger.account(&record);
        }

        let session = record.id().to_string();
        match record.state() {
            SessionState::Failed => {
                let reason = record.failure_reason().unwrap_or_default();
                warn!(controller = %self.name, %session, reason, "session failed");
                self.publish(
                    Event::new(EventKind::SessionFailed)
                        .with_session(session)
                        .with_reason(reason),
                );
            }
            _ => {
                debug!(controller = %self.name, %session, "session done");
                let mut ev = Event::new(EventKind::SessionDone).with_session(session);
                if !record.message().is_empty() {
                    ev = ev.with_reason(record.message());
                }
                self.publish(ev);
            }
        }
    }

    fn notify_failed(&self, record: &SessionRecord, error: &SessionError) {
        self.publish(
            Event::new(EventKind::StatusNotifyFailed)
                .with_session(record.id().to_string())
                .with_reason(error.to_string()),
        );
    }
}
