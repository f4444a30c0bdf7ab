//! Per-server probe state machine.
//!
//! A [`ServerProbe`] repeatedly checks one URL until it has seen
//! `success_threshold` consecutive positive attempts or its deadline has
//! passed. Each attempt is one task on the shared [`Scheduler`]; the next
//! attempt is armed only after the previous result has been classified.
//!
//! ```text
//! Pending --unavailable--> Pending (counter = 0; Failed once past deadline)
//! Pending --available----> Pending (counter + 1)
//!                          Succeeded when counter == threshold
//!                          otherwise Failed once past deadline
//! ```
//!
//! `Succeeded`, `Failed` and `Cancelled` are terminal.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use http::Uri;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::error::{ReadinessError, ReadinessResult};
use crate::interpreter::{ProbeOutcomeInterpreter, ProbeResult};
use crate::scheduler::Scheduler;
use crate::transport::{BoxFuture, ProbeRequest, Transport};

/// Resolution of a probe, observable through [`ServerProbe::await_outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Pending,
    Succeeded,
    Failed(ReadinessError),
    Cancelled,
}

impl ProbeOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, ProbeOutcome::Pending)
    }
}

/// What a probe checks: one server of one machine, at one URL.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    /// Server reference, e.g. `wsagent/http`.
    pub server: String,
    pub machine: String,
    pub uri: Uri,
    pub token: Option<String>,
    pub interpreter: ProbeOutcomeInterpreter,
}

/// Verdict of recording one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Retry,
    Succeeded,
    Expired,
}

/// Mutable state owned by a single probe.
#[derive(Debug)]
struct ProbeState {
    consecutive_successes: u32,
    success_threshold: u32,
    deadline: Instant,
}

impl ProbeState {
    fn new(success_threshold: u32, deadline: Instant) -> Self {
        Self {
            consecutive_successes: 0,
            success_threshold: success_threshold.max(1),
            deadline,
        }
    }

    fn expired(&self, now: Instant) -> bool {
        now > self.deadline
    }

    fn record(&mut self, result: ProbeResult, now: Instant) -> Step {
        if result.is_available() {
            self.consecutive_successes += 1;
            if self.consecutive_successes >= self.success_threshold {
                return Step::Succeeded;
            }
        } else {
            self.consecutive_successes = 0;
        }

        if self.expired(now) {
            Step::Expired
        } else {
            Step::Retry
        }
    }
}

/// Readiness probe for one server endpoint.
pub struct ServerProbe {
    target: ProbeTarget,
    request: ProbeRequest,
    config: ProbeConfig,
    transport: Arc<dyn Transport>,
    scheduler: Scheduler,
    /// Created on `start`.
    state: Mutex<Option<ProbeState>>,
    started: AtomicBool,
    attempts: AtomicU32,
    outcome: watch::Sender<ProbeOutcome>,
    cancel: watch::Sender<bool>,
}

impl ServerProbe {
    pub fn new(
        target: ProbeTarget,
        config: ProbeConfig,
        transport: Arc<dyn Transport>,
        scheduler: Scheduler,
    ) -> Arc<Self> {
        let request = ProbeRequest {
            uri: target.uri.clone(),
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            token: target.token.clone(),
        };
        Arc::new(Self {
            target,
            request,
            config,
            transport,
            scheduler,
            state: Mutex::new(None),
            started: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            outcome: watch::Sender::new(ProbeOutcome::Pending),
            cancel: watch::Sender::new(false),
        })
    }

    /// Server reference this probe checks.
    pub fn server(&self) -> &str {
        &self.target.server
    }

    pub fn uri(&self) -> &Uri {
        &self.target.uri
    }

    /// Start probing: arms the first attempt with no delay. Calling it
    /// again is a no-op. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state() = Some(ProbeState::new(
            self.config.success_threshold,
            Instant::now() + self.config.timeout,
        ));
        debug!(
            server = %self.target.server,
            machine = %self.target.machine,
            url = %self.target.uri,
            "server probe started"
        );
        self.arm(Duration::ZERO);
    }

    /// Resolve to the server reference once the threshold is met, or to the
    /// failure that ended the probe.
    pub async fn await_outcome(&self) -> ReadinessResult<String> {
        let mut rx = self.outcome.subscribe();
        let outcome = match rx.wait_for(|o| !o.is_pending()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => ProbeOutcome::Cancelled,
        };
        match outcome {
            ProbeOutcome::Succeeded => Ok(self.target.server.clone()),
            ProbeOutcome::Failed(err) => Err(err),
            ProbeOutcome::Pending | ProbeOutcome::Cancelled => Err(self.cancelled_error()),
        }
    }

    /// Current resolution without waiting.
    pub fn outcome(&self) -> ProbeOutcome {
        self.outcome.borrow().clone()
    }

    /// One probe, no retries and no threshold; fails if this single
    /// attempt does not see the server available.
    pub async fn check_once(&self) -> ReadinessResult<()> {
        if self.is_available().await {
            Ok(())
        } else {
            Err(ReadinessError::Unavailable {
                server: self.target.server.clone(),
                machine: self.target.machine.clone(),
            })
        }
    }

    /// Issue one network call and classify the response. Transport errors
    /// count as "not available" and are never returned.
    pub async fn is_available(&self) -> bool {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let response = self.transport.probe(&self.request).await;
        let result = self.target.interpreter.interpret(response);
        debug!(
            server = %self.target.server,
            machine = %self.target.machine,
            attempt,
            ?result,
            "probe attempt"
        );
        result.is_available()
    }

    /// Stop probing. Attempts already scheduled do not run and the outcome
    /// resolves to cancelled if it was still pending.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
        if self.resolve(ProbeOutcome::Cancelled) {
            debug!(server = %self.target.server, machine = %self.target.machine, "server probe cancelled");
        }
    }

    /// Network calls made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.state()
            .as_ref()
            .map(|s| s.consecutive_successes)
            .unwrap_or(0)
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn state(&self) -> MutexGuard<'_, Option<ProbeState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, delay: Duration) {
        self.scheduler
            .schedule(delay, self.cancel.subscribe(), self.clone().tick());
    }

    fn tick(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.is_cancelled() || !self.outcome.borrow().is_pending() {
                return;
            }
            let expired = self
                .state()
                .as_ref()
                .is_none_or(|s| s.expired(Instant::now()));
            if expired {
                self.expire();
                return;
            }

            let available = self.is_available().await;
            let result = if available {
                ProbeResult::Available
            } else {
                ProbeResult::Unavailable
            };
            let step = match self.state().as_mut() {
                Some(state) => state.record(result, Instant::now()),
                None => Step::Expired,
            };

            if self.is_cancelled() {
                return;
            }
            match step {
                Step::Succeeded => {
                    if self.resolve(ProbeOutcome::Succeeded) {
                        info!(
                            server = %self.target.server,
                            machine = %self.target.machine,
                            attempts = self.attempts(),
                            "server is available"
                        );
                    }
                }
                Step::Expired => self.expire(),
                Step::Retry => self.arm(self.config.period),
            }
        })
    }

    fn expire(&self) {
        let err = ReadinessError::ProbeTimeout {
            server: self.target.server.clone(),
            machine: self.target.machine.clone(),
        };
        if self.resolve(ProbeOutcome::Failed(err)) {
            warn!(
                server = %self.target.server,
                machine = %self.target.machine,
                attempts = self.attempts(),
                timeout = ?self.config.timeout,
                "server did not become available before its deadline"
            );
        }
    }

    /// Move out of `Pending` at most once. Returns whether this call did it.
    fn resolve(&self, outcome: ProbeOutcome) -> bool {
        self.outcome.send_if_modified(|current| {
            if current.is_pending() {
                *current = outcome;
                true
            } else {
                false
            }
        })
    }

    fn cancelled_error(&self) -> ReadinessError {
        ReadinessError::Cancelled {
            server: self.target.server.clone(),
            machine: self.target.machine.clone(),
        }
    }
}

impl std::fmt::Debug for ServerProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProbe")
            .field("server", &self.target.server)
            .field("machine", &self.target.machine)
            .field("uri", &self.target.uri)
            .field("outcome", &*self.outcome.borrow())
            .finish()
    }
}
