//! Machine readiness — probes every checkable server of one machine and
//! combines their outcomes.
//!
//! The aggregate succeeds only once every probe has succeeded and fails as
//! soon as any probe fails, whichever comes first. On failure the
//! remaining probes are cancelled so no further retries are scheduled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{ProbeConfig, ReadinessConfig};
use crate::error::{ReadinessError, ReadinessResult};
use crate::policy::{LivenessPolicy, RuntimeIdentity, ServerDescriptor, probe_uri};
use crate::probe::{ProbeTarget, ServerProbe};
use crate::scheduler::Scheduler;
use crate::transport::{TokenProvider, Transport};

/// Callback invoked with the server reference each time a server becomes
/// available.
pub type ServerReadyCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Combined resolution of all probes of a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AggregateOutcome {
    Pending,
    Ready,
    Failed(ReadinessError),
}

impl AggregateOutcome {
    fn is_pending(&self) -> bool {
        matches!(self, AggregateOutcome::Pending)
    }
}

/// Builds [`MachineReadiness`] checkers sharing one transport, token
/// provider, scheduler and configuration.
#[derive(Clone)]
pub struct ReadinessFactory {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    scheduler: Scheduler,
    policy: LivenessPolicy,
    probe_config: ProbeConfig,
    timeout_per_server: Duration,
}

impl ReadinessFactory {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        config: &ReadinessConfig,
    ) -> Self {
        Self {
            transport,
            tokens,
            scheduler: Scheduler::new(config.max_concurrent_probes()),
            policy: LivenessPolicy::default(),
            probe_config: config.probe_config(),
            timeout_per_server: config.aggregate_timeout_per_server(),
        }
    }

    /// Share an existing scheduler instead of the one built from config.
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_policy(mut self, policy: LivenessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// Create the checker for one machine.
    ///
    /// Servers without a liveness entry are skipped. The workspace token is
    /// fetched once here. A token provider failure or a malformed server
    /// URL is an internal error.
    pub fn create(
        &self,
        identity: &RuntimeIdentity,
        machine: &str,
        servers: impl IntoIterator<Item = ServerDescriptor>,
    ) -> ReadinessResult<MachineReadiness> {
        let token = self
            .tokens
            .token(&identity.workspace_id)
            .map_err(|e| {
                let err = ReadinessError::internal(e.context(format!(
                    "failed to obtain machine token for workspace '{}'",
                    identity.workspace_id
                )));
                error!(%machine, error = %err, "cannot create readiness checker");
                err
            })?;

        let mut probes = Vec::new();
        for server in servers {
            let Some(entry) = self.policy.lookup(&server.name) else {
                debug!(%machine, server = %server.name, "server has no liveness check, skipping");
                continue;
            };
            let uri = probe_uri(&server.url, &entry.path, &token)?;
            let target = ProbeTarget {
                server: server.name.clone(),
                machine: machine.to_string(),
                uri,
                token: (!token.is_empty()).then(|| token.clone()),
                interpreter: entry.interpreter,
            };
            probes.push(ServerProbe::new(
                target,
                self.probe_config,
                self.transport.clone(),
                self.scheduler.clone(),
            ));
        }

        Ok(MachineReadiness {
            identity: identity.clone(),
            machine: machine.to_string(),
            probes,
            timeout_per_server: self.timeout_per_server,
            started: AtomicBool::new(false),
            outcome: Arc::new(watch::Sender::new(AggregateOutcome::Pending)),
        })
    }
}

/// Readiness check of all checkable servers of one machine.
pub struct MachineReadiness {
    identity: RuntimeIdentity,
    machine: String,
    /// In declaration order.
    probes: Vec<Arc<ServerProbe>>,
    timeout_per_server: Duration,
    started: AtomicBool,
    outcome: Arc<watch::Sender<AggregateOutcome>>,
}

impl MachineReadiness {
    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn identity(&self) -> &RuntimeIdentity {
        &self.identity
    }

    /// References of the servers that are checked, in declaration order.
    pub fn servers(&self) -> Vec<&str> {
        self.probes.iter().map(|p| p.server()).collect()
    }

    /// Probe of one checked server.
    pub fn probe(&self, server: &str) -> Option<&Arc<ServerProbe>> {
        self.probes.iter().find(|p| p.server() == server)
    }

    /// Overall wait used by [`wait`](Self::wait): the per-server timeout
    /// times the number of checked servers.
    pub fn default_timeout(&self) -> Duration {
        let servers = u32::try_from(self.probes.len()).unwrap_or(u32::MAX);
        self.timeout_per_server.saturating_mul(servers)
    }

    /// Start every probe and return immediately.
    ///
    /// `on_ready` is called once per server as it becomes available. Calling
    /// this more than once has no effect. Must be called from within a
    /// tokio runtime.
    pub fn start_async<F>(&self, on_ready: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            machine = %self.machine,
            workspace_id = %self.identity.workspace_id,
            servers = self.probes.len(),
            "checking machine servers"
        );
        if self.probes.is_empty() {
            resolve(&self.outcome, AggregateOutcome::Ready);
            return;
        }

        let on_ready: ServerReadyCallback = Arc::new(on_ready);
        let remaining = Arc::new(AtomicUsize::new(self.probes.len()));
        let probes: Arc<[Arc<ServerProbe>]> = self.probes.clone().into();

        for probe in self.probes.iter().cloned() {
            let outcome = self.outcome.clone();
            let on_ready = on_ready.clone();
            let remaining = remaining.clone();
            let probes = probes.clone();
            let machine = self.machine.clone();
            let watched = probe.clone();

            tokio::spawn(async move {
                match watched.await_outcome().await {
                    Ok(server) => {
                        if !outcome.borrow().is_pending() {
                            return;
                        }
                        let handled = panic::catch_unwind(AssertUnwindSafe(|| on_ready(&server)));
                        if handled.is_err() {
                            let err = ReadinessError::Internal(format!(
                                "server-ready handler panicked for server '{server}' in machine '{machine}'"
                            ));
                            if resolve(&outcome, AggregateOutcome::Failed(err.clone())) {
                                error!(%machine, %server, error = %err, "server-ready handler panicked");
                                for other in probes.iter() {
                                    other.cancel();
                                }
                            }
                            return;
                        }
                        if remaining.fetch_sub(1, Ordering::SeqCst) == 1
                            && resolve(&outcome, AggregateOutcome::Ready)
                        {
                            info!(%machine, "all machine servers are available");
                        }
                    }
                    Err(err) => {
                        if resolve(&outcome, AggregateOutcome::Failed(err.clone())) {
                            warn!(%machine, error = %err, "machine servers check failed");
                            for other in probes.iter() {
                                other.cancel();
                            }
                        }
                    }
                }
            });
            probe.start();
        }
    }

    /// Wait for the aggregate using [`default_timeout`](Self::default_timeout).
    pub async fn wait(&self) -> ReadinessResult<()> {
        self.wait_timeout(self.default_timeout()).await
    }

    /// Wait until every server is available, a probe fails, or `timeout`
    /// elapses. An elapsed wait fails the aggregate and cancels its probes.
    pub async fn wait_timeout(&self, timeout: Duration) -> ReadinessResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(ReadinessError::Internal(format!(
                "servers check of machine '{}' was not started",
                self.machine
            )));
        }

        if self.probes.is_empty() {
            return Ok(());
        }

        let mut rx = self.outcome.subscribe();
        let waited = tokio::time::timeout(timeout, async {
            match rx.wait_for(|o| !o.is_pending()).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => AggregateOutcome::Failed(ReadinessError::Internal(format!(
                    "servers check of machine '{}' was dropped",
                    self.machine
                ))),
            }
        })
        .await;

        let outcome = match waited {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = ReadinessError::AggregateTimeout {
                    machine: self.machine.clone(),
                    timeout,
                };
                if resolve(&self.outcome, AggregateOutcome::Failed(err.clone())) {
                    warn!(machine = %self.machine, ?timeout, "machine servers check timed out");
                    self.cancel();
                }
                self.outcome.borrow().clone()
            }
        };

        match outcome {
            AggregateOutcome::Ready => Ok(()),
            AggregateOutcome::Failed(err) if err.is_infrastructure() => Err(err),
            AggregateOutcome::Failed(err) => {
                error!(machine = %self.machine, error = %err, "unexpected error while checking servers");
                Err(err)
            }
            AggregateOutcome::Pending => Err(ReadinessError::Internal(format!(
                "servers check of machine '{}' did not resolve",
                self.machine
            ))),
        }
    }

    /// Check every server exactly once, in declaration order, stopping at
    /// the first one that is not available.
    pub async fn check_once<F>(&self, on_ready: F) -> ReadinessResult<()>
    where
        F: Fn(&str),
    {
        for probe in &self.probes {
            probe.check_once().await?;
            on_ready(probe.server());
        }
        Ok(())
    }

    /// Cancel every probe of this machine.
    pub fn cancel(&self) {
        for probe in &self.probes {
            probe.cancel();
        }
    }
}

impl Drop for MachineReadiness {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for MachineReadiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineReadiness")
            .field("machine", &self.machine)
            .field("workspace_id", &self.identity.workspace_id)
            .field("servers", &self.servers())
            .finish()
    }
}

/// Resolve the aggregate at most once. Returns whether this call did it.
fn resolve(outcome: &watch::Sender<AggregateOutcome>, value: AggregateOutcome) -> bool {
    outcome.send_if_modified(|current| {
        if current.is_pending() {
            *current = value;
            true
        } else {
            false
        }
    })
}
