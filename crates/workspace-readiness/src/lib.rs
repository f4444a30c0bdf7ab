//! workspace-readiness — decides when the servers of a freshly started
//! workspace machine are reachable.
//!
//! For each machine, every declared server with a known liveness check is
//! probed until it answers positively `success_threshold` times in a row or
//! its deadline passes. The per-server outcomes are combined into one
//! result: ready once all servers are ready, failed as soon as one fails.
//!
//! # Architecture
//!
//! ```text
//! ReadinessFactory ──create──> MachineReadiness (one machine)
//!   │                            ├── LivenessPolicy (server ref → path, interpreter)
//!   ├── Transport (HttpTransport) ├── ServerProbe per checkable server
//!   ├── TokenProvider             │   ├── ProbeState (consecutive successes, deadline)
//!   └── Scheduler (bounded)       │   └── ProbeOutcomeInterpreter
//!                                 └── aggregate: all-succeed / first-failure
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use workspace_readiness::*;
//!
//! # async fn run() -> ReadinessResult<()> {
//! let factory = ReadinessFactory::new(
//!     Arc::new(HttpTransport::new()),
//!     Arc::new(NoToken),
//!     &ReadinessConfig::default(),
//! );
//! let identity = RuntimeIdentity::new("workspace-1", "default", "user-1");
//! let servers = vec![
//!     ServerDescriptor::new("wsagent/http", "http://10.0.0.5:4401/api"),
//!     ServerDescriptor::new("terminal", "ws://10.0.0.5:4411/pty"),
//! ];
//!
//! let checker = factory.create(&identity, "dev", servers)?;
//! checker.start_async(|server| println!("{server} is up"));
//! checker.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod interpreter;
pub mod policy;
pub mod probe;
pub mod scheduler;
pub mod transport;

pub use config::{ProbeConfig, ReadinessConfig};
pub use coordinator::{MachineReadiness, ReadinessFactory, ServerReadyCallback};
pub use error::{ReadinessError, ReadinessResult};
pub use interpreter::{ProbeOutcomeInterpreter, ProbeResult};
pub use policy::{LivenessEntry, LivenessPolicy, RuntimeIdentity, ServerDescriptor};
pub use probe::{ProbeOutcome, ProbeTarget, ServerProbe};
pub use scheduler::Scheduler;
pub use transport::{
    BoxFuture, HttpTransport, NoToken, ProbeRequest, StaticToken, TokenProvider, Transport,
};
