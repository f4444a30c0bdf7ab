//! Readiness error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while checking the servers of a machine.
///
/// Errors are `Clone` so that one recorded failure cause can be handed to
/// every waiter of a probe or aggregate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadinessError {
    /// A single server did not reach its success threshold before its deadline.
    #[error("server '{server}' in machine '{machine}' not available")]
    ProbeTimeout { server: String, machine: String },

    /// The overall wait for a machine elapsed before every server resolved.
    #[error("servers of machine '{machine}' did not become available in {timeout:?}")]
    AggregateTimeout { machine: String, timeout: Duration },

    /// A one-shot check observed the server as unavailable.
    #[error("server '{server}' in machine '{machine}' is not available")]
    Unavailable { server: String, machine: String },

    /// The probe was cancelled before it resolved.
    #[error("check of server '{server}' in machine '{machine}' was cancelled")]
    Cancelled { server: String, machine: String },

    /// Unexpected failure: broken configuration, collaborator error, panicked task.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReadinessError {
    /// Wrap an arbitrary error into the internal kind, keeping its cause chain.
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(format!("{:#}", err.into()))
    }

    /// Whether this is an expected infrastructure failure (slow or
    /// unreachable servers) rather than an internal one.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

pub type ReadinessResult<T> = Result<T, ReadinessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_timeout_names_server_and_machine() {
        let err = ReadinessError::ProbeTimeout {
            server: "wsagent/http".to_string(),
            machine: "dev".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server 'wsagent/http' in machine 'dev' not available"
        );
        assert!(err.is_infrastructure());
    }

    #[test]
    fn internal_keeps_cause_chain() {
        let err = ReadinessError::internal(
            anyhow::anyhow!("connection refused").context("token service unreachable"),
        );
        assert_eq!(
            err.to_string(),
            "internal error: token service unreachable: connection refused"
        );
        assert!(!err.is_infrastructure());
    }
}
