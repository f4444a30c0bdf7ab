//! Probe outcome interpretation.
//!
//! Turns the raw status code of a probe response into a success or
//! failure verdict. Which interpreter applies is decided per server kind
//! by the [`LivenessPolicy`](crate::policy::LivenessPolicy).

use std::io;

use tracing::debug;

/// Result of a single probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The interpreter accepted the response status.
    Available,
    /// The server answered, but with a status the interpreter rejects.
    Unavailable,
    /// The probe could not be executed (connection refused, reset, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_available(self) -> bool {
        self == ProbeResult::Available
    }
}

/// Decides whether a response status means the server is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeOutcomeInterpreter {
    /// Any status in `[200, 400)` is success.
    #[default]
    Standard,
    /// Only `404` is success.
    ///
    /// For servers without a readiness route: once the HTTP listener is up
    /// they reliably answer "not found", which is itself the signal.
    NoLivenessEndpoint,
}

impl ProbeOutcomeInterpreter {
    /// Classify a response status code.
    pub fn classify(self, status: u16) -> ProbeResult {
        let ok = match self {
            Self::Standard => (200..400).contains(&status),
            Self::NoLivenessEndpoint => status == 404,
        };
        if ok {
            ProbeResult::Available
        } else {
            ProbeResult::Unavailable
        }
    }

    /// Classify the outcome of a transport call. I/O errors never escape:
    /// they are an expected condition while a server is still starting.
    pub fn interpret(self, response: io::Result<u16>) -> ProbeResult {
        match response {
            Ok(status) => self.classify(status),
            Err(e) => {
                debug!(error = %e, "probe transport error");
                ProbeResult::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_accepts_2xx_and_3xx() {
        let i = ProbeOutcomeInterpreter::Standard;
        for status in [200, 204, 301, 302, 399] {
            assert_eq!(i.classify(status), ProbeResult::Available, "{status}");
        }
    }

    #[test]
    fn standard_rejects_4xx_and_5xx() {
        let i = ProbeOutcomeInterpreter::Standard;
        for status in [100, 199, 400, 404, 500, 503] {
            assert_eq!(i.classify(status), ProbeResult::Unavailable, "{status}");
        }
    }

    #[test]
    fn no_liveness_endpoint_accepts_only_404() {
        let i = ProbeOutcomeInterpreter::NoLivenessEndpoint;
        assert_eq!(i.classify(404), ProbeResult::Available);
        for status in [200, 302, 500, 503] {
            assert_eq!(i.classify(status), ProbeResult::Unavailable, "{status}");
        }
    }

    #[test]
    fn io_errors_are_failed_not_raised() {
        let i = ProbeOutcomeInterpreter::Standard;
        let refused = Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(i.interpret(refused), ProbeResult::Failed);
        assert!(!i.interpret(Err(io::ErrorKind::TimedOut.into())).is_available());
        assert!(i.interpret(Ok(200)).is_available());
    }
}
