//! Liveness policy — which servers are checkable and where to probe them.
//!
//! Servers are identified by their reference (`wsagent/http`, `terminal`,
//! ...). Only references with an entry in the [`LivenessPolicy`] are
//! probed; every other server is skipped because it exposes no surface we
//! know how to check.

use std::collections::HashMap;

use http::Uri;
use http::uri::{PathAndQuery, Scheme};

use crate::error::{ReadinessError, ReadinessResult};
use crate::interpreter::ProbeOutcomeInterpreter;

/// Reference of the workspace agent HTTP server.
pub const WSAGENT_REFERENCE: &str = "wsagent/http";
/// Reference of the exec agent HTTP server.
pub const EXEC_AGENT_REFERENCE: &str = "exec-agent/http";
/// Reference of the terminal server.
pub const TERMINAL_REFERENCE: &str = "terminal";

/// Identity of the workspace runtime whose machines are checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeIdentity {
    pub workspace_id: String,
    pub env_name: String,
    pub owner_id: String,
}

impl RuntimeIdentity {
    pub fn new(
        workspace_id: impl Into<String>,
        env_name: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            env_name: env_name.into(),
            owner_id: owner_id.into(),
        }
    }
}

/// A server declared by a machine. Opaque attributes are carried through
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub url: String,
    pub attributes: HashMap<String, String>,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// How a checkable server is probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessEntry {
    /// Path that replaces the path of the server URL.
    pub path: String,
    pub interpreter: ProbeOutcomeInterpreter,
}

/// Mapping from server reference to liveness path and interpreter.
///
/// The default table covers the workspace agent, the exec agent and the
/// terminal; any reference without an entry is treated as an unknown kind
/// and never checked.
#[derive(Debug, Clone)]
pub struct LivenessPolicy {
    entries: HashMap<String, LivenessEntry>,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::empty()
            .with_entry(WSAGENT_REFERENCE, "/api/", ProbeOutcomeInterpreter::Standard)
            .with_entry(EXEC_AGENT_REFERENCE, "/process", ProbeOutcomeInterpreter::Standard)
            .with_entry(
                TERMINAL_REFERENCE,
                "/",
                ProbeOutcomeInterpreter::NoLivenessEndpoint,
            )
    }
}

impl LivenessPolicy {
    /// A policy that checks nothing.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register (or replace) the liveness entry for a server reference.
    pub fn with_entry(
        mut self,
        reference: impl Into<String>,
        path: impl Into<String>,
        interpreter: ProbeOutcomeInterpreter,
    ) -> Self {
        self.entries.insert(
            reference.into(),
            LivenessEntry {
                path: path.into(),
                interpreter,
            },
        );
        self
    }

    /// Liveness entry for a server, or `None` when it is not checkable.
    pub fn lookup(&self, reference: &str) -> Option<&LivenessEntry> {
        self.entries.get(reference)
    }

    pub fn is_checkable(&self, reference: &str) -> bool {
        self.entries.contains_key(reference)
    }
}

/// Build the URL a server is probed at.
///
/// `ws`/`wss` schemes are rewritten to `http`/`https`, the path is replaced
/// by the liveness path, and a non-empty token is passed, percent-encoded,
/// as the `token` query parameter.
pub fn probe_uri(server_url: &str, liveness_path: &str, token: &str) -> ReadinessResult<Uri> {
    let malformed = |reason: &str| {
        ReadinessError::Internal(format!("malformed server URL '{server_url}': {reason}"))
    };

    let uri: Uri = server_url
        .parse()
        .map_err(|e: http::uri::InvalidUri| malformed(&e.to_string()))?;
    let scheme = uri.scheme_str().ok_or_else(|| malformed("missing scheme"))?;
    let authority = uri
        .authority()
        .cloned()
        .ok_or_else(|| malformed("missing host"))?;

    let scheme = match scheme {
        "ws" => Scheme::HTTP,
        "wss" => Scheme::HTTPS,
        other => other
            .parse::<Scheme>()
            .map_err(|e| malformed(&e.to_string()))?,
    };

    let path = if liveness_path.starts_with('/') {
        liveness_path.to_string()
    } else {
        format!("/{liveness_path}")
    };
    let path_and_query = if token.is_empty() {
        path
    } else {
        format!("{path}?token={}", urlencoding::encode(token))
    };
    let path_and_query: PathAndQuery = path_and_query
        .parse()
        .map_err(|e: http::uri::InvalidUri| malformed(&e.to_string()))?;

    Uri::builder()
        .scheme(scheme)
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| malformed(&e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_covers_agents_and_terminal() {
        let policy = LivenessPolicy::default();

        let wsagent = policy.lookup(WSAGENT_REFERENCE).unwrap();
        assert_eq!(wsagent.path, "/api/");
        assert_eq!(wsagent.interpreter, ProbeOutcomeInterpreter::Standard);

        let exec = policy.lookup(EXEC_AGENT_REFERENCE).unwrap();
        assert_eq!(exec.path, "/process");

        let terminal = policy.lookup(TERMINAL_REFERENCE).unwrap();
        assert_eq!(terminal.interpreter, ProbeOutcomeInterpreter::NoLivenessEndpoint);

        assert!(!policy.is_checkable("unknown/proto"));
    }

    #[test]
    fn extra_entries_can_be_registered() {
        let policy = LivenessPolicy::default().with_entry(
            "ls/http",
            "/health",
            ProbeOutcomeInterpreter::Standard,
        );
        assert!(policy.is_checkable("ls/http"));
        assert!(LivenessPolicy::empty().lookup(WSAGENT_REFERENCE).is_none());
    }

    #[test]
    fn websocket_scheme_is_rewritten_and_path_replaced() {
        let uri = probe_uri("ws://10.0.0.5:4411/pty", "/", "").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.5:4411/");

        let uri = probe_uri("wss://term.example.com/pty", "/", "").unwrap();
        assert_eq!(uri.scheme_str(), Some("https"));
    }

    #[test]
    fn token_is_passed_as_query() {
        let uri = probe_uri("http://10.0.0.5:4401/api", "/api/", "abc123").unwrap();
        assert_eq!(uri.to_string(), "http://10.0.0.5:4401/api/?token=abc123");
    }

    #[test]
    fn token_is_percent_encoded() {
        let uri = probe_uri("http://h:1/api", "/api/", "a b").unwrap();
        assert_eq!(uri.to_string(), "http://h:1/api/?token=a%20b");

        let uri = probe_uri("http://h:1/api", "/api/", "a&admin=1").unwrap();
        assert_eq!(uri.query(), Some("token=a%26admin%3D1"));

        let uri = probe_uri("http://h:1/api", "/api/", "x+y/z").unwrap();
        assert_eq!(uri.query(), Some("token=x%2By%2Fz"));
    }

    #[test]
    fn existing_query_is_dropped() {
        let uri = probe_uri("http://host:4412/connect?x=1", "process", "").unwrap();
        assert_eq!(uri.to_string(), "http://host:4412/process");
    }

    #[test]
    fn malformed_urls_are_internal_errors() {
        for bad in ["not a url", "/relative/only", "localhost"] {
            let err = probe_uri(bad, "/", "").unwrap_err();
            assert!(!err.is_infrastructure(), "{bad}: {err}");
        }
    }
}
