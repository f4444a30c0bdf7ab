//! Probe transport and token collaborators.
//!
//! A [`Transport`] performs exactly one network call per probe attempt and
//! reports the response status. It never retries; retry policy belongs to
//! [`ServerProbe`](crate::probe::ServerProbe). [`HttpTransport`] is the
//! built-in HTTP/1.1 implementation on hyper.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http::header::{AUTHORIZATION, HOST, USER_AGENT};
use http_body_util::Empty;
use tracing::debug;

/// Boxed future returned by object-safe collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One outbound probe: target and bounds on the network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub uri: Uri,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Machine token, if the workspace has one.
    pub token: Option<String>,
}

/// Performs a single probe and returns the response status code.
pub trait Transport: Send + Sync {
    fn probe<'a>(&'a self, request: &'a ProbeRequest) -> BoxFuture<'a, io::Result<u16>>;
}

/// Issues the per-workspace token used to decorate probe requests.
pub trait TokenProvider: Send + Sync {
    fn token(&self, workspace_id: &str) -> anyhow::Result<String>;
}

impl<F> TokenProvider for F
where
    F: Fn(&str) -> anyhow::Result<String> + Send + Sync,
{
    fn token(&self, workspace_id: &str) -> anyhow::Result<String> {
        self(workspace_id)
    }
}

/// Token provider for deployments without machine authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenProvider for NoToken {
    fn token(&self, _workspace_id: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

/// Token provider returning the same token for every workspace.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    fn token(&self, _workspace_id: &str) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Plain HTTP/1.1 transport: one TCP connection and one `GET` per probe.
///
/// Only `http` URIs are supported; TLS belongs to a custom transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpTransport;

impl HttpTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for HttpTransport {
    fn probe<'a>(&'a self, request: &'a ProbeRequest) -> BoxFuture<'a, io::Result<u16>> {
        Box::pin(http_get_status(request))
    }
}

async fn http_get_status(request: &ProbeRequest) -> io::Result<u16> {
    let uri = &request.uri;
    if uri.scheme_str() != Some("http") {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("unsupported probe scheme in '{uri}'"),
        ));
    }
    let authority = uri
        .authority()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "probe URI has no host"))?;
    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    let port = authority.port_u16().unwrap_or(80);

    let stream = tokio::time::timeout(
        request.connect_timeout,
        tokio::net::TcpStream::connect((host, port)),
    )
    .await
    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "probe connect timed out"))??;

    let exchange = async {
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(io::Error::other)?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let mut builder = http::Request::builder()
            .method(http::Method::GET)
            .uri(target)
            .header(HOST, authority.as_str())
            .header(USER_AGENT, "workspace-readiness/0.1");
        if let Some(token) = request.token.as_deref().filter(|t| !t.is_empty()) {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(io::Error::other)?;

        let resp = sender.send_request(req).await.map_err(io::Error::other)?;
        Ok::<_, io::Error>(resp.status().as_u16())
    };

    let status = tokio::time::timeout(request.read_timeout, exchange)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "probe response timed out"))??;
    debug!(%uri, status, "probe response");
    Ok(status)
}
