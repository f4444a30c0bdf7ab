//! End-to-end readiness checks over real HTTP.
//!
//! Spins up minimal local HTTP listeners standing in for a workspace agent
//! and a terminal, then drives `MachineReadiness` with `HttpTransport`.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use workspace_readiness::*;

/// Start a listener answering every request with `status`. Returns its
/// address and the request heads it has received.
async fn fake_server(status: u16) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));

    let seen = heads.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buf).into_owned());
                let response = format!(
                    "HTTP/1.1 {status} Status\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, heads)
}

fn fast_config() -> ReadinessConfig {
    ReadinessConfig {
        period: Some("100ms".to_string()),
        timeout: Some("5s".to_string()),
        connect_timeout: Some("1s".to_string()),
        read_timeout: Some("1s".to_string()),
        ..Default::default()
    }
}

fn identity() -> RuntimeIdentity {
    RuntimeIdentity::new("workspace-1", "default", "user-1")
}

#[tokio::test]
async fn http_transport_reports_status() {
    let (addr, heads) = fake_server(204).await;
    let request = ProbeRequest {
        uri: format!("http://{addr}/api/?token=abc").parse().unwrap(),
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(1),
        token: Some("abc".to_string()),
    };

    let status = HttpTransport::new().probe(&request).await.unwrap();
    assert_eq!(status, 204);

    let heads = heads.lock().unwrap();
    assert!(heads[0].starts_with("GET /api/?token=abc HTTP/1.1"));
    assert!(heads[0].to_ascii_lowercase().contains("authorization: bearer abc"));
}

#[tokio::test]
async fn agent_and_terminal_become_ready() {
    let (agent, agent_heads) = fake_server(200).await;
    let (terminal, _) = fake_server(404).await;

    let factory = ReadinessFactory::new(
        Arc::new(HttpTransport::new()),
        Arc::new(StaticToken("machine-token".to_string())),
        &fast_config(),
    );
    let checker = factory
        .create(
            &identity(),
            "dev",
            vec![
                ServerDescriptor::new("wsagent/http", format!("http://{agent}/api")),
                ServerDescriptor::new("terminal", format!("ws://{terminal}/pty")),
                ServerDescriptor::new("unknown/proto", "http://127.0.0.1:1/"),
            ],
        )
        .unwrap();

    let ready = Arc::new(Mutex::new(Vec::new()));
    let sink = ready.clone();
    checker.start_async(move |server| sink.lock().unwrap().push(server.to_string()));
    checker.wait_timeout(Duration::from_secs(10)).await.unwrap();

    let mut ready = ready.lock().unwrap().clone();
    ready.sort();
    assert_eq!(ready, vec!["terminal", "wsagent/http"]);
    assert!(agent_heads.lock().unwrap()[0].starts_with("GET /api/?token=machine-token"));
}

#[tokio::test]
async fn unreachable_server_times_out() {
    // Bind then drop to get a port that refuses connections.
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let config = ReadinessConfig {
        timeout: Some("300ms".to_string()),
        ..fast_config()
    };
    let factory = ReadinessFactory::new(Arc::new(HttpTransport::new()), Arc::new(NoToken), &config);
    let checker = factory
        .create(
            &identity(),
            "dev",
            vec![ServerDescriptor::new("exec-agent/http", format!("http://{closed}/"))],
        )
        .unwrap();

    checker.start_async(|_| {});
    let err = checker.wait().await.unwrap_err();
    assert_eq!(
        err,
        ReadinessError::ProbeTimeout {
            server: "exec-agent/http".to_string(),
            machine: "dev".to_string(),
        }
    );
}

#[tokio::test]
async fn terminal_answering_200_is_not_ready_for_check_once() {
    let (terminal, _) = fake_server(200).await;

    let factory = ReadinessFactory::new(Arc::new(HttpTransport::new()), Arc::new(NoToken), &fast_config());
    let checker = factory
        .create(
            &identity(),
            "dev",
            vec![ServerDescriptor::new("terminal", format!("ws://{terminal}/pty"))],
        )
        .unwrap();

    let err = checker.check_once(|_| {}).await.unwrap_err();
    assert!(matches!(err, ReadinessError::Unavailable { .. }));
}
