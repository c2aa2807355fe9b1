//! Failure injection tests for the bridge.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{duplex, AsyncWriteExt, BufReader};

use socks_rpc_bridge::config::{BridgeConfig, TransportMode};
use socks_rpc_bridge::{Bridge, BridgeError, ErrorKind, RunOutcome, Shutdown};

mod common;
use common::next_line;

const WAIT: Duration = Duration::from_secs(5);

fn config(proxy_url: String, server_url: String, transport: TransportMode) -> Arc<BridgeConfig> {
    let mut config = BridgeConfig::default();
    config.proxy.url = proxy_url;
    config.server.url = server_url;
    config.server.transport = transport;
    config.timeouts.request = Duration::from_secs(3);
    config.timeouts.detect = Duration::from_secs(1);
    Arc::new(config)
}

/// Run a bridge with no input and return how it ended.
async fn run_once(bridge: Bridge) -> Result<RunOutcome, BridgeError> {
    let (_input, bridge_in) = duplex(1024);
    let (bridge_out, _output) = duplex(1024);
    let shutdown = Shutdown::new();
    tokio::time::timeout(WAIT, bridge.run(bridge_in, bridge_out, &shutdown))
        .await
        .expect("bridge did not finish")
}

#[tokio::test]
async fn unreachable_proxy_is_a_proxy_error() {
    let proxy_addr = common::unused_addr().await;
    let bridge = Bridge::new(config(
        format!("socks5://{}", proxy_addr),
        "http://127.0.0.1:9/sse".into(),
        TransportMode::Sse,
    ));

    let err = run_once(bridge).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProxyConnection);
    assert!(err.kind().remediation().unwrap().contains("SOCKS proxy"));
}

#[tokio::test]
async fn unreachable_proxy_in_auto_mode_is_still_a_proxy_error() {
    let proxy_addr = common::unused_addr().await;
    let bridge = Bridge::new(config(
        format!("socks5://{}", proxy_addr),
        "http://127.0.0.1:9/mcp".into(),
        TransportMode::Auto,
    ));

    let err = run_once(bridge).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProxyConnection);
}

#[tokio::test]
async fn rejected_credentials_are_a_proxy_error() {
    let server = common::start_rpc_server().await;
    let proxy = common::start_socks5_proxy(server.addr, Some(("alice", "right"))).await;
    let bridge = Bridge::new(config(
        format!("socks5://alice:wrong@{}", proxy.addr),
        server.url(),
        TransportMode::Streamable,
    ));

    let err = run_once(bridge).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProxyConnection);
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn proxy_refusing_the_tunnel_is_a_proxy_error() {
    let dead_upstream = common::unused_addr().await;
    let proxy = common::start_socks5_proxy(dead_upstream, None).await;
    let bridge = Bridge::new(config(
        proxy.url("socks5"),
        format!("http://{}/sse", dead_upstream),
        TransportMode::Sse,
    ));

    let err = run_once(bridge).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProxyConnection);
    assert_eq!(proxy.targets(), vec![dead_upstream.to_string()]);
}

#[tokio::test]
async fn missing_stream_endpoint_is_a_remote_error() {
    let server = common::start_status_server("404 Not Found", "no such endpoint").await;
    let proxy = common::start_socks5_proxy(server, None).await;
    let bridge = Bridge::new(config(
        proxy.url("socks5"),
        format!("http://{}/sse", server),
        TransportMode::Sse,
    ));

    let err = run_once(bridge).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteConnection);
    let message = err.to_string();
    assert!(message.contains("404"), "{}", message);
    assert!(message.contains("no such endpoint"), "{}", message);
}

#[tokio::test]
async fn wrong_content_type_is_a_remote_error() {
    let server = common::start_status_server("200 OK", "<html></html>").await;
    let proxy = common::start_socks5_proxy(server, None).await;
    let bridge = Bridge::new(config(
        proxy.url("socks5"),
        format!("http://{}/sse", server),
        TransportMode::Sse,
    ));

    let err = run_once(bridge).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteConnection);
    assert!(err.to_string().contains("text/plain"));
}

#[tokio::test]
async fn failed_send_answers_with_error_and_keeps_running() {
    let server = common::start_rpc_server().await;
    let proxy = common::start_socks5_proxy(server.addr, None).await;
    let bridge = Bridge::new(config(
        proxy.url("socks5"),
        server.url(),
        TransportMode::Streamable,
    ));

    let (mut input, bridge_in) = duplex(64 * 1024);
    let (bridge_out, output) = duplex(64 * 1024);
    let mut output = BufReader::new(output);
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let handle =
        tokio::spawn(async move { bridge.run(bridge_in, bridge_out, &run_shutdown).await });

    input
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"explode\"}\n")
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&next_line(&mut output, WAIT).await).unwrap();
    assert_eq!(reply["jsonrpc"], "2.0");
    assert_eq!(reply["id"], 9);
    assert_eq!(reply["error"]["code"], -32000);
    assert!(reply["error"]["message"].as_str().unwrap().contains("500"));

    input
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":10,\"method\":\"ping\"}\n")
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&next_line(&mut output, WAIT).await).unwrap();
    assert_eq!(reply["id"], 10);
    assert!(reply.get("error").is_none());

    shutdown.trigger();
    let outcome = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
}

#[tokio::test]
async fn remote_stream_end_is_fatal() {
    let server = common::start_sse_server().await;
    let proxy = common::start_socks5_proxy(server.addr, None).await;
    let bridge = Bridge::new(config(proxy.url("socks5"), server.url(), TransportMode::Sse));

    let (mut input, bridge_in) = duplex(64 * 1024);
    let (bridge_out, output) = duplex(64 * 1024);
    let mut output = BufReader::new(output);
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let handle =
        tokio::spawn(async move { bridge.run(bridge_in, bridge_out, &run_shutdown).await });

    input
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
        .await
        .unwrap();
    next_line(&mut output, WAIT).await;

    server.end_stream().await;
    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamClosed);
    assert!(err.kind().is_fatal());
}

#[tokio::test]
async fn shutdown_during_hanging_connect_returns_promptly() {
    // A listener that accepts and never answers the SOCKS greeting.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let bridge = Bridge::new(config(
        format!("socks5://{}", proxy_addr),
        "http://127.0.0.1:9/sse".into(),
        TransportMode::Sse,
    ));
    let (_input, bridge_in) = duplex(1024);
    let (bridge_out, _output) = duplex(1024);
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let handle =
        tokio::spawn(async move { bridge.run(bridge_in, bridge_out, &run_shutdown).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.trigger();
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("shutdown did not interrupt connect")
        .unwrap();
    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
}

#[tokio::test]
async fn shutdown_during_pending_send_returns_promptly() {
    let server = common::start_rpc_server().await;
    let proxy = common::start_socks5_proxy(server.addr, None).await;
    let bridge = Bridge::new(config(
        proxy.url("socks5"),
        server.url(),
        TransportMode::Streamable,
    ));

    let (mut input, bridge_in) = duplex(64 * 1024);
    let (bridge_out, _output) = duplex(64 * 1024);
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let handle =
        tokio::spawn(async move { bridge.run(bridge_in, bridge_out, &run_shutdown).await });

    input
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"stall\"}\n")
        .await
        .unwrap();
    tokio::time::timeout(WAIT, async {
        while server.posts().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("send never reached the server");

    shutdown.trigger();
    let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("shutdown did not interrupt the pending send")
        .unwrap();
    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
    assert_eq!(server.posts().len(), 1);
}

#[tokio::test]
async fn oversized_reply_answers_with_error() {
    let server = common::start_rpc_server().await;
    let proxy = common::start_socks5_proxy(server.addr, None).await;
    let mut settings = BridgeConfig::clone(&config(
        proxy.url("socks5"),
        server.url(),
        TransportMode::Streamable,
    ));
    settings.relay.max_line_bytes = 64;
    let bridge = Bridge::new(Arc::new(settings));

    let (mut input, bridge_in) = duplex(64 * 1024);
    let (bridge_out, output) = duplex(64 * 1024);
    let mut output = BufReader::new(output);
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let handle =
        tokio::spawn(async move { bridge.run(bridge_in, bridge_out, &run_shutdown).await });

    input
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}\n")
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&next_line(&mut output, WAIT).await).unwrap();
    assert_eq!(reply["id"], 3);
    assert_eq!(reply["error"]["code"], -32000);
    assert!(reply["error"]["message"]
        .as_str()
        .unwrap()
        .contains("exceeds 64 bytes"));

    shutdown.trigger();
    let outcome = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
}

#[tokio::test]
async fn unterminated_event_past_the_limit_is_fatal() {
    let server = common::start_sse_server().await;
    let proxy = common::start_socks5_proxy(server.addr, None).await;
    let mut settings =
        BridgeConfig::clone(&config(proxy.url("socks5"), server.url(), TransportMode::Sse));
    settings.relay.max_line_bytes = 1024;
    let bridge = Bridge::new(Arc::new(settings));

    let (mut input, bridge_in) = duplex(64 * 1024);
    let (bridge_out, output) = duplex(64 * 1024);
    let mut output = BufReader::new(output);
    let shutdown = Shutdown::new();
    let run_shutdown = shutdown.clone();
    let handle =
        tokio::spawn(async move { bridge.run(bridge_in, bridge_out, &run_shutdown).await });

    input
        .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
        .await
        .unwrap();
    next_line(&mut output, WAIT).await;

    // Complete data lines, but never the blank line that ends the event.
    let line = format!("data: {}\n", "x".repeat(200));
    for _ in 0..10 {
        server.push_raw(&line).await;
    }

    let result = tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamClosed);
    assert!(err.to_string().contains("exceeds 1024 bytes"), "{}", err);
}
