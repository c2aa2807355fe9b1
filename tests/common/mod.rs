//! Shared mock servers for integration tests.
//!
//! Everything speaks raw TCP so the tests exercise the bridge's own SOCKS5
//! and HTTP client code against independent implementations.

#![allow(dead_code)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use socks_rpc_bridge::net::Resolve;

// ---------------------------------------------------------------------------
// SOCKS5 proxy
// ---------------------------------------------------------------------------

/// A SOCKS5 proxy that records every CONNECT target and forwards all of them
/// to one fixed upstream address.
pub struct MockProxy {
    pub addr: SocketAddr,
    targets: Arc<Mutex<Vec<String>>>,
}

impl MockProxy {
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }

    pub fn url(&self, scheme: &str) -> String {
        format!("{}://{}", scheme, self.addr)
    }
}

pub async fn start_socks5_proxy(
    upstream: SocketAddr,
    credentials: Option<(&'static str, &'static str)>,
) -> MockProxy {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let targets = Arc::new(Mutex::new(Vec::new()));

    let recorded = targets.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let _ = proxy_connection(socket, upstream, credentials, recorded).await;
            });
        }
    });

    MockProxy { addr, targets }
}

async fn proxy_connection(
    mut client: TcpStream,
    upstream: SocketAddr,
    credentials: Option<(&'static str, &'static str)>,
    targets: Arc<Mutex<Vec<String>>>,
) -> io::Result<()> {
    let mut header = [0u8; 2];
    client.read_exact(&mut header).await?;
    let mut methods = vec![0u8; header[1] as usize];
    client.read_exact(&mut methods).await?;

    match credentials {
        Some((user, pass)) => {
            if !methods.contains(&0x02) {
                client.write_all(&[0x05, 0xFF]).await?;
                return Ok(());
            }
            client.write_all(&[0x05, 0x02]).await?;

            let mut ver_len = [0u8; 2];
            client.read_exact(&mut ver_len).await?;
            let mut username = vec![0u8; ver_len[1] as usize];
            client.read_exact(&mut username).await?;
            let mut plen = [0u8; 1];
            client.read_exact(&mut plen).await?;
            let mut password = vec![0u8; plen[0] as usize];
            client.read_exact(&mut password).await?;

            if username != user.as_bytes() || password != pass.as_bytes() {
                client.write_all(&[0x01, 0x01]).await?;
                return Ok(());
            }
            client.write_all(&[0x01, 0x00]).await?;
        }
        None => client.write_all(&[0x05, 0x00]).await?,
    }

    let mut request = [0u8; 4];
    client.read_exact(&mut request).await?;
    let host = match request[3] {
        0x01 => {
            let mut octets = [0u8; 4];
            client.read_exact(&mut octets).await?;
            IpAddr::V4(Ipv4Addr::from(octets)).to_string()
        }
        0x04 => {
            let mut octets = [0u8; 16];
            client.read_exact(&mut octets).await?;
            format!("[{}]", Ipv6Addr::from(octets))
        }
        0x03 => {
            let mut len = [0u8; 1];
            client.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            client.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        _ => return Ok(()),
    };
    let port = client.read_u16().await?;
    targets.lock().unwrap().push(format!("{}:{}", host, port));

    let mut server = match TcpStream::connect(upstream).await {
        Ok(server) => server,
        Err(_) => {
            client
                .write_all(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
                .await?;
            return Ok(());
        }
    };
    client
        .write_all(&[0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1, 0x1F, 0x90])
        .await?;
    tokio::io::copy_bidirectional(&mut client, &mut server).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub async fn read_request<R>(reader: &mut R) -> Option<HttpRequest>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let mut parts = line.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.ok()?;

    Some(HttpRequest {
        method,
        path,
        headers,
        body,
    })
}

fn response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
    let mut out = format!("HTTP/1.1 {}\r\n", status);
    for (name, value) in headers {
        out.push_str(&format!("{}: {}\r\n", name, value));
    }
    out.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    ));
    out
}

// ---------------------------------------------------------------------------
// Event-stream server
// ---------------------------------------------------------------------------

/// Serves `GET /sse` as an event stream that first announces
/// `/messages?session=abc` and then echoes every POSTed body as an event.
pub struct SseServer {
    pub addr: SocketAddr,
    stream: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedSender<String>>>>,
    posts: Arc<Mutex<Vec<HttpRequest>>>,
    streams_opened: Arc<AtomicUsize>,
}

impl SseServer {
    pub fn url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    pub fn posts(&self) -> Vec<HttpRequest> {
        self.posts.lock().unwrap().clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    /// Push a raw event block (must end with a blank line).
    pub async fn push_raw(&self, block: &str) {
        if let Some(tx) = self.stream.lock().await.as_ref() {
            let _ = tx.send(block.to_string());
        }
    }

    /// Close the open event stream.
    pub async fn end_stream(&self) {
        self.stream.lock().await.take();
    }
}

pub async fn start_sse_server() -> SseServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stream = Arc::new(tokio::sync::Mutex::new(None));
    let posts = Arc::new(Mutex::new(Vec::new()));
    let streams_opened = Arc::new(AtomicUsize::new(0));

    let server = SseServer {
        addr,
        stream: stream.clone(),
        posts: posts.clone(),
        streams_opened: streams_opened.clone(),
    };

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let stream = stream.clone();
            let posts = posts.clone();
            let streams_opened = streams_opened.clone();
            tokio::spawn(async move {
                let (rd, mut wr) = socket.into_split();
                let mut rd = BufReader::new(rd);
                let Some(req) = read_request(&mut rd).await else {
                    return;
                };

                match (req.method.as_str(), req.path.as_str()) {
                    ("GET", "/sse") => {
                        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                        *stream.lock().await = Some(tx);
                        streams_opened.fetch_add(1, Ordering::SeqCst);

                        let head = "HTTP/1.1 200 OK\r\n\
                                    Content-Type: text/event-stream\r\n\
                                    Cache-Control: no-cache\r\n\
                                    Connection: close\r\n\r\n\
                                    : welcome\n\n\
                                    event: endpoint\n\
                                    data: /messages?session=abc\n\n";
                        if wr.write_all(head.as_bytes()).await.is_err() {
                            return;
                        }
                        while let Some(block) = rx.recv().await {
                            if wr.write_all(block.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        let _ = wr.shutdown().await;
                    }
                    ("POST", path) if path.starts_with("/messages") => {
                        let body = String::from_utf8_lossy(&req.body).into_owned();
                        posts.lock().unwrap().push(req);
                        if let Some(tx) = stream.lock().await.as_ref() {
                            let _ = tx.send(format!("event: message\ndata: {}\n\n", body));
                        }
                        let _ = wr
                            .write_all(response("202 Accepted", &[], "").as_bytes())
                            .await;
                    }
                    _ => {
                        let _ = wr
                            .write_all(response("404 Not Found", &[], "not found").as_bytes())
                            .await;
                    }
                }
            });
        }
    });

    server
}

// ---------------------------------------------------------------------------
// Request/response server
// ---------------------------------------------------------------------------

pub const SESSION_ID: &str = "session-7";

/// JSON-RPC over plain POST: requests are answered with
/// `{"jsonrpc":"2.0","id":<id>,"result":{"echo":<request>}}`, notifications
/// with an empty 202, method `explode` with a 500. OPTIONS hands out a
/// session id.
pub struct RpcServer {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl RpcServer {
    pub fn url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn posts(&self) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect()
    }
}

pub async fn start_rpc_server() -> RpcServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let recorded = requests.clone();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let (rd, mut wr) = socket.into_split();
                let mut rd = BufReader::new(rd);
                let Some(req) = read_request(&mut rd).await else {
                    return;
                };
                recorded.lock().unwrap().push(req.clone());

                let stall = req.method == "POST"
                    && serde_json::from_slice::<Value>(&req.body)
                        .map(|message| message["method"] == "stall")
                        .unwrap_or(false);
                if stall {
                    // Keep the connection open and never answer.
                    let _held = wr;
                    std::future::pending::<()>().await;
                    return;
                }

                let reply = match req.method.as_str() {
                    "OPTIONS" => response("204 No Content", &[("mcp-session-id", SESSION_ID)], ""),
                    "GET" => response(
                        "405 Method Not Allowed",
                        &[("Content-Type", "application/json")],
                        "{}",
                    ),
                    "POST" => match serde_json::from_slice::<Value>(&req.body) {
                        Ok(message) if message["method"] == "explode" => {
                            response("500 Internal Server Error", &[], "kaboom")
                        }
                        Ok(message) => match message.get("id") {
                            Some(id) => {
                                let body = json!({
                                    "jsonrpc": "2.0",
                                    "id": id,
                                    "result": { "echo": message },
                                })
                                .to_string();
                                response(
                                    "200 OK",
                                    &[("Content-Type", "application/json")],
                                    &body,
                                )
                            }
                            None => response("202 Accepted", &[], ""),
                        },
                        Err(_) => response("400 Bad Request", &[], "bad json"),
                    },
                    _ => response("404 Not Found", &[], ""),
                };
                let _ = wr.write_all(reply.as_bytes()).await;
                let _ = wr.shutdown().await;
            });
        }
    });

    RpcServer { addr, requests }
}

// ---------------------------------------------------------------------------
// Fixed-status server
// ---------------------------------------------------------------------------

/// Answers every request with the same status and body.
pub async fn start_status_server(status: &'static str, body: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (rd, mut wr) = socket.into_split();
                let mut rd = BufReader::new(rd);
                if read_request(&mut rd).await.is_none() {
                    return;
                }
                let reply = response(status, &[("Content-Type", "text/plain")], body);
                let _ = wr.write_all(reply.as_bytes()).await;
                let _ = wr.shutdown().await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Resolves every name to one address and counts the calls.
pub struct CountingResolver {
    pub ip: IpAddr,
    calls: AtomicUsize,
}

impl CountingResolver {
    pub fn new(ip: IpAddr) -> Arc<Self> {
        Arc::new(Self {
            ip,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Resolve for CountingResolver {
    fn resolve(&self, _host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ip = self.ip;
        Box::pin(async move { Ok(vec![ip]) })
    }
}

// ---------------------------------------------------------------------------
// Local client side
// ---------------------------------------------------------------------------

/// Read one output line, failing the test after `wait`.
pub async fn next_line<R>(reader: &mut R, wait: Duration) -> String
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    tokio::time::timeout(wait, reader.read_line(&mut line))
        .await
        .expect("timed out waiting for output")
        .expect("output read failed");
    line
}
