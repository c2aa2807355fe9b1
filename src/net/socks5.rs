//! SOCKS5 client handshake (RFC 1928, RFC 1929).
//!
//! Runs the greeting, optional username/password sub-negotiation and the
//! CONNECT request over an already-open stream to the proxy. On success the
//! stream is a transparent tunnel to the target.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;

const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

/// Destination the proxy is asked to CONNECT to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Already-resolved address (ATYP IPv4/IPv6).
    Ip(SocketAddr),
    /// Hostname resolved by the proxy (ATYP domain).
    Domain(String, u16),
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

/// Username/password for RFC 1929 sub-negotiation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Failures while negotiating with the proxy.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("I/O error during SOCKS5 handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("proxy answered with SOCKS version {0}, expected 5")]
    UnsupportedVersion(u8),

    #[error("proxy rejected all offered authentication methods")]
    NoAcceptableMethod,

    #[error("proxy selected authentication method {0:#04x} which was not offered")]
    UnexpectedMethod(u8),

    #[error("proxy rejected the username/password (status {0:#04x})")]
    AuthRejected(u8),

    #[error("username or password longer than 255 bytes")]
    CredentialsTooLong,

    #[error("target hostname longer than 255 bytes")]
    DomainTooLong,

    #[error("proxy refused CONNECT: {reason} (reply {code:#04x})")]
    ConnectRejected { code: u8, reason: &'static str },

    #[error("malformed proxy reply: {0}")]
    InvalidReply(String),
}

impl HandshakeError {
    /// True when the proxy turned down our credentials or auth methods.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            HandshakeError::NoAcceptableMethod
                | HandshakeError::UnexpectedMethod(_)
                | HandshakeError::AuthRejected(_)
        )
    }
}

fn reply_reason(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

/// Negotiate a CONNECT to `target` over `stream`.
pub async fn connect<S>(
    stream: &mut S,
    target: &TargetAddr,
    credentials: Option<&Credentials>,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate_method(stream, credentials).await?;
    send_connect(stream, target).await?;
    read_connect_reply(stream).await
}

async fn negotiate_method<S>(
    stream: &mut S,
    credentials: Option<&Credentials>,
) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting: &[u8] = if credentials.is_some() {
        &[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_PASSWORD]
    } else {
        &[SOCKS5_VERSION, 1, AUTH_NONE]
    };
    stream.write_all(greeting).await?;
    stream.flush().await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;

    if response[0] != SOCKS5_VERSION {
        return Err(HandshakeError::UnsupportedVersion(response[0]));
    }

    match (response[1], credentials) {
        (AUTH_NONE, _) => Ok(()),
        (AUTH_PASSWORD, Some(creds)) => authenticate(stream, creds).await,
        (AUTH_NO_ACCEPTABLE, _) => Err(HandshakeError::NoAcceptableMethod),
        (other, _) => Err(HandshakeError::UnexpectedMethod(other)),
    }
}

async fn authenticate<S>(stream: &mut S, creds: &Credentials) -> Result<(), HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let username = creds.username.as_bytes();
    let password = creds.password.as_bytes();
    if username.len() > 255 || password.len() > 255 {
        return Err(HandshakeError::CredentialsTooLong);
    }

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(AUTH_VERSION);
    request.push(username.len() as u8);
    request.extend_from_slice(username);
    request.push(password.len() as u8);
    request.extend_from_slice(password);
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut response = [0u8; 2];
    stream.read_exact(&mut response).await?;
    if response[1] != 0x00 {
        return Err(HandshakeError::AuthRejected(response[1]));
    }
    Ok(())
}

async fn send_connect<S>(stream: &mut S, target: &TargetAddr) -> Result<(), HandshakeError>
where
    S: AsyncWrite + Unpin,
{
    let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];

    match target {
        TargetAddr::Ip(addr) => {
            match addr.ip() {
                IpAddr::V4(v4) => {
                    request.push(ATYP_IPV4);
                    request.extend_from_slice(&v4.octets());
                }
                IpAddr::V6(v6) => {
                    request.push(ATYP_IPV6);
                    request.extend_from_slice(&v6.octets());
                }
            }
            request.extend_from_slice(&addr.port().to_be_bytes());
        }
        TargetAddr::Domain(host, port) => {
            if host.len() > 255 {
                return Err(HandshakeError::DomainTooLong);
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
            request.extend_from_slice(&port.to_be_bytes());
        }
    }

    stream.write_all(&request).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_connect_reply<S>(stream: &mut S) -> Result<(), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(HandshakeError::UnsupportedVersion(header[0]));
    }
    if header[1] != REP_SUCCESS {
        return Err(HandshakeError::ConnectRejected {
            code: header[1],
            reason: reply_reason(header[1]),
        });
    }

    // Bound address: not needed, but it must be consumed.
    match header[3] {
        ATYP_IPV4 => {
            let mut skip = [0u8; 6];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_IPV6 => {
            let mut skip = [0u8; 18];
            stream.read_exact(&mut skip).await?;
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut skip = vec![0u8; len[0] as usize + 2];
            stream.read_exact(&mut skip).await?;
        }
        other => {
            return Err(HandshakeError::InvalidReply(format!(
                "unknown bound address type {:#04x}",
                other
            )));
        }
    }

    Ok(())
}
