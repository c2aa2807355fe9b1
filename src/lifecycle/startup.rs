//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated config into a dialer, an HTTP client and a transport
//! - Run transport detection once when the mode is `auto`
//! - Hand the transport to the relay engine and run it to completion
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Every log line of one run carries the same `run_id`

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument, Span};
use uuid::Uuid;

use super::shutdown::Shutdown;
use crate::config::{
    validation::parse_server_url, BridgeConfig, ConfigError, ProxySettings, TransportMode,
};
use crate::error::BridgeError;
use crate::http::RemoteClient;
use crate::net::{ProxyDialer, Resolve, SystemResolver};
use crate::relay::{RelayEngine, RunOutcome};
use crate::transport::{self, detector, TransportError, TransportKind};

/// One configured bridge, ready to run against a pair of local streams.
pub struct Bridge {
    config: Arc<BridgeConfig>,
    resolver: Arc<dyn Resolve>,
}

impl Bridge {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self {
            config,
            resolver: Arc::new(SystemResolver),
        }
    }

    /// Replace the resolver used for `socks5://` (local resolution) proxies.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolve>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Relay between `input`/`output` and the remote server until EOF,
    /// shutdown or a fatal error.
    pub async fn run<R, W>(
        &self,
        input: R,
        output: W,
        shutdown: &Shutdown,
    ) -> Result<RunOutcome, BridgeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let span = info_span!("relay", run_id = %Uuid::new_v4());
        let config = &self.config;

        let proxy = ProxySettings::from_url(&config.proxy.url)
            .map_err(|e| ConfigError::Validation(vec![e]))?;
        let server_url = parse_server_url(&config.server.url)
            .map_err(|e| ConfigError::Validation(vec![e]))?;

        let cancel = shutdown.token();
        let dialer = ProxyDialer::new(proxy.addr.clone(), proxy.policy)
            .with_credentials(proxy.credentials.clone())
            .with_resolver(self.resolver.clone())
            .with_cancellation(cancel.clone())
            .with_span(span.clone());
        let client = RemoteClient::new(dialer).with_body_limit(config.relay.max_line_bytes);

        span.in_scope(|| {
            info!(
                proxy = %proxy.addr,
                resolution = %proxy.policy,
                authenticated = proxy.credentials.is_some(),
                server = %server_url,
                transport = %config.server.transport,
                "Starting bridge"
            )
        });

        let kind = match self.select_transport(&client, &server_url, &cancel, &span).await {
            Ok(kind) => kind,
            Err(TransportError::Cancelled) => return Ok(RunOutcome::Cancelled),
            Err(e) => return Err(BridgeError::connect_failed(e)),
        };

        let transport = transport::build(
            kind,
            client,
            server_url,
            &config.transport_settings(),
            span.clone(),
        );
        let engine = RelayEngine::new(transport, config.relay_settings(), span);
        engine.run(input, output, cancel).await
    }

    async fn select_transport(
        &self,
        client: &RemoteClient,
        url: &url::Url,
        cancel: &CancellationToken,
        span: &Span,
    ) -> Result<TransportKind, TransportError> {
        match self.config.server.transport {
            TransportMode::Sse => Ok(TransportKind::Streaming),
            TransportMode::Streamable => Ok(TransportKind::RequestResponse),
            TransportMode::Auto => {
                detector::detect(client, url, self.config.timeouts.detect, cancel)
                    .instrument(span.clone())
                    .await
            }
        }
    }
}
