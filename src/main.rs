//! SOCKS5 JSON-RPC bridge
//!
//! Lets a local JSON-RPC client that speaks over stdio reach a remote server
//! that is only reachable through a SOCKS5 proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!   local client                    BRIDGE                          remote
//!  ┌──────────┐   stdin   ┌────────────────────────────┐   HTTP   ┌────────┐
//!  │          │──────────▶│ relay::inbound ─▶ transport │─────────▶│        │
//!  │  JSON-   │  (lines)  │                      │      │  (SSE or │ JSON-  │
//!  │  RPC     │           │                      ▼      │  POST)   │ RPC    │
//!  │  client  │◀──────────│ relay::output ◀─ transport │◀─────────│ server │
//!  └──────────┘   stdout  └──────────────────────┬─────┘          └────────┘
//!                                                │ every TCP connection
//!                                                ▼
//!                                        net::ProxyDialer ──▶ SOCKS5 proxy
//! ```
//!
//! Logs go to stderr. Exit status is 0 after a clean shutdown or local EOF,
//! 1 after any fatal error.
//!
//! The process exits explicitly once the relay has stopped: the runtime's
//! blocking stdin read cannot be cancelled and would otherwise hold shutdown
//! open until the client writes or closes its end.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use socks_rpc_bridge::config::{resolve_config, CliArgs};
use socks_rpc_bridge::lifecycle::{listen_for_shutdown, Bridge, Shutdown};
use socks_rpc_bridge::observability::logging::init_logging;
use socks_rpc_bridge::{ErrorKind, RunOutcome};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    let code = run(args).await;
    std::process::exit(code);
}

async fn run(args: CliArgs) -> i32 {

    let config = match resolve_config(&args) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Run 'socks-rpc-bridge --help' for usage.");
            return 1;
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("Error: failed to initialize logging: {}", e);
        return 1;
    }

    info!(version = env!("CARGO_PKG_VERSION"), "socks-rpc-bridge starting");

    let shutdown = Shutdown::new();
    tokio::spawn(listen_for_shutdown(shutdown.clone()));

    let bridge = Bridge::new(config);
    let result = bridge
        .run(tokio::io::stdin(), tokio::io::stdout(), &shutdown)
        .await;

    // Lets the signal listener return.
    shutdown.trigger();

    match result {
        Ok(RunOutcome::Cancelled) => {
            info!("Shutdown complete");
            0
        }
        Ok(RunOutcome::InputClosed) => {
            info!("Local input closed, exiting");
            0
        }
        Err(e) => {
            let kind = e.kind();
            error!(error = %e, error_kind = kind.as_str(), "Bridge failed");
            report(kind, &e.to_string());
            1
        }
    }
}

fn report(kind: ErrorKind, message: &str) {
    eprintln!("Error: {}", message);
    if let Some(hint) = kind.remediation() {
        eprintln!("\n{}", hint);
    }
}
