//! Transport kind detection.
//!
//! One short GET advertising both content types; the response content type
//! decides. Anything inconclusive falls back to the event stream.

use std::time::Duration;

use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::Method;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{TransportError, TransportKind};
use crate::http::{empty_request, RemoteClient};

const PROBE_ACCEPT: &str = "text/event-stream, application/json";

/// Map a response content type to a transport kind.
pub fn classify(content_type: Option<&str>) -> TransportKind {
    match content_type {
        Some(ct) if ct.starts_with("application/json") => TransportKind::RequestResponse,
        _ => TransportKind::Streaming,
    }
}

/// Probe `url` and pick a transport. Only cancellation is an error; every
/// other failure falls back to streaming and leaves the real error to
/// `connect`.
pub async fn detect(
    client: &RemoteClient,
    url: &Url,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<TransportKind, TransportError> {
    let req = empty_request(Method::GET, url, &[(ACCEPT.as_str(), PROBE_ACCEPT)])?;

    let response = match client.execute(req, timeout, cancel).await {
        Ok(response) => response,
        Err(TransportError::Cancelled) => return Err(TransportError::Cancelled),
        Err(e) => {
            warn!(error = %e, fallback = %TransportKind::Streaming, "Transport detection failed");
            return Ok(TransportKind::Streaming);
        }
    };

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    // Dropping the response closes an event stream the server may have opened.
    drop(response);

    let kind = classify(content_type.as_deref());
    debug!(content_type = ?content_type, "Detection probe answered");
    info!(transport = %kind, "Detected transport");
    Ok(kind)
}
