//! Per-connection handler.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{verify_peer, PeerInfo};
use crate::commands::{CommandParams, CommandRegistry, ExecutionContext};
use crate::config::Settings;
use crate::error::{DaemonError, ProtocolErrorKind};
use crate::protocol::{Framing, Request, Response};

use super::listener::ConnectionMetrics;

/// Used when a request names no registered command.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle a single client connection until it closes or goes idle.
pub async fn handle_connection(
    stream: UnixStream,
    settings: Arc<Settings>,
    command_registry: Arc<CommandRegistry>,
    metrics: Arc<ConnectionMetrics>,
) -> Result<(), DaemonError> {
    let peer = verify_peer(&stream, &settings.security.allowed_peer_uids)?;
    debug!(uid = peer.uid, gid = peer.gid, pid = peer.pid, "Peer authenticated");

    let framing = Framing::from_limits(&settings.limits);
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let result =
            process_request(&mut reader, &mut writer, framing, &command_registry, &peer).await;

        match result {
            Ok(success) => metrics.record_request(success),
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!(uid = peer.uid, "Client disconnected");
                return Ok(());
            }
            Err(DaemonError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout,
            }) => {
                debug!(uid = peer.uid, "Idle connection timed out");
                return Ok(());
            }
            Err(e) => {
                metrics.record_request(false);
                return Err(e);
            }
        }
    }
}

/// Read, dispatch and answer one request. Returns whether it succeeded.
async fn process_request<R, W>(
    reader: &mut R,
    writer: &mut W,
    framing: Framing,
    command_registry: &Arc<CommandRegistry>,
    peer: &PeerInfo,
) -> Result<bool, DaemonError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let msg = framing.read(reader).await?;

    let response = match serde_json::from_slice::<Request>(&msg) {
        Ok(request) => dispatch(request, command_registry, peer).await,
        Err(e) => {
            warn!(uid = peer.uid, error = %e, "Malformed request");
            let error = DaemonError::Protocol {
                kind: ProtocolErrorKind::InvalidMessageFormat {
                    message: format!("Invalid JSON: {}", e),
                },
            };
            Response::from_error(Uuid::new_v4(), &error)
        }
    };

    let response_bytes = serde_json::to_vec(&response)?;
    framing.write(writer, &response_bytes).await?;

    Ok(response.success)
}

async fn dispatch(
    request: Request,
    command_registry: &Arc<CommandRegistry>,
    peer: &PeerInfo,
) -> Response {
    let request_id = request.request_id.unwrap_or_else(Uuid::new_v4);
    let started = Instant::now();

    let command = command_registry.get(&request.command);
    let quiet = command.as_ref().map(|c| c.quiet()).unwrap_or(false);
    let deadline = command.as_ref().map(|c| c.timeout()).unwrap_or(FALLBACK_TIMEOUT);

    if quiet {
        debug!(request_id = %request_id, command = %request.command, uid = peer.uid, "Received request");
    } else {
        info!(request_id = %request_id, command = %request.command, uid = peer.uid, "Received request");
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let ctx = ExecutionContext::new(request_id, peer.clone(), timestamp, request.command.clone());
    let params = CommandParams::new(request.params);
    let registry = Arc::clone(command_registry);
    let command_name = request.command.clone();

    // Commands block on subprocesses and file I/O.
    let task = tokio::task::spawn_blocking(move || registry.dispatch(&ctx, &command_name, params));

    let response = match tokio::time::timeout(deadline, task).await {
        Ok(Ok(Ok(result))) => {
            let data = result.data.unwrap_or_else(|| serde_json::json!({}));
            if result.success {
                Response::success(request_id, data)
            } else {
                Response::error(
                    request_id,
                    result.error_code.unwrap_or_else(|| "COMMAND_ERROR".to_string()),
                    result.error_message.unwrap_or_else(|| "Command failed".to_string()),
                )
                .with_data(data)
            }
        }
        Ok(Ok(Err(e))) => {
            warn!(
                request_id = %request_id,
                command = %request.command,
                code = e.code(),
                error = %e,
                "Command failed"
            );
            Response::from_error(request_id, &e)
        }
        Ok(Err(e)) => {
            error!(
                request_id = %request_id,
                command = %request.command,
                error = %e,
                "Command task panicked"
            );
            Response::error(request_id, "INTERNAL_ERROR", "Command execution failed")
        }
        Err(_) => {
            error!(
                request_id = %request_id,
                command = %request.command,
                timeout_secs = deadline.as_secs(),
                "Command timed out"
            );
            Response::error(
                request_id,
                "COMMAND_TIMEOUT",
                format!("{} did not finish within {}s", request.command, deadline.as_secs()),
            )
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    if quiet {
        debug!(request_id = %request_id, success = response.success, duration_ms, "Request completed");
    } else {
        info!(request_id = %request_id, success = response.success, duration_ms, "Request completed");
    }

    response
}
