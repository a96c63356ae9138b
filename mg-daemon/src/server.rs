//! Unix Socket Server
//!
//! Newline-delimited JSON control surface for the relay coordinator.
//!
//! # Limits
//! - **Connection limits**: Maximum concurrent connections enforced
//! - **Timeouts**: Read/write timeouts prevent resource exhaustion
//! - **Message limits**: Maximum message size prevents memory exhaustion
//! - **Input validation**: Every request is validated before dispatch
//!
//! # Audit
//! Peer credentials (uid/pid) are logged for every mutating request.

use anyhow::{bail, Context};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use mg_core::error_kind;
use mg_protocol::{ErrorKind, Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope};

use crate::state::DaemonState;

// ============================================================================
// Limits
// ============================================================================

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 16;

/// Maximum message size in bytes
const MAX_MESSAGE_SIZE: usize = mg_protocol::MAX_MESSAGE_SIZE;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Socket file permissions (root and the meterguard group)
const SOCKET_MODE: u32 = 0o660;

const VERSION: &str = env!("CARGO_PKG_VERSION");

async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Serve requests on `socket_path` until `shutdown` flips
pub async fn run_server(
    socket_path: &Path,
    state: Arc<DaemonState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    // Remove a stale socket, but never follow a symlink
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            bail!("Socket path {:?} is a symlink - refusing", socket_path);
        }
        std::fs::remove_file(socket_path)
            .with_context(|| format!("removing stale socket {:?}", socket_path))?;
        debug!("Removed existing socket file");
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {:?}", socket_path))?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!("Listening on {:?} (mode {:o})", socket_path, SOCKET_MODE);
    info!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    let active = Arc::new(AtomicUsize::new(0));
    let mut total: u64 = 0;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = active.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        total += 1;
                        let active = active.clone();
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_client(stream, state).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("SHUTDOWN: Server stopping");
                    break;
                }
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped (handled {} total connections)", total);
    Ok(())
}

/// Client credentials from Unix socket peer
#[derive(Debug, Clone, Copy)]
struct PeerCredentials {
    uid: u32,
    pid: i32,
}

async fn handle_client(stream: UnixStream, state: Arc<DaemonState>) {
    let cred = get_peer_credentials(&stream);
    match cred {
        Some(c) => debug!("Connection from uid={}, pid={}", c.uid, c.pid),
        None => debug!("Connection from unknown peer"),
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;
    let connection_start = Instant::now();

    loop {
        let read_result =
            timeout(READ_TIMEOUT, read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE)).await;

        match read_result {
            Ok(Ok(0)) => {
                debug!(
                    "Client disconnected: requests={}, duration={:?}",
                    request_count,
                    connection_start.elapsed()
                );
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{}: {} bytes", request_count, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(_) => {
                        let response = ResponseEnvelope::new(0, Response::invalid("Invalid request encoding"));
                        let _ = send_response(&mut writer, &response).await;
                        break;
                    }
                };

                let response = process_request(line_str, cred, &state).await;
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    warn!("Message too large (>{} bytes)", MAX_MESSAGE_SIZE);
                    let response = ResponseEnvelope::new(0, Response::invalid("Message too large"));
                    let _ = send_response(&mut writer, &response).await;
                } else {
                    error!("Read error: {}", e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout");
                break;
            }
        }
    }
}

async fn send_response(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    response: &ResponseEnvelope,
) -> Result<(), ()> {
    let mut json = match serde_json::to_vec(response) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            br#"{"id":0,"status":"error","kind":"internal","message":"Serialization error"}"#.to_vec()
        }
    };
    json.push(b'\n');

    match timeout(WRITE_TIMEOUT, writer.write_all(&json)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

#[cfg(target_os = "linux")]
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    // SAFETY: ucred is a plain C struct; all-zero is a valid value.
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    // SAFETY: fd is a live socket owned by `stream`, and cred/len describe a
    // correctly sized ucred buffer.
    let result = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    (result == 0).then_some(PeerCredentials { uid: cred.uid, pid: cred.pid })
}

#[cfg(not(target_os = "linux"))]
fn get_peer_credentials(_stream: &UnixStream) -> Option<PeerCredentials> {
    None
}

// ============================================================================
// Request dispatch
// ============================================================================

async fn process_request(
    line: &str,
    cred: Option<PeerCredentials>,
    state: &Arc<DaemonState>,
) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid JSON: {}", e);
            return ResponseEnvelope::new(0, Response::invalid("Invalid request format"));
        }
    };

    let request_id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        warn!("Request validation failed: {}", e);
        return ResponseEnvelope::new(request_id, Response::invalid(e));
    }

    if request.is_mutating() {
        let (uid, pid) = cred.map(|c| (c.uid as i64, c.pid as i64)).unwrap_or((-1, -1));
        info!(uid, pid, "{} (id={})", request.type_name(), request_id);
    } else {
        debug!("Processing {} (id={})", request.type_name(), request_id);
    }

    ResponseEnvelope::new(request_id, dispatch(request, state).await)
}

async fn dispatch(request: Request, state: &Arc<DaemonState>) -> Response {
    match request {
        Request::Ping => Response::ok_string("pong"),

        Request::Version => Response::ok_string(VERSION),

        Request::GetSnapshot => Response::Ok(ResponseData::snapshot(state.snapshot())),

        Request::SafetyStatus => Response::Ok(ResponseData::safety(state.safety_status())),

        Request::Toggle { relay_id } => {
            blocking(state, move |s| {
                s.coordinator.toggle(relay_id).map(|r| ResponseData::relay(r.to_info()))
            })
            .await
        }

        Request::Rename { relay_id, name } => {
            blocking(state, move |s| {
                s.coordinator.rename(relay_id, &name).map(|r| ResponseData::relay(r.to_info()))
            })
            .await
        }

        Request::SetGlobal { on } => {
            blocking(state, move |s| {
                s.coordinator.set_global(on).map(|r| ResponseData::report(r.to_info()))
            })
            .await
        }

        Request::SetGroup { group_id, on } => {
            blocking(state, move |s| {
                s.coordinator.set_group(group_id, on).map(|r| ResponseData::report(r.to_info()))
            })
            .await
        }

        Request::CreateGroup { name, relay_ids } => {
            blocking(state, move |s| {
                s.coordinator.create_group(&name, &relay_ids).map(ResponseData::group)
            })
            .await
        }

        Request::DeleteGroup { group_id } => {
            blocking(state, move |s| {
                s.coordinator
                    .delete_group(group_id)
                    .map(|detached| ResponseData::string(detached.to_string()))
            })
            .await
        }

        Request::RunSensingCycle => {
            blocking(state, |s| Ok(ResponseData::cycle(s.cycle.run_once().to_info()))).await
        }
    }
}

/// Run a coordinator call off the executor and map its error
async fn blocking<F>(state: &Arc<DaemonState>, f: F) -> Response
where
    F: FnOnce(&DaemonState) -> mg_core::Result<ResponseData> + Send + 'static,
{
    let state = Arc::clone(state);
    match tokio::task::spawn_blocking(move || f(&state)).await {
        Ok(Ok(data)) => Response::Ok(data),
        Ok(Err(e)) => {
            let kind = error_kind(&e);
            if kind == ErrorKind::Internal || kind == ErrorKind::Storage {
                error!("Request failed: {}", e);
            } else {
                debug!("Request rejected: {}", e);
            }
            Response::error(kind, e.to_string())
        }
        Err(e) => {
            error!("Worker task failed: {}", e);
            Response::error(ErrorKind::Internal, "Internal error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::state_reading;

    async fn roundtrip(state: &Arc<DaemonState>, line: &str) -> ResponseEnvelope {
        process_request(line, None, state).await
    }

    fn ok_data(env: ResponseEnvelope) -> ResponseData {
        match env.response {
            Response::Ok(data) => data,
            Response::Error { kind, message } => panic!("error {kind:?}: {message}"),
        }
    }

    fn error_kind_of(env: ResponseEnvelope) -> ErrorKind {
        match env.response {
            Response::Error { kind, .. } => kind,
            Response::Ok(_) => panic!("expected error"),
        }
    }

    #[tokio::test]
    async fn test_ping_and_version() {
        let state = state_reading("0");
        let env = roundtrip(&state, r#"{"id":5,"cmd":"Ping"}"#).await;
        assert_eq!(env.id, 5);
        assert_eq!(ok_data(env).value.as_deref(), Some("pong"));

        let env = roundtrip(&state, r#"{"id":6,"cmd":"Version"}"#).await;
        assert_eq!(ok_data(env).value.as_deref(), Some(VERSION));
    }

    #[tokio::test]
    async fn test_malformed_request_is_invalid() {
        let state = state_reading("0");
        let env = roundtrip(&state, "not json").await;
        assert_eq!(env.id, 0);
        assert_eq!(error_kind_of(env), ErrorKind::InvalidRequest);

        let env = roundtrip(&state, r#"{"id":2,"cmd":"Toggle","data":{"relay_id":0}}"#).await;
        assert_eq!(error_kind_of(env), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_toggle_and_unknown_relay() {
        let state = state_reading("0");
        let env = roundtrip(&state, r#"{"id":1,"cmd":"Toggle","data":{"relay_id":3}}"#).await;
        let relay = ok_data(env).relay.unwrap();
        assert_eq!(relay.id, 3);
        assert!(relay.on);

        let env = roundtrip(&state, r#"{"id":2,"cmd":"Toggle","data":{"relay_id":12}}"#).await;
        assert_eq!(error_kind_of(env), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let state = state_reading("0");
        let env = roundtrip(
            &state,
            r#"{"id":1,"cmd":"CreateGroup","data":{"name":"Kitchen","relay_ids":[1,2]}}"#,
        )
        .await;
        let group_id = ok_data(env).group_id.unwrap();
        assert_eq!(group_id, 2);

        let env = roundtrip(
            &state,
            &format!(r#"{{"id":2,"cmd":"SetGroup","data":{{"group_id":{},"on":true}}}}"#, group_id),
        )
        .await;
        assert_eq!(ok_data(env).report.unwrap().affected, 2);

        let env = roundtrip(
            &state,
            &format!(r#"{{"id":3,"cmd":"DeleteGroup","data":{{"group_id":{}}}}}"#, group_id),
        )
        .await;
        ok_data(env);

        let env = roundtrip(&state, r#"{"id":4,"cmd":"DeleteGroup","data":{"group_id":99}}"#).await;
        assert_eq!(error_kind_of(env), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_sensing_cycle_over_threshold_cuts_off() {
        let state = state_reading("6000 kWh");
        ok_data(roundtrip(&state, r#"{"id":1,"cmd":"SetGlobal","data":{"on":true}}"#).await);

        let env = roundtrip(&state, r#"{"id":2,"cmd":"RunSensingCycle"}"#).await;
        let cycle = ok_data(env).cycle.unwrap();
        assert_eq!(cycle.outcome, "recorded");
        assert!(cycle.tripped);

        let snapshot = ok_data(roundtrip(&state, r#"{"id":3,"cmd":"GetSnapshot"}"#).await)
            .snapshot
            .unwrap();
        assert!(snapshot.relays.iter().all(|r| !r.on));
        assert_eq!(snapshot.readings.len(), 1);
        assert_eq!(snapshot.readings[0].value_kwh, 6000.0);
    }

    #[tokio::test]
    async fn test_server_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meterguard.sock");
        let state = state_reading("0");
        let (tx, rx) = watch::channel(false);

        let server_path = path.clone();
        let server = tokio::spawn(async move { run_server(&server_path, state, rx).await });

        let mut stream = None;
        for _ in 0..100 {
            if let Ok(s) = UnixStream::connect(&path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let stream = stream.expect("server did not start");

        let (reader, mut writer) = stream.into_split();
        writer.write_all(b"{\"id\":42,\"cmd\":\"Ping\"}\n").await.unwrap();
        let mut lines = BufReader::new(reader).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let env: ResponseEnvelope = serde_json::from_str(&line).unwrap();
        assert_eq!(env.id, 42);

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
        assert!(!path.exists());
    }
}
