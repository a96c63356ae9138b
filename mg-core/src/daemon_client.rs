//! Daemon Client
//!
//! Talks to meterguardd over its Unix socket. One request per line, one
//! response per line, correlated by envelope id.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use tracing::debug;

use mg_protocol::{
    ErrorKind, Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope,
    MAX_MESSAGE_SIZE, MAX_RESPONSE_SIZE,
};

use crate::constants::timing;
use crate::error::{MeterGuardError, Result};

/// Initial buffer size for responses (snapshots are a few KB)
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Connection to the daemon
pub struct DaemonClient {
    socket_path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl DaemonClient {
    pub fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                MeterGuardError::DaemonNotAvailable
            }
            _ => MeterGuardError::DaemonConnection(format!(
                "Failed to connect to daemon at {:?}: {}",
                socket_path, e
            )),
        })?;

        stream.set_read_timeout(Some(timing::CLIENT_TIMEOUT))?;
        stream.set_write_timeout(Some(timing::CLIENT_TIMEOUT))?;
        let reader_stream = stream.try_clone()?;

        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    /// Send a request and wait for its response
    ///
    /// A request that could not be sent is retried once on a fresh
    /// connection. A request whose response was lost is not retried, since
    /// toggles are not idempotent.
    pub fn request(&mut self, req: Request) -> Result<Response> {
        self.request_with_retry(req, true)
    }

    fn request_with_retry(&mut self, req: Request, allow_retry: bool) -> Result<Response> {
        req.validate().map_err(MeterGuardError::invalid_command)?;

        let envelope = RequestEnvelope::new(req);
        let request_id = envelope.id;

        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(MeterGuardError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        if let Err(e) = self.writer.write_all(&json) {
            if allow_retry {
                debug!("Send failed ({}), reconnecting", e);
                *self = Self::connect(&self.socket_path)?;
                return self.request_with_retry(envelope.request, false);
            }
            return Err(MeterGuardError::DaemonConnection(format!("Failed to send request: {}", e)));
        }

        let mut response_buf: Vec<u8> = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        self.reader
            .by_ref()
            .take(MAX_RESPONSE_SIZE as u64 + 1)
            .read_until(b'\n', &mut response_buf)
            .map_err(|e| MeterGuardError::DaemonConnection(format!("Failed to read response: {}", e)))?;

        if response_buf.is_empty() {
            return Err(MeterGuardError::DaemonConnection("Daemon closed connection".to_string()));
        }
        if response_buf.len() > MAX_RESPONSE_SIZE {
            return Err(MeterGuardError::MessageTooLarge {
                size: response_buf.len(),
                max_size: MAX_RESPONSE_SIZE,
            });
        }
        if response_buf.last() == Some(&b'\n') {
            response_buf.pop();
        }

        let response: ResponseEnvelope = serde_json::from_slice(&response_buf)
            .map_err(|e| MeterGuardError::IpcProtocol(format!("Failed to parse response: {}", e)))?;

        if response.id != request_id {
            return Err(MeterGuardError::IpcProtocol(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        verify_response_type(&envelope.request, &response.response)?;
        Ok(response.response)
    }

    /// Like [`request`](Self::request) but turns error responses into errors
    pub fn call(&mut self, req: Request) -> Result<ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { kind, message } => Err(response_error(kind, message)),
        }
    }
}

fn response_error(kind: ErrorKind, message: String) -> MeterGuardError {
    match kind {
        ErrorKind::InvalidRequest => MeterGuardError::InvalidCommand(message),
        _ => MeterGuardError::DaemonResponse(message),
    }
}

/// Check that an ok response carries the field its request expects
fn verify_response_type(req: &Request, resp: &Response) -> Result<()> {
    let data = match resp {
        Response::Error { .. } => return Ok(()),
        Response::Ok(data) => data,
    };

    let valid = match req {
        Request::Ping | Request::Version => data.value.is_some(),
        Request::GetSnapshot => data.snapshot.is_some(),
        Request::SafetyStatus => data.safety.is_some(),
        Request::Toggle { .. } | Request::Rename { .. } => data.relay.is_some(),
        Request::SetGlobal { .. } | Request::SetGroup { .. } => data.report.is_some(),
        Request::CreateGroup { .. } => data.group_id.is_some(),
        Request::RunSensingCycle => data.cycle.is_some(),
        Request::DeleteGroup { .. } => true,
    };

    if !valid {
        return Err(MeterGuardError::IpcProtocol(format!(
            "Response type mismatch for request {}",
            req.type_name()
        )));
    }
    Ok(())
}

/// Whether a daemon is answering on `socket_path`
pub fn is_daemon_available(socket_path: &Path) -> bool {
    ping_daemon(socket_path).is_ok()
}

pub fn ping_daemon(socket_path: &Path) -> Result<String> {
    let data = DaemonClient::connect(socket_path)?.call(Request::Ping)?;
    data.value
        .ok_or_else(|| MeterGuardError::IpcProtocol("Ping response without value".to_string()))
}
