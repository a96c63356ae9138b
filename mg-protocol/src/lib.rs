use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum request size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Maximum response size accepted by clients (snapshots carry the reading history)
pub const MAX_RESPONSE_SIZE: usize = 256 * 1024;

/// Maximum length of a relay or group name
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum number of relays listed in a single CreateGroup request
pub const MAX_GROUP_MEMBERS: usize = 64;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    /// Last N readings, all relays and all groups
    GetSnapshot,
    /// Configured threshold and the latest reading compared against it
    SafetyStatus,
    Toggle { relay_id: u8 },
    Rename { relay_id: u8, name: String },
    SetGlobal { on: bool },
    SetGroup { group_id: u32, on: bool },
    CreateGroup { name: String, relay_ids: Vec<u8> },
    DeleteGroup { group_id: u32 },
    /// Run one sensing cycle immediately instead of waiting for the timer
    RunSensingCycle,
}

impl Request {
    /// Validate request parameters before sending to daemon
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Request::Ping
            | Request::Version
            | Request::GetSnapshot
            | Request::SafetyStatus
            | Request::RunSensingCycle
            | Request::SetGlobal { .. } => Ok(()),

            Request::Toggle { relay_id } => validate_relay_id(*relay_id),

            Request::Rename { relay_id, name } => {
                validate_relay_id(*relay_id)?;
                validate_name(name)
            }

            Request::SetGroup { group_id, .. } | Request::DeleteGroup { group_id } => {
                validate_group_id(*group_id)
            }

            Request::CreateGroup { name, relay_ids } => {
                validate_name(name)?;
                if relay_ids.len() > MAX_GROUP_MEMBERS {
                    return Err(format!(
                        "Too many relays in group ({} > {})",
                        relay_ids.len(),
                        MAX_GROUP_MEMBERS
                    ));
                }
                for id in relay_ids {
                    validate_relay_id(*id)?;
                }
                Ok(())
            }
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::GetSnapshot => "GetSnapshot",
            Request::SafetyStatus => "SafetyStatus",
            Request::Toggle { .. } => "Toggle",
            Request::Rename { .. } => "Rename",
            Request::SetGlobal { .. } => "SetGlobal",
            Request::SetGroup { .. } => "SetGroup",
            Request::CreateGroup { .. } => "CreateGroup",
            Request::DeleteGroup { .. } => "DeleteGroup",
            Request::RunSensingCycle => "RunSensingCycle",
        }
    }

    /// Whether the request changes relay or group state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::Toggle { .. }
                | Request::Rename { .. }
                | Request::SetGlobal { .. }
                | Request::SetGroup { .. }
                | Request::CreateGroup { .. }
                | Request::DeleteGroup { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self { id, response }
    }
}

/// Category of a rejected request, so clients can react without parsing messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown relay or group id
    NotFound,
    /// Malformed or out-of-range parameters
    InvalidRequest,
    /// A GPIO write failed
    Hardware,
    /// The registry or reading log could not be persisted
    Storage,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error { kind: ErrorKind, message: String },
}

/// Response data - each request fills in the field it needs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ActuationReportInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<CycleInfo>,
}

impl ResponseData {
    pub fn none() -> Self { Self::default() }
    pub fn string(v: String) -> Self { Self { value: Some(v), ..Self::default() } }
    pub fn snapshot(s: Snapshot) -> Self { Self { snapshot: Some(s), ..Self::default() } }
    pub fn relay(r: RelayInfo) -> Self { Self { relay: Some(r), ..Self::default() } }
    pub fn report(r: ActuationReportInfo) -> Self { Self { report: Some(r), ..Self::default() } }
    pub fn group(id: u32) -> Self { Self { group_id: Some(id), ..Self::default() } }
    pub fn safety(s: SafetyInfo) -> Self { Self { safety: Some(s), ..Self::default() } }
    pub fn cycle(c: CycleInfo) -> Self { Self { cycle: Some(c), ..Self::default() } }
}

/// Read-only view of the system handed to the control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Oldest first
    pub readings: Vec<ReadingInfo>,
    pub relays: Vec<RelayInfo>,
    pub groups: Vec<GroupInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingInfo {
    /// RFC 3339 capture time
    pub timestamp: String,
    pub value_kwh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayInfo {
    pub id: u8,
    pub pin: u32,
    pub name: String,
    /// 0 when ungrouped
    pub group_id: u32,
    pub on: bool,
    pub estimated_watts: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: u32,
    pub name: String,
    pub members: Vec<u8>,
}

/// Outcome of a multi-pin actuation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuationReportInfo {
    /// Relays whose logical state was set
    pub targeted: usize,
    /// Pins that accepted the write
    pub affected: usize,
    /// Pins whose write failed
    pub failed_pins: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyInfo {
    pub threshold_kwh: f64,
    pub last_reading: Option<ReadingInfo>,
    pub over_threshold: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleInfo {
    /// recorded, capture_failed, nothing_recognized, reader_failed, log_failed
    pub outcome: String,
    pub value_kwh: Option<f64>,
    /// Whether the safety cutoff fired
    pub tripped: bool,
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s.into()))
    }

    pub fn error(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Response::Error { kind, message: msg.into() }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::error(ErrorKind::InvalidRequest, msg)
    }
}

pub fn validate_relay_id(id: u8) -> Result<(), String> {
    if id == 0 {
        return Err("Relay id must be 1 or greater".into());
    }
    Ok(())
}

pub fn validate_group_id(id: u32) -> Result<(), String> {
    if id == 0 {
        return Err("Group id 0 means ungrouped and cannot be targeted".into());
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Name cannot be empty".into());
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(format!("Name too long (maximum {} characters)", MAX_NAME_LENGTH));
    }
    if trimmed.chars().any(char::is_control) {
        return Err("Name contains control characters".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let env = RequestEnvelope::with_id(Request::SetGroup { group_id: 2, on: false }, 7);
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"id":7,"cmd":"SetGroup","data":{"group_id":2,"on":false}}"#);

        let parsed: RequestEnvelope = serde_json::from_str(r#"{"id":3,"cmd":"Ping"}"#).unwrap();
        assert_eq!(parsed.id, 3);
        assert_eq!(parsed.request, Request::Ping);
    }

    #[test]
    fn test_error_response_wire_format() {
        let env = ResponseEnvelope::new(9, Response::error(ErrorKind::NotFound, "Relay 12 not found"));
        let value: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["status"], "error");
        assert_eq!(value["kind"], "not_found");
        assert_eq!(value["message"], "Relay 12 not found");
    }

    #[test]
    fn test_ok_response_skips_empty_fields() {
        let env = ResponseEnvelope::new(1, Response::Ok(ResponseData::group(4)));
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"id":1,"status":"ok","group_id":4}"#);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        assert!(Request::Toggle { relay_id: 0 }.validate().is_err());
        assert!(Request::DeleteGroup { group_id: 0 }.validate().is_err());
        assert!(Request::Rename { relay_id: 1, name: "   ".into() }.validate().is_err());
        assert!(Request::Rename { relay_id: 1, name: "x".repeat(65) }.validate().is_err());
        assert!(Request::CreateGroup { name: "Kitchen".into(), relay_ids: vec![1, 0] }
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_accepts_empty_group() {
        let req = Request::CreateGroup { name: "Spare".into(), relay_ids: vec![] };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_mutating_classification() {
        assert!(Request::SetGlobal { on: true }.is_mutating());
        assert!(!Request::GetSnapshot.is_mutating());
        assert!(!Request::RunSensingCycle.is_mutating());
    }
}
