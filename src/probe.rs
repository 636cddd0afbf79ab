//! Probe envelope shared by the server, the dispatcher and the client.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const META_OPERATION: &str = "operation";
pub const META_START_TIME: &str = "start-time";
pub const META_END_TIME: &str = "end-time";
pub const META_DURATION: &str = "duration";
pub const META_STATUS_CODE: &str = "status-code";

/// Status override attached to responses for operations the engine lacks.
pub const NOT_FOUND_STATUS: &str = "404";

/// Operation names understood by the built-in dispatcher.
pub mod ops {
    pub const CHECK_RUNNING: &str = "checkRunning";
    pub const CHECK_ROLE: &str = "checkRole";
    pub const GET_ROLE: &str = "getRole";
    pub const SWITCHOVER: &str = "switchover";
    pub const LOCK_INSTANCE: &str = "lockInstance";
    pub const UNLOCK_INSTANCE: &str = "unlockInstance";
    pub const JOIN_MEMBER: &str = "joinMember";
    pub const LEAVE_MEMBER: &str = "leaveMember";
    pub const VOLUME_PROTECTION: &str = "volumeProtection";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeRequest {
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ProbeRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata value, treating empty strings as absent.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeResponse {
    pub data: Vec<u8>,
    pub metadata: BTreeMap<String, String>,
}

impl ProbeResponse {
    pub fn status_override(&self) -> Option<&str> {
        self.metadata.get(META_STATUS_CODE).map(String::as_str)
    }

    pub fn result(&self) -> serde_json::Result<OpsResult> {
        OpsResult::from_slice(&self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpsEvent {
    Success,
    Failed,
    Invalid,
    NotImplemented,
}

impl OpsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpsEvent::Success => "Success",
            OpsEvent::Failed => "Failed",
            OpsEvent::Invalid => "Invalid",
            OpsEvent::NotImplemented => "NotImplemented",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(OpsEvent::Success),
            "Failed" => Some(OpsEvent::Failed),
            "Invalid" => Some(OpsEvent::Invalid),
            "NotImplemented" => Some(OpsEvent::NotImplemented),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpsEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result document of one operation: an insertion-ordered JSON object
/// carrying at least `event` and usually `message`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OpsResult(Map<String, Value>);

impl OpsResult {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with_event(event: OpsEvent, message: impl Into<String>) -> Self {
        let mut res = Self::new();
        res.set_event(event);
        res.set("message", message.into());
        res
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::with_event(OpsEvent::Success, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::with_event(OpsEvent::Failed, message)
    }

    pub fn set_event(&mut self, event: OpsEvent) {
        self.set("event", event.as_str());
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn event(&self) -> Option<OpsEvent> {
        self.get_str("event").and_then(OpsEvent::parse)
    }

    pub fn message(&self) -> &str {
        self.get_str("message").unwrap_or_default()
    }

    pub fn to_vec(&self) -> Vec<u8> {
        // Map<String, Value> always serializes.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}
