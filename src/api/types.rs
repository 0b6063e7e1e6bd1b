use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LinkError, LinkResult};

/// Connection state of a linked device, as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SessionStatus {
    Pending,
    Connected,
    Error,
    Expired,
    Disconnected,
    Unknown(String),
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
            SessionStatus::Expired => "expired",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Unknown(s) => s,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == SessionStatus::Connected
    }
}

impl From<String> for SessionStatus {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "connecting" | "waiting" => SessionStatus::Pending,
            "connected" => SessionStatus::Connected,
            "error" | "failed" => SessionStatus::Error,
            "expired" => SessionStatus::Expired,
            "disconnected" => SessionStatus::Disconnected,
            _ => SessionStatus::Unknown(s),
        }
    }
}

impl From<SessionStatus> for String {
    fn from(s: SessionStatus) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A linked (or linking) device session owned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub session_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionList {
    #[serde(default)]
    pub sessions: Vec<Session>,
}

/// Payload of a successful generate call
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinkCode {
    pub qr_code: String,
    pub session_id: String,
}

/// Payload of a successful refresh call
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RefreshedCode {
    #[serde(default)]
    pub qr_code: Option<String>,
}

/// Poll response. Unlike every other endpoint it carries no `success` flag.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusReport {
    pub status: SessionStatus,
    #[serde(default)]
    pub error: Option<String>,
}

impl StatusReport {
    /// Error reported alongside the status, ignoring empty strings
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_connected() || self.error_message().is_some()
    }
}

/// Acknowledgement for actions whose success carries no data
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Ack {
    #[serde(default)]
    pub message: Option<String>,
}

/// Unwrap a `{success, error, ...}` body into its payload.
///
/// `success: false` becomes a domain error; a missing flag or a payload that
/// doesn't match `T` is a transport error.
pub fn unwrap_envelope<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> LinkResult<T> {
    let success = body
        .get("success")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| LinkError::Transport("response is missing the success flag".to_string()))?;

    if !success {
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("The request failed. Please try again.");
        return Err(LinkError::Domain(message.to_string()));
    }

    Ok(serde_json::from_value(body)?)
}

/// Kind of linking code payload the backend sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// `data:image/...` URL
    Image,
    /// Raw text to be rendered as a QR code by the client
    Text,
}

pub fn code_kind(qr_code: &str) -> CodeKind {
    if qr_code.starts_with("data:image") {
        CodeKind::Image
    } else {
        CodeKind::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_aliases() {
        let s: SessionStatus = serde_json::from_value(json!("connecting")).unwrap();
        assert_eq!(s, SessionStatus::Pending);
        let s: SessionStatus = serde_json::from_value(json!("Connected")).unwrap();
        assert!(s.is_connected());
        let s: SessionStatus = serde_json::from_value(json!("rebooting")).unwrap();
        assert_eq!(s, SessionStatus::Unknown("rebooting".to_string()));
        assert_eq!(s.to_string(), "rebooting");
    }

    #[test]
    fn envelope_success_and_domain_error() {
        let code: LinkCode = unwrap_envelope(json!({
            "success": true,
            "qr_code": "2@abc",
            "session_id": "s-1"
        }))
        .unwrap();
        assert_eq!(code.session_id, "s-1");

        let err = unwrap_envelope::<LinkCode>(json!({"success": false, "error": "Name taken"})).unwrap_err();
        assert_eq!(err, LinkError::Domain("Name taken".to_string()));

        let err = unwrap_envelope::<LinkCode>(json!({"success": false})).unwrap_err();
        assert!(matches!(err, LinkError::Domain(_)));
    }

    #[test]
    fn envelope_without_flag_is_transport() {
        let err = unwrap_envelope::<Ack>(json!({"message": "ok"})).unwrap_err();
        assert!(err.is_transport());

        // success but payload doesn't match
        let err = unwrap_envelope::<LinkCode>(json!({"success": true})).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn status_report_terminal_conditions() {
        let r: StatusReport = serde_json::from_value(json!({"status": "pending"})).unwrap();
        assert!(!r.is_terminal());
        let r: StatusReport = serde_json::from_value(json!({"status": "connected"})).unwrap();
        assert!(r.is_terminal());
        let r: StatusReport =
            serde_json::from_value(json!({"status": "pending", "error": "Browser crashed"})).unwrap();
        assert!(r.is_terminal());
        let r: StatusReport = serde_json::from_value(json!({"status": "pending", "error": ""})).unwrap();
        assert!(!r.is_terminal());
    }

    #[test]
    fn session_list_parses_backend_shape() {
        let list: SessionList = unwrap_envelope(json!({
            "success": true,
            "sessions": [{
                "id": 3,
                "name": "Office phone",
                "session_id": "abc123",
                "status": "connected",
                "last_connected": "2024-05-01T10:00:00"
            }]
        }))
        .unwrap();
        assert_eq!(list.sessions.len(), 1);
        assert_eq!(list.sessions[0].phone, None);
        assert!(list.sessions[0].status.is_connected());
    }

    #[test]
    fn code_kinds() {
        assert_eq!(code_kind("data:image/png;base64,iVBOR"), CodeKind::Image);
        assert_eq!(code_kind("2@Xy9,abc,def"), CodeKind::Text);
    }
}
