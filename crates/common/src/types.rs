//! Core types for consolegate

use serde::{Deserialize, Serialize};

use crate::agent::ConsoleEndpoint;

/// One-time console access grant for a single VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub ticket: String,
    pub vm_id: i64,
    pub created_at: i64,
    /// Set exactly once, on first successful validation
    pub taken_at: Option<i64>,
    /// Soft-delete marker set by the expiry sweep
    pub removed: Option<i64>,
}

impl Ticket {
    /// Whether the ticket was already spent by an earlier authentication
    pub fn is_consumed(&self) -> bool {
        self.taken_at.is_some()
    }

    /// Short, log-safe prefix of the ticket value
    pub fn redacted(&self) -> String {
        redact(&self.ticket)
    }
}

/// Log-safe rendering of a secret value: first few characters only
pub fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(6).collect();
    format!("{}...", prefix)
}

/// Read-only view of a virtual machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstance {
    pub id: i64,
    pub uuid: String,
    pub instance_name: String,
    pub host_id: Option<i64>,
    /// Console password, also used as the session id (`sid`)
    pub vnc_password: String,
}

/// Host connection status as reported by inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Up,
    Down,
    Disconnected,
    Unknown,
}

impl Default for HostStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Up => write!(f, "up"),
            HostStatus::Down => write!(f, "down"),
            HostStatus::Disconnected => write!(f, "disconnected"),
            HostStatus::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for HostStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "up" => Ok(HostStatus::Up),
            "down" => Ok(HostStatus::Down),
            "disconnected" => Ok(HostStatus::Disconnected),
            "unknown" => Ok(HostStatus::Unknown),
            other => Err(crate::Error::Internal(format!("unknown host status {}", other))),
        }
    }
}

/// Read-only view of a hypervisor host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub status: HostStatus,
    /// `host:port` of the host agent's command endpoint
    pub agent_address: Option<String>,
}

/// Console access authentication request sent by a console proxy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    #[serde(default)]
    pub vm_id: String,
    #[serde(default)]
    pub ticket: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub is_reauthenticating: bool,
}

/// Console access authentication answer
///
/// When `success && is_reauthenticating`, exactly one of `host`+`port` or
/// `tunnel_url`+`tunnel_session` is populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    pub is_reauthenticating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_session: Option<String>,
}

impl AuthResponse {
    /// Initial authentication granted, no endpoint change
    pub fn granted() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// Authentication denied
    pub fn denied(is_reauthenticating: bool) -> Self {
        Self {
            success: false,
            is_reauthenticating,
            ..Default::default()
        }
    }

    /// Re-authentication succeeded with a fresh console endpoint
    pub fn refreshed(endpoint: ConsoleEndpoint) -> Self {
        let mut response = Self {
            success: true,
            is_reauthenticating: true,
            ..Default::default()
        };
        match endpoint {
            ConsoleEndpoint::Direct { host, port } => {
                response.host = Some(host);
                response.port = Some(port);
            }
            ConsoleEndpoint::Tunnel { url, session } => {
                response.tunnel_url = Some(url);
                response.tunnel_session = Some(session);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_request_wire_names() {
        let json = r#"{"vmId":"vm-1","ticket":"abc123","sid":"s3cret","host":"10.0.0.5","port":5901,"isReauthenticating":true}"#;
        let req: AuthRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.vm_id, "vm-1");
        assert_eq!(req.port, 5901);
        assert!(req.is_reauthenticating);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let req: AuthRequest = serde_json::from_str(r#"{"vmId":"vm-1"}"#).unwrap();
        assert!(req.ticket.is_empty());
        assert!(!req.is_reauthenticating);
    }

    #[test]
    fn test_refreshed_tunnel_leaves_direct_empty() {
        let response = AuthResponse::refreshed(ConsoleEndpoint::Tunnel {
            url: "https://esx-1/ticket".to_string(),
            session: "52a1".to_string(),
        });
        assert!(response.success && response.is_reauthenticating);
        assert!(response.host.is_none() && response.port.is_none());

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"tunnelUrl\""));
        assert!(!json.contains("\"host\""));
    }

    #[test]
    fn test_redact_keeps_prefix_only() {
        assert_eq!(redact("abcdef0123456789"), "abcdef...");
        assert_eq!(redact("ab"), "ab...");
    }

    #[test]
    fn test_host_status_roundtrip() {
        assert_eq!("up".parse::<HostStatus>().unwrap(), HostStatus::Up);
        assert_eq!(HostStatus::Disconnected.to_string(), "disconnected");
        assert!("sideways".parse::<HostStatus>().is_err());
    }
}
