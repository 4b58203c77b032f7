//! Console proxy control listener
//!
//! Console proxies connect here to authenticate viewers and, when they start,
//! to receive their transport key material. The protocol is one JSON object
//! per line in each direction.

use crate::state::ConsoleState;
use consolegate_common::agent::{read_message, write_message};
use consolegate_common::{AgentCommand, AuthRequest, AuthResponse, Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn, Instrument};

/// Request from a console proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Authenticate a viewer connection
    Authenticate(AuthRequest),
    /// A proxy came up and needs its key material
    Startup { proxy_id: String },
}

/// Reply to a console proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    AuthResult(AuthResponse),
    StartHandler { encryptor_password: String },
    Error { message: String },
}

/// Accepts console proxy connections
pub struct ControlServer {
    state: ConsoleState,
}

impl ControlServer {
    pub fn new(state: ConsoleState) -> Self {
        Self { state }
    }

    /// Bind the configured address and serve forever
    pub async fn bind_and_serve(self) -> Result<()> {
        let listener = TcpListener::bind(&self.state.config().control_listen).await?;
        info!("Control listener on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let state = self.state.clone();
            let conn_id = uuid::Uuid::new_v4();
            let span = tracing::info_span!("proxy", %conn_id, %peer);

            tokio::spawn(
                async move {
                    debug!("Proxy connected");
                    if let Err(e) = handle_connection(state, stream).await {
                        warn!("Proxy connection ended with error: {}", e);
                    }
                    debug!("Proxy disconnected");
                }
                .instrument(span),
            );
        }
    }
}

async fn handle_connection(state: ConsoleState, stream: TcpStream) -> Result<()> {
    let mut reader = BufReader::new(stream);

    loop {
        let request = match read_message::<_, ControlRequest>(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(Error::Agent(msg)) => {
                warn!("Malformed control request: {}", msg);
                let reply = ControlReply::Error {
                    message: "malformed request".to_string(),
                };
                write_message(reader.get_mut(), &reply).await?;
                continue;
            }
            Err(e) => return Err(e),
        };

        let reply = dispatch(&state, request).await;
        write_message(reader.get_mut(), &reply).await?;
    }
}

/// Handle one control request
pub async fn dispatch(state: &ConsoleState, request: ControlRequest) -> ControlReply {
    match request {
        ControlRequest::Authenticate(auth) => {
            ControlReply::AuthResult(state.authenticator().authenticate(&auth).await)
        }
        ControlRequest::Startup { proxy_id } => {
            match state.keys().bootstrap_handler(&proxy_id) {
                Ok(AgentCommand::StartConsoleHandler { encryptor_password }) => {
                    info!("Sending console handler startup to proxy {}", proxy_id);
                    ControlReply::StartHandler { encryptor_password }
                }
                Ok(other) => {
                    error!("Unexpected bootstrap command {}", other.name());
                    ControlReply::Error {
                        message: "bootstrap failed".to_string(),
                    }
                }
                Err(e) => {
                    error!("Unable to bootstrap console proxy {}: {}", proxy_id, e);
                    ControlReply::Error {
                        message: "bootstrap failed".to_string(),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let json = r#"{"type":"authenticate","vmId":"vm-1","ticket":"abc123","sid":"s3cret","isReauthenticating":false}"#;
        match serde_json::from_str::<ControlRequest>(json).unwrap() {
            ControlRequest::Authenticate(req) => {
                assert_eq!(req.vm_id, "vm-1");
                assert_eq!(req.ticket, "abc123");
            }
            other => panic!("unexpected request {:?}", other),
        }

        let json = r#"{"type":"startup","proxy_id":"cp-1"}"#;
        assert!(matches!(
            serde_json::from_str::<ControlRequest>(json).unwrap(),
            ControlRequest::Startup { .. }
        ));
    }

    #[test]
    fn test_reply_wire_format() {
        let reply = ControlReply::AuthResult(AuthResponse::denied(true));
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("\"type\":\"auth_result\""));
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("\"isReauthenticating\":true"));
    }
}
