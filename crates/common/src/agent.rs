//! Host agent wire protocol
//!
//! Commands and answers exchanged with host and console-proxy agents as
//! newline-delimited JSON, plus parsing of the console address an agent
//! reports for a VM.

use crate::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Command sent to an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AgentCommand {
    /// Ask a host agent where the console of a VM is served
    GetVncPort { vm_id: i64, name: String },
    /// Tell a console proxy to start serving, with its transport key material
    StartConsoleHandler { encryptor_password: String },
}

impl AgentCommand {
    /// Command name for logs
    pub fn name(&self) -> &'static str {
        match self {
            AgentCommand::GetVncPort { .. } => "get_vnc_port",
            AgentCommand::StartConsoleHandler { .. } => "start_console_handler",
        }
    }
}

/// Answer returned by an agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAnswer {
    pub result: bool,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl AgentAnswer {
    /// Successful answer carrying a console address
    pub fn console(address: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            result: true,
            details: None,
            address: Some(address.into()),
            port,
        }
    }

    /// Failed answer
    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            result: false,
            details: Some(details.into()),
            ..Default::default()
        }
    }
}

/// Where a viewer should connect to reach a VM console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConsoleEndpoint {
    /// Plain `host:port` access
    Direct { host: String, port: u16 },
    /// Indirect access through a hypervisor-provided tunnel
    Tunnel { url: String, session: String },
}

const TUNNEL_PREFIX: &str = "consoleurl=";
const INSTANCE_PREFIX: &str = "instanceId=";

/// Classify the console address reported by a host agent.
///
/// Accepted forms:
/// - `consoleurl=<url>&sessionref=<token>`: tunnel
/// - `instanceId=<host>`: direct, using the answer's port
/// - anything else: direct, the whole string is the host
pub fn parse_console_address(address: &str, port: Option<u16>) -> Result<ConsoleEndpoint> {
    let address = address.trim();

    if let Some(rest) = address.strip_prefix(TUNNEL_PREFIX) {
        let mut tokens = rest.splitn(2, '&');
        let raw_url = tokens.next().unwrap_or_default();
        let session = tokens
            .next()
            .and_then(|t| t.split_once('='))
            .map(|(_, v)| v.trim())
            .unwrap_or_default();

        let url = url::Url::parse(raw_url)
            .map_err(|e| Error::Agent(format!("invalid tunnel url: {}", e)))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::Agent("tunnel url has no host".to_string()));
        }
        if session.is_empty() {
            return Err(Error::Agent("tunnel address has no session".to_string()));
        }

        return Ok(ConsoleEndpoint::Tunnel {
            url: raw_url.to_string(),
            session: session.to_string(),
        });
    }

    let host = address
        .strip_prefix(INSTANCE_PREFIX)
        .unwrap_or(address)
        .trim();
    if host.is_empty() {
        return Err(Error::Agent("console address has no host".to_string()));
    }
    let port = port.ok_or_else(|| Error::Agent("console address has no port".to_string()))?;

    Ok(ConsoleEndpoint::Direct {
        host: host.to_string(),
        port,
    })
}

/// Write one message as a JSON line
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<()>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let line = serde_json::to_string(message)?;
    trace!("agent send: {}", line);
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// Longest accepted message line, newline excluded
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Read one JSON line; `None` on clean end of stream.
///
/// Oversized, non-UTF-8 and unparseable lines are skipped up to their newline
/// and reported as `Error::Agent`, so the stream stays usable afterwards.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>>
where
    R: AsyncBufRead + Unpin,
    M: DeserializeOwned,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_MESSAGE_BYTES as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }

    if buf.last() != Some(&b'\n') && buf.len() > MAX_MESSAGE_BYTES {
        discard_line(reader).await?;
        return Err(Error::Agent(format!(
            "message exceeds {} bytes",
            MAX_MESSAGE_BYTES
        )));
    }

    let line = String::from_utf8(buf)
        .map_err(|_| Error::Agent("message is not valid UTF-8".to_string()))?;
    trace!("agent recv: {}", line.trim());
    let message = serde_json::from_str(line.trim())
        .map_err(|e| Error::Agent(format!("invalid message: {}", e)))?;
    Ok(Some(message))
}

/// Drop buffered input up to and including the next newline
async fn discard_line<R>(reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (newline, available) = {
            let buf = reader.fill_buf().await?;
            (buf.iter().position(|b| *b == b'\n'), buf.len())
        };
        match newline {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None if available == 0 => return Ok(()),
            None => reader.consume(available),
        }
    }
}
