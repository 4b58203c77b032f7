//! Host agent dispatch
//!
//! Sends a single command to the agent running on a host and waits, bounded,
//! for its answer. One attempt per call: callers decide what a failure means.

use crate::inventory::HostLookup;
use async_trait::async_trait;
use consolegate_common::agent::{read_message, write_message};
use consolegate_common::{AgentAnswer, AgentCommand, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Synchronous request/answer channel to host agents
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    /// Send `command` to the agent of `host_id`.
    ///
    /// Fails with `AgentUnavailable` when the agent cannot be reached and
    /// `AgentTimeout` when it does not answer in time.
    async fn send(&self, host_id: i64, command: AgentCommand) -> Result<AgentAnswer>;
}

/// Dispatcher speaking JSON lines over TCP to each host's agent address
pub struct TcpAgentDispatcher {
    hosts: Arc<dyn HostLookup>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpAgentDispatcher {
    pub fn new(
        hosts: Arc<dyn HostLookup>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            hosts,
            connect_timeout,
            request_timeout,
        }
    }

    async fn exchange(&self, address: &str, command: &AgentCommand) -> Result<AgentAnswer> {
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::AgentUnavailable(format!(
                    "connect to {} failed: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(Error::AgentUnavailable(format!(
                    "connect to {} timed out",
                    address
                )))
            }
        };

        let mut reader = BufReader::new(stream);
        write_message(reader.get_mut(), command).await?;

        match read_message::<_, AgentAnswer>(&mut reader).await? {
            Some(answer) => Ok(answer),
            None => Err(Error::AgentUnavailable(format!(
                "agent at {} closed the connection",
                address
            ))),
        }
    }
}

#[async_trait]
impl AgentDispatcher for TcpAgentDispatcher {
    async fn send(&self, host_id: i64, command: AgentCommand) -> Result<AgentAnswer> {
        let host = self
            .hosts
            .find_by_id(host_id)?
            .ok_or_else(|| Error::AgentUnavailable(format!("host {} is unknown", host_id)))?;

        let address = host
            .agent_address
            .ok_or_else(|| Error::AgentUnavailable(format!("host {} has no agent", host_id)))?;

        debug!(
            "Sending {} to agent of host {} at {}",
            command.name(),
            host_id,
            address
        );

        match tokio::time::timeout(self.request_timeout, self.exchange(&address, &command)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Agent of host {} did not answer {} within {:?}",
                    host_id,
                    command.name(),
                    self.request_timeout
                );
                Err(Error::AgentTimeout {
                    seconds: self.request_timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::DbInventory;
    use consolegate_common::Database;
    use tokio::net::TcpListener;

    fn inventory_with_agent(address: Option<&str>) -> Arc<dyn HostLookup> {
        let db = Database::open_memory().unwrap();
        {
            let conn = db.connection();
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO hosts (id, name, status, agent_address) VALUES (1, 'hv-1', 'up', ?1)",
                rusqlite::params![address],
            )
            .unwrap();
        }
        Arc::new(DbInventory::new(db))
    }

    fn dispatcher(hosts: Arc<dyn HostLookup>, request_timeout: Duration) -> TcpAgentDispatcher {
        TcpAgentDispatcher::new(hosts, Duration::from_secs(1), request_timeout)
    }

    fn get_vnc_port() -> AgentCommand {
        AgentCommand::GetVncPort {
            vm_id: 42,
            name: "i-2-42-VM".to_string(),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let cmd: AgentCommand = read_message(&mut reader).await.unwrap().unwrap();
            assert_eq!(cmd.name(), "get_vnc_port");
            write_message(reader.get_mut(), &AgentAnswer::console("10.0.0.9", Some(5902)))
                .await
                .unwrap();
        });

        let d = dispatcher(inventory_with_agent(Some(&addr)), Duration::from_secs(5));
        let answer = d.send(1, get_vnc_port()).await.unwrap();
        assert!(answer.result);
        assert_eq!(answer.address.as_deref(), Some("10.0.0.9"));
    }

    #[tokio::test]
    async fn test_silent_agent_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let d = dispatcher(inventory_with_agent(Some(&addr)), Duration::from_millis(200));
        let err = d.send(1, get_vnc_port()).await.unwrap_err();
        assert!(matches!(err, Error::AgentTimeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_agent_address_is_unavailable() {
        let d = dispatcher(inventory_with_agent(None), Duration::from_secs(1));
        let err = d.send(1, get_vnc_port()).await.unwrap_err();
        assert!(matches!(err, Error::AgentUnavailable(_)));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let d = dispatcher(inventory_with_agent(Some(&addr)), Duration::from_secs(1));
        let err = d.send(1, get_vnc_port()).await.unwrap_err();
        assert!(matches!(err, Error::AgentUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unknown_host_is_unavailable() {
        let d = dispatcher(inventory_with_agent(None), Duration::from_secs(1));
        let err = d.send(99, get_vnc_port()).await.unwrap_err();
        assert!(matches!(err, Error::AgentUnavailable(_)));
    }
}
