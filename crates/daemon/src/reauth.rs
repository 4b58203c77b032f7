//! Re-authentication of an already granted console session
//!
//! Asks the VM's current host agent where its console is served now.

use crate::agent::AgentDispatcher;
use consolegate_common::agent::parse_console_address;
use consolegate_common::{AgentCommand, AuthResponse, ConsoleEndpoint, Error, Result, VmInstance};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Fetches a fresh console endpoint from the owning host agent
pub struct ReauthCoordinator {
    agents: Arc<dyn AgentDispatcher>,
}

impl ReauthCoordinator {
    pub fn new(agents: Arc<dyn AgentDispatcher>) -> Self {
        Self { agents }
    }

    /// Refresh connection details for `vm`.
    ///
    /// The answer is always tagged as a re-authentication response so the
    /// caller can tell a failed refresh from a denied initial authentication.
    pub async fn refresh(&self, vm: &VmInstance) -> AuthResponse {
        match self.lookup_endpoint(vm).await {
            Ok(endpoint) => {
                match &endpoint {
                    ConsoleEndpoint::Tunnel { url, session } => info!(
                        "Re-authentication result. vm: {}, tunnel url: {}, tunnel session: {}",
                        vm.id, url, session
                    ),
                    ConsoleEndpoint::Direct { host, port } => info!(
                        "Re-authentication result. vm: {}, host address: {}, port: {}",
                        vm.id, host, port
                    ),
                }
                AuthResponse::refreshed(endpoint)
            }
            Err(e) if e.is_agent_failure() => {
                warn!("Re-authentication request for vm {} failed: {}", vm.id, e);
                AuthResponse::denied(true)
            }
            Err(e) => {
                error!("Re-authentication for vm {} aborted: {}", vm.id, e);
                AuthResponse::denied(true)
            }
        }
    }

    /// Single agent round-trip, no retry
    pub async fn lookup_endpoint(&self, vm: &VmInstance) -> Result<ConsoleEndpoint> {
        let host_id = vm
            .host_id
            .ok_or_else(|| Error::not_found("host", format!("of vm {}", vm.id)))?;

        info!(
            "Re-authentication request, ask host {} for new console info",
            host_id
        );

        let answer = self
            .agents
            .send(
                host_id,
                AgentCommand::GetVncPort {
                    vm_id: vm.id,
                    name: vm.instance_name.clone(),
                },
            )
            .await?;

        if !answer.result {
            return Err(Error::Agent(format!(
                "agent reported failure: {}",
                answer.details.as_deref().unwrap_or("no details")
            )));
        }

        let address = answer
            .address
            .as_deref()
            .ok_or_else(|| Error::Agent("answer carries no console address".to_string()))?;

        parse_console_address(address, answer.port)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use consolegate_common::AgentAnswer;
    use parking_lot::Mutex;

    /// Dispatcher returning canned outcomes and recording what it was sent
    pub(crate) struct ScriptedAgent {
        pub outcome: Mutex<Option<Result<AgentAnswer>>>,
        pub sent: Mutex<Vec<(i64, AgentCommand)>>,
    }

    impl ScriptedAgent {
        pub(crate) fn answering(outcome: Result<AgentAnswer>) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(outcome)),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl AgentDispatcher for ScriptedAgent {
        async fn send(&self, host_id: i64, command: AgentCommand) -> Result<AgentAnswer> {
            self.sent.lock().push((host_id, command));
            self.outcome
                .lock()
                .take()
                .unwrap_or_else(|| Err(Error::Internal("agent called twice".to_string())))
        }
    }

    fn vm() -> VmInstance {
        VmInstance {
            id: 42,
            uuid: "vm-1".to_string(),
            instance_name: "i-2-42-VM".to_string(),
            host_id: Some(10),
            vnc_password: "s3cret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_direct_endpoint() {
        let agent = ScriptedAgent::answering(Ok(AgentAnswer::console("10.0.0.9", Some(5902))));
        let coordinator = ReauthCoordinator::new(agent.clone());

        let response = coordinator.refresh(&vm()).await;
        assert!(response.success && response.is_reauthenticating);
        assert_eq!(response.host.as_deref(), Some("10.0.0.9"));
        assert_eq!(response.port, Some(5902));
        assert!(response.tunnel_url.is_none());

        let sent = agent.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            (
                10,
                AgentCommand::GetVncPort {
                    vm_id: 42,
                    name: "i-2-42-VM".to_string()
                }
            )
        );
    }

    #[tokio::test]
    async fn test_tunnel_endpoint() {
        let agent = ScriptedAgent::answering(Ok(AgentAnswer::console(
            "consoleurl=https://esx-3.lab/ticket/abc&sessionref=5215f1",
            None,
        )));
        let response = ReauthCoordinator::new(agent).refresh(&vm()).await;
        assert!(response.success);
        assert_eq!(response.tunnel_url.as_deref(), Some("https://esx-3.lab/ticket/abc"));
        assert_eq!(response.tunnel_session.as_deref(), Some("5215f1"));
        assert!(response.host.is_none() && response.port.is_none());
    }

    #[tokio::test]
    async fn test_negative_answer_fails_refresh() {
        let agent = ScriptedAgent::answering(Ok(AgentAnswer::failed("vm not running")));
        let response = ReauthCoordinator::new(agent).refresh(&vm()).await;
        assert_eq!(response, AuthResponse::denied(true));
    }

    #[tokio::test]
    async fn test_timeout_fails_refresh_once() {
        let agent = ScriptedAgent::answering(Err(Error::AgentTimeout { seconds: 30 }));
        let response = ReauthCoordinator::new(agent.clone()).refresh(&vm()).await;
        assert!(!response.success);
        assert!(response.is_reauthenticating);
        assert_eq!(agent.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_answer_without_address_fails() {
        let agent = ScriptedAgent::answering(Ok(AgentAnswer {
            result: true,
            ..Default::default()
        }));
        let response = ReauthCoordinator::new(agent).refresh(&vm()).await;
        assert!(!response.success);
    }
}
