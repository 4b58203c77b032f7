//! Console access authentication
//!
//! Validates a console proxy's authentication request against the stored
//! ticket and the VM/host inventory. Every failure collapses into a plain
//! `success = false` answer; the reason is only logged.

use crate::inventory::{HostLookup, VmLookup};
use crate::reauth::ReauthCoordinator;
use crate::tickets::TicketRepository;
use consolegate_common::crypto::constant_time_eq;
use consolegate_common::types::redact;
use consolegate_common::{AuthRequest, AuthResponse, Error, Result, VmInstance};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Progress of a single authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Start,
    VmResolved,
    TicketResolved,
    HostResolved,
    SidMatched,
    Authorized,
}

impl std::fmt::Display for AuthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthStage::Start => write!(f, "start"),
            AuthStage::VmResolved => write!(f, "vm-resolved"),
            AuthStage::TicketResolved => write!(f, "ticket-resolved"),
            AuthStage::HostResolved => write!(f, "host-resolved"),
            AuthStage::SidMatched => write!(f, "sid-matched"),
            AuthStage::Authorized => write!(f, "authorized"),
        }
    }
}

/// Ticket-based console authenticator
pub struct ConsoleAuthenticator {
    vms: Arc<dyn VmLookup>,
    hosts: Arc<dyn HostLookup>,
    tickets: Arc<dyn TicketRepository>,
    reauth: ReauthCoordinator,
}

impl ConsoleAuthenticator {
    pub fn new(
        vms: Arc<dyn VmLookup>,
        hosts: Arc<dyn HostLookup>,
        tickets: Arc<dyn TicketRepository>,
        reauth: ReauthCoordinator,
    ) -> Self {
        Self {
            vms,
            hosts,
            tickets,
            reauth,
        }
    }

    /// Authenticate a console access request
    pub async fn authenticate(&self, request: &AuthRequest) -> AuthResponse {
        debug!(
            "Console authentication. Ticket in url for {}:{}-{} is {}",
            request.host,
            request.port,
            request.vm_id,
            redact(&request.ticket)
        );

        let mut stage = AuthStage::Start;
        let vm = match self.validate(request, &mut stage) {
            Ok(vm) => vm,
            Err(e) => {
                if e.is_denial() {
                    warn!(
                        "Console authentication denied for vm {} at {}: {}",
                        request.vm_id, stage, e
                    );
                } else {
                    error!(
                        "Console authentication failed for vm {} at {}: {}",
                        request.vm_id, stage, e
                    );
                }
                return AuthResponse::denied(false);
            }
        };

        if request.is_reauthenticating {
            return self.reauth.refresh(&vm).await;
        }

        info!("Console access granted for vm {}", vm.id);
        AuthResponse::granted()
    }

    /// Walk the validation steps, advancing `stage` as each one passes
    pub fn validate(&self, request: &AuthRequest, stage: &mut AuthStage) -> Result<VmInstance> {
        if request.ticket.is_empty() {
            return Err(Error::InvalidRequest("access ticket is missing".to_string()));
        }
        if request.vm_id.trim().is_empty() {
            return Err(Error::InvalidRequest(
                "vm id is empty (proxy session terminated?)".to_string(),
            ));
        }

        let vm = self
            .vms
            .resolve(&request.vm_id)?
            .ok_or_else(|| Error::not_found("vm", &request.vm_id))?;
        *stage = AuthStage::VmResolved;

        if !request.is_reauthenticating {
            self.spend_ticket(&vm, &request.ticket)?;
            *stage = AuthStage::TicketResolved;
        }

        let host_id = vm
            .host_id
            .ok_or_else(|| Error::not_found("host", format!("of vm {}", vm.id)))?;
        self.hosts
            .find_by_id(host_id)?
            .ok_or_else(|| Error::not_found("host", host_id))?;
        *stage = AuthStage::HostResolved;

        if !constant_time_eq(&request.sid, &vm.vnc_password) {
            return Err(Error::SessionMismatch);
        }
        *stage = AuthStage::SidMatched;

        *stage = AuthStage::Authorized;
        Ok(vm)
    }

    /// Resolve and consume the ticket; the conditional consume decides races
    fn spend_ticket(&self, vm: &VmInstance, ticket: &str) -> Result<()> {
        let found = self
            .tickets
            .find_fresh(vm.id, ticket)?
            .ok_or_else(|| Error::not_found("ticket", redact(ticket)))?;

        if found.is_consumed() {
            return Err(Error::TicketExpiredOrConsumed);
        }
        if !self.tickets.consume(found.id)? {
            return Err(Error::TicketExpiredOrConsumed);
        }

        debug!("Consumed ticket {} for vm {}", found.redacted(), vm.id);
        Ok(())
    }
}
