//! Wiring of the console access components

use crate::agent::{AgentDispatcher, TcpAgentDispatcher};
use crate::authenticator::ConsoleAuthenticator;
use crate::config::DaemonConfig;
use crate::inventory::{DbInventory, VmLookup};
use crate::keys::{DbKeyMaterialService, SessionKeyManager};
use crate::reauth::ReauthCoordinator;
use crate::sweeper::TicketSweeper;
use crate::tickets::{TicketRepository, TicketStore};
use consolegate_common::{db::Database, Error, Result, Ticket};
use std::sync::Arc;
use tracing::info;

/// Shared handles for everything serving console access
#[derive(Clone)]
pub struct ConsoleState {
    config: DaemonConfig,
    inventory: Arc<DbInventory>,
    tickets: Arc<TicketStore>,
    authenticator: Arc<ConsoleAuthenticator>,
    keys: Arc<SessionKeyManager>,
}

impl ConsoleState {
    /// Open the database from the configured store and wire the components
    pub fn new(config: &DaemonConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.store_path)?;
        let db = Database::open_with_timeout(config.db_path(), config.busy_timeout())?;
        Ok(Self::with_database(config, db))
    }

    /// Wire the components over an existing database, dispatching to agents over TCP
    pub fn with_database(config: &DaemonConfig, db: Database) -> Self {
        let db = db.with_lock_timeout(config.busy_timeout());
        let inventory = Arc::new(DbInventory::new(db.clone()));
        let agents = Arc::new(TcpAgentDispatcher::new(
            inventory.clone(),
            config.agent_connect_timeout(),
            config.agent_request_timeout(),
        ));
        Self::assemble(config, db, inventory, agents)
    }

    /// Wire the components with a caller-provided agent dispatcher
    pub fn with_dispatcher(
        config: &DaemonConfig,
        db: Database,
        agents: Arc<dyn AgentDispatcher>,
    ) -> Self {
        let db = db.with_lock_timeout(config.busy_timeout());
        let inventory = Arc::new(DbInventory::new(db.clone()));
        Self::assemble(config, db, inventory, agents)
    }

    fn assemble(
        config: &DaemonConfig,
        db: Database,
        inventory: Arc<DbInventory>,
        agents: Arc<dyn AgentDispatcher>,
    ) -> Self {
        let tickets = Arc::new(TicketStore::new(db.clone(), config.tickets.token_bytes));
        let authenticator = Arc::new(ConsoleAuthenticator::new(
            inventory.clone(),
            inventory.clone(),
            tickets.clone(),
            ReauthCoordinator::new(agents),
        ));
        let keys = Arc::new(SessionKeyManager::new(Arc::new(DbKeyMaterialService::new(db))));

        Self {
            config: config.clone(),
            inventory,
            tickets,
            authenticator,
            keys,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Get the ticket store
    pub fn tickets(&self) -> &TicketStore {
        &self.tickets
    }

    /// Get the authenticator
    pub fn authenticator(&self) -> &ConsoleAuthenticator {
        &self.authenticator
    }

    /// Get the session key manager
    pub fn keys(&self) -> &SessionKeyManager {
        &self.keys
    }

    /// Build the expiry sweeper for this state's ticket store
    pub fn sweeper(&self) -> TicketSweeper {
        TicketSweeper::new(
            self.tickets.clone(),
            self.config.ticket_ttl(),
            self.config.sweep_interval(),
        )
    }

    /// Issue a console ticket for a VM given by UUID or numeric id
    pub fn issue_ticket(&self, vm_id: &str) -> Result<Ticket> {
        let vm = self
            .inventory
            .resolve(vm_id)?
            .ok_or_else(|| Error::not_found("vm", vm_id))?;
        let ticket = self.tickets.issue(vm.id)?;
        info!("Issued console ticket for vm {} ({})", vm.uuid, vm.id);
        Ok(ticket)
    }
}
