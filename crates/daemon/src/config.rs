//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory path
    pub store_path: PathBuf,

    /// Listen address for console proxy control connections
    pub control_listen: String,

    /// Ticket lifetime and sweeping
    pub tickets: TicketConfig,

    /// Host agent dispatch
    pub agent: AgentConfig,

    /// Database tuning
    pub database: DatabaseConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: consolegate_common::default_store_path(),
            control_listen: "127.0.0.1:8250".to_string(),
            tickets: TicketConfig::default(),
            agent: AgentConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

/// Ticket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Tickets older than this are swept
    pub ttl_secs: u64,

    /// Interval between sweeps
    pub sweep_interval_secs: u64,

    /// Random bytes per ticket value
    pub token_bytes: usize,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 300,
            token_bytes: 32,
        }
    }
}

/// Host agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Upper bound on one agent round-trip
    pub request_timeout_secs: u64,

    /// Upper bound on establishing the agent connection
    pub connect_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// How long a writer waits on a locked database
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would disable expiry or hang requests
    pub fn validate(&self) -> consolegate_common::Result<()> {
        use consolegate_common::Error;

        if self.tickets.ttl_secs == 0 {
            return Err(Error::InvalidConfig("tickets.ttl_secs must be > 0".to_string()));
        }
        if self.tickets.sweep_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "tickets.sweep_interval_secs must be > 0".to_string(),
            ));
        }
        if self.tickets.token_bytes < 16 {
            return Err(Error::InvalidConfig(
                "tickets.token_bytes must be at least 16".to_string(),
            ));
        }
        if self.agent.request_timeout_secs == 0 || self.agent.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig("agent timeouts must be > 0".to_string()));
        }
        Ok(())
    }

    /// Get the database path
    pub fn db_path(&self) -> PathBuf {
        self.store_path.join("state.db")
    }

    /// Ticket lifetime
    pub fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.tickets.ttl_secs)
    }

    /// Sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.tickets.sweep_interval_secs)
    }

    /// Agent round-trip timeout
    pub fn agent_request_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.request_timeout_secs)
    }

    /// Agent connect timeout
    pub fn agent_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.connect_timeout_secs)
    }

    /// Database busy timeout
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }
}
