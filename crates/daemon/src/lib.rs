//! consolegate daemon
//!
//! Console access ticketing, authentication and proxy key bootstrap for the
//! management node.

pub mod agent;
pub mod authenticator;
pub mod config;
pub mod control;
pub mod inventory;
pub mod keys;
pub mod reauth;
pub mod state;
pub mod sweeper;
pub mod tickets;

pub use authenticator::ConsoleAuthenticator;
pub use config::DaemonConfig;
pub use control::ControlServer;
pub use state::ConsoleState;
