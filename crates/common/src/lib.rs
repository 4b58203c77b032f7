//! consolegate common library
//!
//! Shared types, persistence and wire formats for console access control.

pub mod agent;
pub mod crypto;
pub mod db;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use agent::{AgentAnswer, AgentCommand, ConsoleEndpoint};
pub use crypto::KeyIvPair;
pub use db::Database;
pub use error::{Error, Result};
pub use types::*;

/// consolegate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".consolegate")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
