//! Periodic expiry of console tickets
//!
//! Runs beside the authentication path, never inside it.

use crate::tickets::TicketRepository;
use consolegate_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Marks tickets older than the TTL as removed, on a fixed interval
pub struct TicketSweeper {
    tickets: Arc<dyn TicketRepository>,
    ttl: Duration,
    interval: Duration,
}

impl TicketSweeper {
    pub fn new(tickets: Arc<dyn TicketRepository>, ttl: Duration, interval: Duration) -> Self {
        Self {
            tickets,
            ttl,
            interval,
        }
    }

    /// Run the sweep loop
    pub async fn run(&self) {
        info!(
            "Ticket sweeper started (ttl {:?}, interval {:?})",
            self.ttl, self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            if let Err(e) = self.sweep_once() {
                error!("Ticket sweep error: {}", e);
            }
        }
    }

    /// One sweep pass; returns how many tickets were removed
    pub fn sweep_once(&self) -> Result<usize> {
        let before = chrono::Utc::now().timestamp() - self.ttl.as_secs() as i64;
        let swept = self.tickets.sweep_expired(before)?;
        debug!("Ticket sweep removed {} tickets created before {}", swept, before);
        Ok(swept)
    }
}
