//! Console access ticket store
//!
//! Tickets are issued when a console session is offered to a client, spent
//! once on first authentication, and soft-removed by the expiry sweep.

use consolegate_common::{crypto, db::Database, types::redact, Result, Ticket};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};

/// Persistence boundary for console tickets
pub trait TicketRepository: Send + Sync {
    /// Create and persist a fresh ticket for a VM
    fn issue(&self, vm_id: i64) -> Result<Ticket>;

    /// Look up a live ticket by VM and value, consumed or not
    fn find_fresh(&self, vm_id: i64, ticket: &str) -> Result<Option<Ticket>>;

    /// Set `taken_at` if still unset; returns whether this call set it
    fn consume(&self, ticket_id: i64) -> Result<bool>;

    /// Mark every ticket created before `before` as removed; returns the count
    fn sweep_expired(&self, before: i64) -> Result<usize>;

    /// Live tickets of a VM, newest first
    fn list_by_vm(&self, vm_id: i64) -> Result<Vec<Ticket>>;
}

/// SQLite-backed ticket store
#[derive(Clone)]
pub struct TicketStore {
    db: Database,
    token_bytes: usize,
}

const TICKET_COLUMNS: &str = "id, ticket, vm_id, created_at, taken_at, removed";

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        ticket: row.get(1)?,
        vm_id: row.get(2)?,
        created_at: row.get(3)?,
        taken_at: row.get(4)?,
        removed: row.get(5)?,
    })
}

impl TicketStore {
    /// Create a store over the shared database
    pub fn new(db: Database, token_bytes: usize) -> Self {
        Self { db, token_bytes }
    }

    /// Fetch a ticket by row id, including removed ones
    pub fn get(&self, ticket_id: i64) -> Result<Option<Ticket>> {
        let conn = self.db.lock()?;
        let ticket = conn
            .query_row(
                &format!("SELECT {} FROM console_tickets WHERE id = ?1", TICKET_COLUMNS),
                params![ticket_id],
                ticket_from_row,
            )
            .optional()?;
        Ok(ticket)
    }
}

impl TicketRepository for TicketStore {
    fn issue(&self, vm_id: i64) -> Result<Ticket> {
        let value = crypto::generate_ticket(self.token_bytes);
        let now = chrono::Utc::now().timestamp();

        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO console_tickets (ticket, vm_id, created_at) VALUES (?1, ?2, ?3)",
            params![value, vm_id, now],
        )?;
        let id = conn.last_insert_rowid();

        debug!("Issued console ticket {} for vm {}", redact(&value), vm_id);

        Ok(Ticket {
            id,
            ticket: value,
            vm_id,
            created_at: now,
            taken_at: None,
            removed: None,
        })
    }

    fn find_fresh(&self, vm_id: i64, ticket: &str) -> Result<Option<Ticket>> {
        let conn = self.db.lock()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM console_tickets
                     WHERE vm_id = ?1 AND ticket = ?2 AND removed IS NULL",
                    TICKET_COLUMNS
                ),
                params![vm_id, ticket],
                ticket_from_row,
            )
            .optional()?;
        Ok(found)
    }

    fn consume(&self, ticket_id: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.db.lock()?;
        let rows = conn.execute(
            "UPDATE console_tickets SET taken_at = ?1 WHERE id = ?2 AND taken_at IS NULL",
            params![now, ticket_id],
        )?;
        Ok(rows == 1)
    }

    fn sweep_expired(&self, before: i64) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.db.lock()?;
        let rows = conn.execute(
            "UPDATE console_tickets SET removed = ?1 WHERE created_at < ?2 AND removed IS NULL",
            params![now, before],
        )?;
        if rows > 0 {
            info!("Swept {} expired console tickets", rows);
        }
        Ok(rows)
    }

    fn list_by_vm(&self, vm_id: i64) -> Result<Vec<Ticket>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM console_tickets
             WHERE vm_id = ?1 AND removed IS NULL
             ORDER BY created_at DESC, id DESC",
            TICKET_COLUMNS
        ))?;
        let rows = stmt.query_map(params![vm_id], ticket_from_row)?;

        let mut tickets = Vec::new();
        for row in rows {
            tickets.push(row?);
        }
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> TicketStore {
        TicketStore::new(Database::open_memory().unwrap(), 32)
    }

    /// Backdate a ticket's creation time
    fn set_created_at(store: &TicketStore, id: i64, created_at: i64) {
        let conn = store.db.connection();
        let conn = conn.lock();
        conn.execute(
            "UPDATE console_tickets SET created_at = ?1 WHERE id = ?2",
            params![created_at, id],
        )
        .unwrap();
    }

    #[test]
    fn test_issue_and_find() {
        let store = store();
        let ticket = store.issue(7).unwrap();
        assert_eq!(ticket.ticket.len(), 64);
        assert!(ticket.taken_at.is_none());

        let found = store.find_fresh(7, &ticket.ticket).unwrap().unwrap();
        assert_eq!(found, ticket);

        assert!(store.find_fresh(8, &ticket.ticket).unwrap().is_none());
        assert!(store.find_fresh(7, "nope").unwrap().is_none());
    }

    #[test]
    fn test_consume_sets_taken_at_once() {
        let store = store();
        let ticket = store.issue(1).unwrap();

        assert!(store.consume(ticket.id).unwrap());
        let first = store.get(ticket.id).unwrap().unwrap().taken_at;
        assert!(first.is_some());

        set_taken_at_marker(&store, ticket.id);
        assert!(!store.consume(ticket.id).unwrap());
        let after = store.get(ticket.id).unwrap().unwrap().taken_at;
        assert_eq!(after, Some(1));
    }

    /// Pin taken_at to a sentinel so a second consume is observable
    fn set_taken_at_marker(store: &TicketStore, id: i64) {
        let conn = store.db.connection();
        let conn = conn.lock();
        conn.execute(
            "UPDATE console_tickets SET taken_at = 1 WHERE id = ?1",
            params![id],
        )
        .unwrap();
    }

    #[test]
    fn test_find_fresh_returns_consumed_tickets() {
        let store = store();
        let ticket = store.issue(1).unwrap();
        store.consume(ticket.id).unwrap();

        let found = store.find_fresh(1, &ticket.ticket).unwrap().unwrap();
        assert!(found.is_consumed());
    }

    #[test]
    fn test_sweep_hides_old_tickets() {
        let store = store();
        let old = store.issue(3).unwrap();
        let young = store.issue(3).unwrap();
        let now = chrono::Utc::now().timestamp();
        set_created_at(&store, old.id, now - 7200);

        assert_eq!(store.sweep_expired(now - 3600).unwrap(), 1);
        assert!(store.find_fresh(3, &old.ticket).unwrap().is_none());
        assert!(store.find_fresh(3, &young.ticket).unwrap().is_some());
        assert!(store.get(old.id).unwrap().unwrap().removed.is_some());

        // already removed rows are not counted again
        assert_eq!(store.sweep_expired(now - 3600).unwrap(), 0);
    }

    #[test]
    fn test_list_by_vm() {
        let store = store();
        let a = store.issue(5).unwrap();
        let b = store.issue(5).unwrap();
        store.issue(6).unwrap();

        let listed = store.list_by_vm(5).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[test]
    fn test_consume_times_out_on_busy_store() {
        let db = Database::open_memory()
            .unwrap()
            .with_lock_timeout(std::time::Duration::from_millis(100));
        let store = TicketStore::new(db, 32);
        let ticket = store.issue(3).unwrap();

        let conn = store.db.connection();
        let held = conn.lock();
        let started = std::time::Instant::now();
        assert!(matches!(
            store.consume(ticket.id).unwrap_err(),
            consolegate_common::Error::StoreTimeout { millis: 100 }
        ));
        assert!(matches!(
            store.find_fresh(3, &ticket.ticket).unwrap_err(),
            consolegate_common::Error::StoreTimeout { .. }
        ));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        drop(held);

        // the timed-out consume left the ticket unspent
        assert!(store.get(ticket.id).unwrap().unwrap().taken_at.is_none());
        assert!(store.consume(ticket.id).unwrap());
    }
}
