//! Read-only VM and host lookups
//!
//! The inventory tables belong to the orchestration layer; nothing here writes them.

use consolegate_common::{db::Database, Host, HostStatus, Result, VmInstance};
use rusqlite::{params, OptionalExtension, Row};

/// VM resolution
pub trait VmLookup: Send + Sync {
    fn find_by_uuid(&self, uuid: &str) -> Result<Option<VmInstance>>;
    fn find_by_id(&self, id: i64) -> Result<Option<VmInstance>>;

    /// Resolve by UUID first, then by numeric id
    fn resolve(&self, vm_id: &str) -> Result<Option<VmInstance>> {
        if let Some(vm) = self.find_by_uuid(vm_id)? {
            return Ok(Some(vm));
        }
        match vm_id.trim().parse::<i64>() {
            Ok(id) => self.find_by_id(id),
            Err(_) => Ok(None),
        }
    }
}

/// Host resolution
pub trait HostLookup: Send + Sync {
    fn find_by_id(&self, id: i64) -> Result<Option<Host>>;
}

/// Inventory lookups over the shared database
#[derive(Clone)]
pub struct DbInventory {
    db: Database,
}

impl DbInventory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

const VM_COLUMNS: &str = "id, uuid, instance_name, host_id, vnc_password";

fn vm_from_row(row: &Row<'_>) -> rusqlite::Result<VmInstance> {
    Ok(VmInstance {
        id: row.get(0)?,
        uuid: row.get(1)?,
        instance_name: row.get(2)?,
        host_id: row.get(3)?,
        vnc_password: row.get(4)?,
    })
}

impl VmLookup for DbInventory {
    fn find_by_uuid(&self, uuid: &str) -> Result<Option<VmInstance>> {
        let conn = self.db.lock()?;
        let vm = conn
            .query_row(
                &format!("SELECT {} FROM vm_instances WHERE uuid = ?1", VM_COLUMNS),
                params![uuid],
                vm_from_row,
            )
            .optional()?;
        Ok(vm)
    }

    fn find_by_id(&self, id: i64) -> Result<Option<VmInstance>> {
        let conn = self.db.lock()?;
        let vm = conn
            .query_row(
                &format!("SELECT {} FROM vm_instances WHERE id = ?1", VM_COLUMNS),
                params![id],
                vm_from_row,
            )
            .optional()?;
        Ok(vm)
    }
}

impl HostLookup for DbInventory {
    fn find_by_id(&self, id: i64) -> Result<Option<Host>> {
        let conn = self.db.lock()?;
        let row: Option<(i64, String, String, Option<String>)> = conn
            .query_row(
                "SELECT id, name, status, agent_address FROM hosts WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        match row {
            Some((id, name, status, agent_address)) => Ok(Some(Host {
                id,
                name,
                status: status.parse().unwrap_or(HostStatus::Unknown),
                agent_address,
            })),
            None => Ok(None),
        }
    }
}
