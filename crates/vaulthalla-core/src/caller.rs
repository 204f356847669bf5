//! Modeled RBAC boundary (§9 non-goals: no WebSocket/HTTP routers, no RBAC
//! enforcement layer here). A handler layer resolves a request into an
//! [`AuthenticatedCaller`] before calling into this crate; the checks below
//! are the minimum this crate needs to refuse an unauthorized mutation.

use uuid::Uuid;
use vaulthalla_catalog::PermissionSet;

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedCaller {
	pub user_id: Uuid,
	pub permissions: PermissionSet,
}

impl AuthenticatedCaller {
	pub fn require_read(&self, vault_id: Uuid) -> Result<()> {
		if self.permissions.read {
			Ok(())
		} else {
			Err(VaultError::PermissionDenied { vault_id, needed: "read" })
		}
	}

	pub fn require_write(&self, vault_id: Uuid) -> Result<()> {
		if self.permissions.write {
			Ok(())
		} else {
			Err(VaultError::PermissionDenied { vault_id, needed: "write" })
		}
	}

	pub fn require_admin(&self, vault_id: Uuid) -> Result<()> {
		if self.permissions.admin {
			Ok(())
		} else {
			Err(VaultError::PermissionDenied { vault_id, needed: "admin" })
		}
	}
}
