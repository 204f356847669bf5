//! Entity model for the catalog store: vaults, entries, trashed files,
//! operations, sync events, and the policy hierarchy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultType {
	Local,
	Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
	pub id: Uuid,
	pub name: String,
	pub description: String,
	pub kind: VaultType,
	pub owner_id: Uuid,
	pub quota_bytes: u64,
	/// Unique, opaque base32 identifier naming the vault's backing directory.
	/// Renaming `name` never moves backing data because this never changes.
	pub mount_alias: String,
	pub is_active: bool,
	pub api_key_id: Option<Uuid>,
	pub bucket: Option<String>,
	pub encrypt_upstream: bool,
}

impl Vault {
	pub fn is_cloud(&self) -> bool {
		matches!(self.kind, VaultType::Cloud)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
	pub id: Uuid,
	pub owner_id: Uuid,
	pub provider: String,
	pub region: String,
	pub access_key: String,
	/// Master-key AEAD ciphertext of the provider secret, plus its IV.
	pub secret_access_key_encrypted: Vec<u8>,
	pub secret_access_key_iv: [u8; 12],
	pub endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
	Directory,
	File,
}

/// Directory/File share this row shape; `kind` discriminates which
/// fields in [`EntryStats`] and [`FileMeta`] are meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
	pub id: Uuid,
	pub inode: u64,
	pub vault_id: Option<Uuid>,
	pub parent_id: Option<Uuid>,
	pub name: String,
	pub base32_alias: String,
	/// Vault-relative path, rooted at the vault's `/`.
	pub path: String,
	/// Mount-visible path.
	pub fuse_path: String,
	/// Opaque backing path under the daemon's backing root.
	pub backing_path: String,
	pub mode: u32,
	pub owner_uid: u32,
	pub group_gid: u32,
	pub is_hidden: bool,
	pub is_system: bool,
	pub created_by: Uuid,
	pub last_modified_by: Uuid,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub kind: EntryKind,
	pub dir_stats: Option<DirectoryStats>,
	pub file_meta: Option<FileMeta>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DirectoryStats {
	pub size_bytes: u64,
	pub file_count: u64,
	pub subdirectory_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
	pub size_bytes: u64,
	pub mime_type: Option<String>,
	pub content_hash: String,
	pub encryption_iv: String,
	pub encrypted_with_key_version: u32,
}

impl Entry {
	pub const ROOT_INODE: u64 = 1;

	pub fn is_root(&self) -> bool {
		self.inode == Self::ROOT_INODE && self.parent_id.is_none()
	}

	pub fn is_directory(&self) -> bool {
		matches!(self.kind, EntryKind::Directory)
	}

	pub fn is_file(&self) -> bool {
		matches!(self.kind, EntryKind::File)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashedFile {
	pub id: Uuid,
	pub vault_id: Uuid,
	pub base32_alias: String,
	pub path: String,
	pub backing_path: String,
	pub trashed_at: DateTime<Utc>,
	pub trashed_by: Uuid,
	pub deleted_at: Option<DateTime<Utc>>,
	pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
	Move,
	Rename,
	Copy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
	pub id: Uuid,
	pub vault_id: Uuid,
	pub file_id: Uuid,
	pub kind: OperationKind,
	pub source_path: String,
	pub destination_path: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
	Pending,
	Running,
	Success,
	Error,
	Cancelled,
}

impl SyncStatus {
	pub fn is_terminal(self) -> bool {
		matches!(self, SyncStatus::Success | SyncStatus::Error | SyncStatus::Cancelled)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncTrigger {
	Scheduled,
	Manual,
	Webhook,
	KeyRotation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
	pub id: Uuid,
	pub vault_id: Uuid,
	pub status: SyncStatus,
	pub trigger: SyncTrigger,
	pub timestamp_begin: DateTime<Utc>,
	pub timestamp_end: Option<DateTime<Utc>>,
	pub heartbeat_at: DateTime<Utc>,
	pub error_message: Option<String>,
	pub config_hash: String,
	pub throughputs: Vec<Throughput>,
	pub conflicts: Vec<Conflict>,
}

impl SyncEvent {
	pub fn total_failed_ops(&self) -> u64 {
		self.throughputs.iter().map(|t| t.failed_ops).sum()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThroughputMetric {
	Upload,
	Download,
	Rename,
	Copy,
	Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopedOp {
	pub size_bytes: u64,
	pub t_begin: DateTime<Utc>,
	pub t_end: Option<DateTime<Utc>>,
	pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Throughput {
	pub metric: ThroughputMetric,
	pub num_ops: u64,
	pub failed_ops: u64,
	pub size_bytes: u64,
	pub duration_ms: u64,
	pub scoped_ops: Vec<ScopedOp>,
}

impl Throughput {
	pub fn new(metric: ThroughputMetric) -> Self {
		Self {
			metric,
			num_ops: 0,
			failed_ops: 0,
			size_bytes: 0,
			duration_ms: 0,
			scoped_ops: Vec::new(),
		}
	}

	/// Recompute the roll-up fields from `scoped_ops`, per the original's
	/// `computeDashboardStats` rather than accumulating inline.
	pub fn recompute(&mut self) {
		self.num_ops = self.scoped_ops.len() as u64;
		self.failed_ops = self.scoped_ops.iter().filter(|op| !op.success).count() as u64;
		self.size_bytes = self.scoped_ops.iter().map(|op| op.size_bytes).sum();
		self.duration_ms = self
			.scoped_ops
			.iter()
			.map(|op| {
				let end = op.t_end.unwrap_or(op.t_begin);
				(end - op.t_begin).num_milliseconds().max(0) as u64
			})
			.sum();
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolution {
	KeptLocal,
	KeptUpstream,
	KeptBoth,
	Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictArtifacts {
	pub local: Option<String>,
	pub upstream: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
	pub file_id: Uuid,
	pub event_id: Uuid,
	pub artifacts: ConflictArtifacts,
	pub reasons: Vec<String>,
	pub resolution: ConflictResolution,
	pub failed_to_decrypt_upstream: bool,
	pub created_at: DateTime<Utc>,
	pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalConflictPolicy {
	Overwrite,
	KeepBoth,
	/// Defers to operator action; the conflict is recorded `Unresolved`.
	Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteStrategy {
	Sync,
	Mirror,
	Cache,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteConflictResolution {
	KeptLocal,
	KeptUpstream,
	Unresolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBase {
	pub id: Uuid,
	pub interval_seconds: u64,
	pub enabled: bool,
	pub last_sync_at: Option<DateTime<Utc>>,
	pub config_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPolicy {
	pub base: PolicyBase,
	pub conflict_policy: LocalConflictPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePolicy {
	pub base: PolicyBase,
	pub strategy: RemoteStrategy,
	pub conflict_resolution: RemoteConflictResolution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Policy {
	Local(LocalPolicy),
	Remote(RemotePolicy),
}

impl Policy {
	pub fn base(&self) -> &PolicyBase {
		match self {
			Policy::Local(p) => &p.base,
			Policy::Remote(p) => &p.base,
		}
	}

	pub fn base_mut(&mut self) -> &mut PolicyBase {
		match self {
			Policy::Local(p) => &mut p.base,
			Policy::Remote(p) => &mut p.base,
		}
	}
}

/// Per-vault encrypted key row, as persisted by the catalog on behalf of
/// `vaulthalla-crypto`'s `VaultKeyStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultKeyRow {
	pub vault_id: Uuid,
	pub version: u32,
	pub encrypted_key: Vec<u8>,
	pub iv: [u8; 12],
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
	pub read: bool,
	pub write: bool,
	pub admin: bool,
}

impl PermissionSet {
	pub fn owner() -> Self {
		Self {
			read: true,
			write: true,
			admin: true,
		}
	}

	pub fn read_only() -> Self {
		Self {
			read: true,
			write: false,
			admin: false,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
	pub id: Uuid,
	pub name: String,
	pub group_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
	pub id: Uuid,
	pub name: String,
	pub member_ids: Vec<Uuid>,
}
