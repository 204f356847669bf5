//! Sync planner (C11): walks the sorted union of local/remote keys and
//! decides, per key, which action the executor should take.
//!
//! Grounded on `spec.md` §4.11. Remote object keys are vault-relative
//! paths (see `vaulthalla_storage::cloud::object_key`), so `local_map` and
//! `s3_map` share a key space without any alias lookup.

use std::collections::{BTreeMap, HashMap, HashSet};

use vaulthalla_catalog::{RemoteConflictResolution, RemotePolicy, RemoteStrategy};

/// A file as the catalog currently has it.
#[derive(Debug, Clone)]
pub struct LocalRecord {
	pub size_bytes: u64,
	pub content_hash: String,
}

/// A file as the remote listing currently has it. `content_hash` is only
/// populated for keys present in both maps — `initBins` only pays for a
/// HEAD request on the intersection, not every remote object.
#[derive(Debug, Clone)]
pub struct RemoteRecord {
	pub size_bytes: u64,
	pub content_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
	/// Directories the upcoming uploads need but don't yet exist remotely.
	/// Not emitted by [`build_plan`] itself — the executor derives it from
	/// the plan's upload paths via `extract_directories`, since that needs
	/// a catalog lookup `build_plan` has no business making.
	EnsureDirectories(Vec<String>),
	Upload { path: String, size_bytes: u64 },
	Download { path: String, size_bytes: u64, free_after_download: bool },
	DeleteRemote { path: String },
	DeleteLocal { path: String },
}

impl PlanAction {
	fn phase(&self) -> u8 {
		match self {
			PlanAction::EnsureDirectories(_) => 0,
			PlanAction::Upload { .. } => 1,
			PlanAction::Download { .. } => 2,
			PlanAction::DeleteRemote { .. } => 3,
			PlanAction::DeleteLocal { .. } => 4,
		}
	}

	fn sort_key(&self) -> &str {
		match self {
			PlanAction::EnsureDirectories(_) => "",
			PlanAction::Upload { path, .. } => path,
			PlanAction::Download { path, .. } => path,
			PlanAction::DeleteRemote { path } => path,
			PlanAction::DeleteLocal { path } => path,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct Plan {
	pub actions: Vec<PlanAction>,
}

impl Plan {
	pub fn download_bytes(&self) -> u64 {
		self.actions
			.iter()
			.map(|a| match a {
				PlanAction::Download { size_bytes, .. } => *size_bytes,
				_ => 0,
			})
			.sum()
	}

	fn sort(&mut self) {
		self.actions.sort_by(|a, b| a.phase().cmp(&b.phase()).then_with(|| a.sort_key().cmp(b.sort_key())));
	}
}

/// True when a key present on both sides might need a conflict decision:
/// sizes differ, the (known) hashes differ, or the remote copy failed to
/// decrypt during inspection.
pub fn has_potential_conflict(local: &LocalRecord, remote: &RemoteRecord, upstream_decryption_failed: bool) -> bool {
	if upstream_decryption_failed {
		return true;
	}
	if local.size_bytes != remote.size_bytes {
		return true;
	}
	match &remote.content_hash {
		Some(hash) => hash != &local.content_hash,
		None => false,
	}
}

fn uploads_allowed(policy: &RemotePolicy) -> bool {
	match policy.strategy {
		RemoteStrategy::Sync => true,
		RemoteStrategy::Mirror => policy.conflict_resolution == RemoteConflictResolution::KeptLocal,
		RemoteStrategy::Cache => false,
	}
}

fn downloads_allowed(policy: &RemotePolicy) -> bool {
	match policy.strategy {
		RemoteStrategy::Sync | RemoteStrategy::Cache => true,
		RemoteStrategy::Mirror => policy.conflict_resolution == RemoteConflictResolution::KeptUpstream,
	}
}

/// Builds the plan for one cloud sync pass.
///
/// `decrypt_failed` names the (both-sides) keys whose remote copy could not
/// be decrypted during inspection — surfaced to `hasPotentialConflict` as
/// `upstream_decryption_failed`.
pub fn build_plan(
	local_map: &BTreeMap<String, LocalRecord>,
	s3_map: &BTreeMap<String, RemoteRecord>,
	decrypt_failed: &HashSet<String>,
	policy: &RemotePolicy,
) -> Plan {
	let mut plan = Plan::default();
	let mut keys: Vec<&String> = local_map.keys().chain(s3_map.keys()).map(|k| (k, ())).collect::<HashMap<_, ()>>().into_keys().collect();
	keys.sort();

	let uploads_ok = uploads_allowed(policy);
	let downloads_ok = downloads_allowed(policy);
	let cache_mode = policy.strategy == RemoteStrategy::Cache;
	let mirror_keep_remote = policy.strategy == RemoteStrategy::Mirror && policy.conflict_resolution == RemoteConflictResolution::KeptUpstream;
	let mirror_keep_local = policy.strategy == RemoteStrategy::Mirror && policy.conflict_resolution == RemoteConflictResolution::KeptLocal;

	for key in keys {
		match (local_map.get(key), s3_map.get(key)) {
			(Some(local), None) => {
				if uploads_ok {
					plan.actions.push(PlanAction::Upload { path: key.clone(), size_bytes: local.size_bytes });
				} else if mirror_keep_remote {
					plan.actions.push(PlanAction::DeleteLocal { path: key.clone() });
				}
			}
			(None, Some(remote)) => {
				if downloads_ok {
					plan.actions.push(PlanAction::Download { path: key.clone(), size_bytes: remote.size_bytes, free_after_download: cache_mode });
				} else if mirror_keep_local {
					plan.actions.push(PlanAction::DeleteRemote { path: key.clone() });
				}
			}
			(Some(local), Some(remote)) => {
				let sizes_equal = local.size_bytes == remote.size_bytes;
				let hashes_equal = remote.content_hash.as_deref().map(|h| h == local.content_hash).unwrap_or(true);
				if sizes_equal && hashes_equal && !decrypt_failed.contains(key) {
					continue;
				}

				let failed = decrypt_failed.contains(key);
				if has_potential_conflict(local, remote, failed) {
					match policy.conflict_resolution {
						RemoteConflictResolution::KeptLocal => plan.actions.push(PlanAction::Upload { path: key.clone(), size_bytes: local.size_bytes }),
						RemoteConflictResolution::KeptUpstream => {
							plan.actions.push(PlanAction::Download { path: key.clone(), size_bytes: remote.size_bytes, free_after_download: cache_mode })
						}
						RemoteConflictResolution::Unresolved => {}
					}
				}
				// Not flagged as a conflict but still not byte-identical: the
				// only known shape is a known-size, unknown-hash remote copy.
				// There's no remote mtime in the listing to break the tie on,
				// so this is left for the operator rather than guessed at.
			}
			(None, None) => unreachable!("key came from one of the two maps"),
		}
	}

	plan.sort();
	plan
}

#[cfg(test)]
mod tests {
	use super::*;
	use uuid::Uuid;
	use vaulthalla_catalog::PolicyBase;

	fn policy(strategy: RemoteStrategy, conflict_resolution: RemoteConflictResolution) -> RemotePolicy {
		RemotePolicy {
			base: PolicyBase { id: Uuid::new_v4(), interval_seconds: 300, enabled: true, last_sync_at: None, config_hash: "h".into() },
			strategy,
			conflict_resolution,
		}
	}

	#[test]
	fn sync_uploads_local_only_and_downloads_remote_only() {
		let mut local = BTreeMap::new();
		local.insert("/a.txt".to_string(), LocalRecord { size_bytes: 10, content_hash: "h1".into() });
		let mut remote = BTreeMap::new();
		remote.insert("/b.txt".to_string(), RemoteRecord { size_bytes: 20, content_hash: None });

		let plan = build_plan(&local, &remote, &HashSet::new(), &policy(RemoteStrategy::Sync, RemoteConflictResolution::Unresolved));

		assert!(plan.actions.iter().any(|a| matches!(a, PlanAction::Upload { path, .. } if path == "/a.txt")));
		assert!(plan.actions.iter().any(|a| matches!(a, PlanAction::Download { path, .. } if path == "/b.txt")));
	}

	#[test]
	fn identical_contents_produce_no_action() {
		let mut local = BTreeMap::new();
		local.insert("/a.txt".to_string(), LocalRecord { size_bytes: 10, content_hash: "h1".into() });
		let mut remote = BTreeMap::new();
		remote.insert("/a.txt".to_string(), RemoteRecord { size_bytes: 10, content_hash: Some("h1".into()) });

		let plan = build_plan(&local, &remote, &HashSet::new(), &policy(RemoteStrategy::Sync, RemoteConflictResolution::Unresolved));
		assert!(plan.actions.is_empty());
	}

	#[test]
	fn conflicting_contents_resolve_per_policy() {
		let mut local = BTreeMap::new();
		local.insert("/a.txt".to_string(), LocalRecord { size_bytes: 10, content_hash: "h1".into() });
		let mut remote = BTreeMap::new();
		remote.insert("/a.txt".to_string(), RemoteRecord { size_bytes: 99, content_hash: Some("h2".into()) });

		let kept_local = build_plan(&local, &remote, &HashSet::new(), &policy(RemoteStrategy::Sync, RemoteConflictResolution::KeptLocal));
		assert!(matches!(kept_local.actions[0], PlanAction::Upload { .. }));

		let kept_upstream = build_plan(&local, &remote, &HashSet::new(), &policy(RemoteStrategy::Sync, RemoteConflictResolution::KeptUpstream));
		assert!(matches!(kept_upstream.actions[0], PlanAction::Download { .. }));

		let unresolved = build_plan(&local, &remote, &HashSet::new(), &policy(RemoteStrategy::Sync, RemoteConflictResolution::Unresolved));
		assert!(unresolved.actions.is_empty());
	}

	#[test]
	fn mirror_keep_local_deletes_remote_leftovers() {
		let local = BTreeMap::new();
		let mut remote = BTreeMap::new();
		remote.insert("/stale.txt".to_string(), RemoteRecord { size_bytes: 5, content_hash: None });

		let plan = build_plan(&local, &remote, &HashSet::new(), &policy(RemoteStrategy::Mirror, RemoteConflictResolution::KeptLocal));
		assert_eq!(plan.actions, vec![PlanAction::DeleteRemote { path: "/stale.txt".to_string() }]);
	}

	#[test]
	fn cache_strategy_never_uploads_or_ensures_directories() {
		let mut local = BTreeMap::new();
		local.insert("/a.txt".to_string(), LocalRecord { size_bytes: 10, content_hash: "h1".into() });
		let mut remote = BTreeMap::new();
		remote.insert("/b.txt".to_string(), RemoteRecord { size_bytes: 20, content_hash: None });

		let plan = build_plan(&local, &remote, &HashSet::new(), &policy(RemoteStrategy::Cache, RemoteConflictResolution::Unresolved));
		assert!(!plan.actions.iter().any(|a| matches!(a, PlanAction::Upload { .. } | PlanAction::EnsureDirectories(_))));
		assert!(matches!(plan.actions[0], PlanAction::Download { free_after_download: true, .. }));
	}

	#[test]
	fn plan_is_deterministic_for_the_same_inputs() {
		let mut local = BTreeMap::new();
		local.insert("/z.txt".to_string(), LocalRecord { size_bytes: 1, content_hash: "h".into() });
		local.insert("/a.txt".to_string(), LocalRecord { size_bytes: 1, content_hash: "h".into() });
		let remote = BTreeMap::new();
		let p = policy(RemoteStrategy::Sync, RemoteConflictResolution::Unresolved);

		let first = build_plan(&local, &remote, &HashSet::new(), &p);
		let second = build_plan(&local, &remote, &HashSet::new(), &p);
		assert_eq!(first.actions, second.actions);
	}
}
