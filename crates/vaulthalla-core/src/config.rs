//! Daemon configuration (§6, §9 "process-wide, once-initialised dependency
//! bundle"): a YAML document loaded once at startup and validated before
//! [`crate::context::CoreContext::init`] touches the filesystem.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
	pub fuse_root: PathBuf,
	pub backing_root: PathBuf,
	pub cache_root: PathBuf,
	pub runtime_dir: PathBuf,
}

/// Fixed-size pool width per worker kind (§5). The sync controller owns the
/// `sync` pool; the others are sized here for a caller that wires up the
/// remaining pools (HTTP preview, WebSocket, stats, thumbnail) outside this
/// crate's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolsConfig {
	pub sync: usize,
	pub http: usize,
	pub ws: usize,
	pub stats: usize,
	pub thumbnail: usize,
}

impl Default for WorkerPoolsConfig {
	fn default() -> Self {
		Self { sync: 4, http: 4, ws: 4, stats: 1, thumbnail: 2 }
	}
}

/// Default S3-compatible endpoint settings, used to build a vault's
/// [`vaulthalla_s3::S3Config`] unless per-vault overrides are wired in by a
/// layer outside this crate (API key storage is a stated non-goal here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3DefaultsConfig {
	pub endpoint: String,
	pub region: String,
	pub access_key: String,
	pub secret_key: String,
	#[serde(default)]
	pub path_style: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
	pub paths: PathsConfig,
	#[serde(default)]
	pub worker_pools: WorkerPoolsConfig,
	/// Fallback sync interval for vaults whose policy doesn't set one.
	#[serde(default = "default_sync_interval_seconds")]
	pub default_sync_interval_seconds: u64,
	#[serde(default)]
	pub s3: Option<S3DefaultsConfig>,
}

fn default_sync_interval_seconds() -> u64 {
	300
}

impl VaultConfig {
	pub fn from_yaml(raw: &str) -> Result<Self> {
		let config: VaultConfig = serde_yaml::from_str(raw).map_err(|e| VaultError::InvalidConfig(e.to_string()))?;
		config.validate()?;
		Ok(config)
	}

	pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|e| VaultError::InvalidConfig(e.to_string()))?;
		Self::from_yaml(&raw)
	}

	fn validate(&self) -> Result<()> {
		let roots = [&self.paths.fuse_root, &self.paths.backing_root, &self.paths.cache_root, &self.paths.runtime_dir];
		for root in roots {
			if !root.is_absolute() {
				return Err(VaultError::InvalidConfig(format!("{} must be an absolute path", root.display())));
			}
		}
		for (i, a) in roots.iter().enumerate() {
			for b in &roots[i + 1..] {
				if a == b {
					return Err(VaultError::InvalidConfig(format!("duplicate root path: {}", a.display())));
				}
			}
		}
		if self.worker_pools.sync == 0 {
			return Err(VaultError::InvalidConfig("worker_pools.sync must be at least 1".into()));
		}
		Ok(())
	}
}
