//! Path resolver (C4): a bidirectional map between mount-visible paths,
//! vault-relative paths, and opaque backing paths.
//!
//! Containment is checked the way the corpus checks workspace boundaries
//! elsewhere (join, then verify the result still starts with the root) —
//! see the sandboxing pattern used for tool-driven file access across the
//! example pack. Here it is adapted to work on the daemon's multiple named
//! roots without touching the real filesystem, since aliases (not user
//! input) are what get joined.

use std::path::{Path, PathBuf};

use crate::error::{FsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
	FuseRoot,
	VaultRoot,
	CacheRoot,
	ThumbnailRoot,
	FileCacheRoot,
	BackingRoot,
	BackingVaultRoot,
}

/// Daemon-wide roots, configured once at startup.
#[derive(Debug, Clone)]
pub struct GlobalRoots {
	pub fuse_root: PathBuf,
	pub backing_root: PathBuf,
	pub cache_root: PathBuf,
}

/// Resolves paths for one vault against the daemon's global roots.
#[derive(Debug, Clone)]
pub struct PathResolver {
	fuse_mount_alias: String,
	backing_mount_alias: String,
	roots: GlobalRoots,
}

fn strip_leading_slash(rel: &str) -> &str {
	rel.strip_prefix('/').unwrap_or(rel)
}

/// Joins `root` and `rel`, then verifies the result is still under `root`.
/// Rejects `..` segments that would otherwise escape the root; this never
/// touches the filesystem, so it works for paths that do not exist yet.
fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
	let mut joined = root.to_path_buf();
	for component in Path::new(strip_leading_slash(rel)).components() {
		use std::path::Component;
		match component {
			Component::Normal(part) => joined.push(part),
			Component::CurDir => {}
			Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
				return Err(FsError::OutOfRoot(rel.to_string()));
			}
		}
	}
	if !joined.starts_with(root) {
		return Err(FsError::OutOfRoot(rel.to_string()));
	}
	Ok(joined)
}

impl PathResolver {
	pub fn new(fuse_mount_alias: String, backing_mount_alias: String, roots: GlobalRoots) -> Self {
		Self {
			fuse_mount_alias,
			backing_mount_alias,
			roots,
		}
	}

	fn root_path(&self, kind: RootKind) -> PathBuf {
		match kind {
			RootKind::FuseRoot => self.roots.fuse_root.clone(),
			RootKind::VaultRoot => self.roots.fuse_root.join(&self.fuse_mount_alias),
			RootKind::CacheRoot => self.roots.cache_root.clone(),
			RootKind::ThumbnailRoot => self.roots.cache_root.join(&self.fuse_mount_alias).join("thumbnails"),
			RootKind::FileCacheRoot => self.roots.cache_root.join(&self.fuse_mount_alias).join("files"),
			RootKind::BackingRoot => self.roots.backing_root.clone(),
			RootKind::BackingVaultRoot => self.roots.backing_root.join(&self.backing_mount_alias),
		}
	}

	/// Resolves a relative path to an absolute path under `kind`'s root.
	pub fn abs_path(&self, rel: &str, kind: RootKind) -> Result<PathBuf> {
		safe_join(&self.root_path(kind), rel)
	}

	/// Inverse of [`abs_path`]: fails with `OutOfRoot` if `abs` is not
	/// under the named root.
	pub fn rel_path(&self, abs: &Path, kind: RootKind) -> Result<String> {
		let root = self.root_path(kind);
		let rel = abs
			.strip_prefix(&root)
			.map_err(|_| FsError::OutOfRoot(abs.display().to_string()))?;
		let mut rendered = rel.to_string_lossy().replace('\\', "/");
		if !rendered.starts_with('/') {
			rendered.insert(0, '/');
		}
		Ok(rendered)
	}

	/// Translates a path known to live under `from` into the corresponding
	/// path under `to`.
	pub fn abs_rel_to_abs_rel(&self, abs: &Path, from: RootKind, to: RootKind) -> Result<PathBuf> {
		let rel = self.rel_path(abs, from)?;
		self.abs_path(&rel, to)
	}
}
