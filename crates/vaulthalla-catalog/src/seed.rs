//! One-shot seed helpers for daemon bring-up.

use std::fs;
use std::path::Path;

use uuid::Uuid;

/// Consume `<runtime>/superadmin_uid` exactly once: read it, delete the
/// file, and hand the parsed uid back. Absent or malformed files are
/// treated as "no seed pending", not an error.
pub fn consume_superadmin_seed(path: impl AsRef<Path>) -> Option<Uuid> {
	let path = path.as_ref();
	let contents = fs::read_to_string(path).ok()?;
	let uid = Uuid::parse_str(contents.trim()).ok()?;
	let _ = fs::remove_file(path);
	Some(uid)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn consumes_seed_file_exactly_once() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("superadmin_uid");
		let uid = Uuid::new_v4();
		fs::write(&path, uid.to_string()).unwrap();

		assert_eq!(consume_superadmin_seed(&path), Some(uid));
		assert!(!path.exists());
		assert_eq!(consume_superadmin_seed(&path), None);
	}

	#[test]
	fn missing_seed_file_is_none() {
		let dir = tempfile::tempdir().unwrap();
		assert_eq!(consume_superadmin_seed(dir.path().join("nope")), None);
	}
}
