//! Mode and owner replication for entries the mirror creates

use std::fs::{Metadata, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use hotcopy_core::config::OwnershipConfig;
use hotcopy_core::{HotcopyError, HotcopyResult};

/// Permission bits of an existing entry, or 0 if it cannot be read.
pub fn mode_of(path: &Path) -> u32 {
    std::fs::symlink_metadata(path)
        .map(|m| mode_bits(&m))
        .unwrap_or(0)
}

pub fn mode_bits(meta: &Metadata) -> u32 {
    meta.permissions().mode() & 0o7777
}

/// chmod to `mode` (skipped when 0) and chown to the configured owner.
pub fn apply(owner: &OwnershipConfig, path: &Path, mode: u32) -> HotcopyResult<()> {
    if mode != 0 {
        std::fs::set_permissions(path, Permissions::from_mode(mode))
            .map_err(|e| HotcopyError::io(path, e))?;
    }
    if owner.uid.is_some() || owner.gid.is_some() {
        std::os::unix::fs::chown(path, owner.uid, owner.gid)
            .map_err(|e| HotcopyError::io(path, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        apply(&OwnershipConfig::default(), &file, 0o600).unwrap();
        assert_eq!(mode_of(&file), 0o600);

        apply(&OwnershipConfig::default(), &file, 0o644).unwrap();
        assert_eq!(mode_of(&file), 0o644);
    }

    #[test]
    fn test_zero_mode_leaves_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        std::fs::set_permissions(&file, Permissions::from_mode(0o640)).unwrap();

        apply(&OwnershipConfig::default(), &file, 0).unwrap();
        assert_eq!(mode_of(&file), 0o640);
    }

    #[test]
    fn test_mode_of_missing_is_zero() {
        assert_eq!(mode_of(Path::new("/nonexistent/path/12345")), 0);
    }
}
