//! Positional correspondence between the two trees.
//!
//! Mapping is a literal byte-prefix substitution: `/data2/x` maps as if it
//! were under `/data`. Roots are validated at construction so that neither
//! contains the other, which keeps classification unambiguous.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use hotcopy_core::{HotcopyError, HotcopyResult, Root};

/// `to_root` + (`path` with the literal prefix `from_root` removed).
///
/// If `path` does not start with `from_root` it is appended whole.
pub fn map_path(path: &Path, from_root: &Path, to_root: &Path) -> PathBuf {
    let path_bytes = path.as_os_str().as_bytes();
    let rest = path_bytes
        .strip_prefix(from_root.as_os_str().as_bytes())
        .unwrap_or(path_bytes);

    let mut out = to_root.as_os_str().as_bytes().to_vec();
    out.extend_from_slice(rest);
    PathBuf::from(OsStr::from_bytes(&out))
}

/// The plaintext and ciphertext roots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorPair {
    plain: PathBuf,
    cipher: PathBuf,
}

impl MirrorPair {
    pub fn new(plain: impl AsRef<Path>, cipher: impl AsRef<Path>) -> HotcopyResult<Self> {
        // Collecting components drops trailing separators and `.` segments
        let plain: PathBuf = plain.as_ref().components().collect();
        let cipher: PathBuf = cipher.as_ref().components().collect();

        if plain.as_os_str().is_empty() || cipher.as_os_str().is_empty() {
            return Err(HotcopyError::Config("mirror roots must not be empty".into()));
        }
        if plain.starts_with(&cipher) || cipher.starts_with(&plain) {
            return Err(HotcopyError::Config(format!(
                "mirror roots must be disjoint: {} / {}",
                plain.display(),
                cipher.display()
            )));
        }
        Ok(Self { plain, cipher })
    }

    pub fn plain(&self) -> &Path {
        &self.plain
    }

    pub fn cipher(&self) -> &Path {
        &self.cipher
    }

    pub fn root(&self, root: Root) -> &Path {
        match root {
            Root::Plain => &self.plain,
            Root::Cipher => &self.cipher,
        }
    }

    /// Which tree `path` lives in, by path segments.
    pub fn classify(&self, path: &Path) -> Option<Root> {
        if path.starts_with(&self.plain) {
            Some(Root::Plain)
        } else if path.starts_with(&self.cipher) {
            Some(Root::Cipher)
        } else {
            None
        }
    }

    /// True for the two root directories themselves
    pub fn is_root(&self, path: &Path) -> bool {
        path == self.plain || path == self.cipher
    }

    /// The path in the opposite tree corresponding to `path` in `origin`.
    pub fn counterpart(&self, path: &Path, origin: Root) -> PathBuf {
        map_path(path, self.root(origin), self.root(origin.opposite()))
    }
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn map_is_invertible(rel in "(/[a-zA-Z0-9._-]{1,12}){0,6}") {
            let a = Path::new("/srv/plain");
            let b = Path::new("/mnt/cipher-tree");
            let p = PathBuf::from(format!("/srv/plain{rel}"));

            let there = map_path(&p, a, b);
            prop_assert!(there.starts_with(b));
            prop_assert_eq!(map_path(&there, b, a), p);
        }
    }
}
