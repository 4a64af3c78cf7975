//! Per-event mirror actions.
//!
//! | kind          | dir | action                                              |
//! |---------------|-----|-----------------------------------------------------|
//! | Create/Write  | yes | mkdir -p counterpart with the same mode             |
//! | Create/Write  | no  | ensure parent, encrypt or decrypt into counterpart  |
//! | Remove        | no  | delete counterpart if present                       |
//! | Remove        | yes | delete counterpart tree if present                  |
//! | Rename        | –   | rename counterpart old → new if present             |
//!
//! A missing counterpart on remove/rename is a benign race with an event
//! that already propagated, reported as `Outcome::Skipped`.

use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use hotcopy_core::config::OwnershipConfig;
use hotcopy_core::{ChangeEvent, ChangeKind, Direction, HotcopyError, HotcopyResult, Root};
use hotcopy_crypto::MirrorKey;
use tracing::debug;

use crate::ownership;
use crate::path_map::MirrorPair;

/// What a handled event did to the opposite tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    DirCreated(PathBuf),
    Encrypted { target: PathBuf, bytes: u64 },
    Decrypted { target: PathBuf, bytes: u64 },
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    Skipped { target: PathBuf, reason: &'static str },
}

impl Outcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped { .. })
    }
}

/// Path the handler will write for an event, used for echo marking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: PathBuf,
    /// The write replaces or deletes a whole subtree
    pub tree: bool,
}

pub struct EventHandler {
    pair: MirrorPair,
    key: MirrorKey,
    owner: OwnershipConfig,
}

impl EventHandler {
    pub fn new(pair: MirrorPair, key: MirrorKey, owner: OwnershipConfig) -> Self {
        Self { pair, key, owner }
    }

    pub fn pair(&self) -> &MirrorPair {
        &self.pair
    }

    /// Apply one event that originated in `origin` to the opposite tree.
    pub fn handle(&self, event: &ChangeEvent, origin: Root) -> HotcopyResult<Outcome> {
        match event.kind {
            ChangeKind::Create | ChangeKind::Write => {
                let target = self.pair.counterpart(&event.path, origin);
                if event.is_dir {
                    self.mirror_dir(&target, event.mode)
                } else {
                    self.mirror_file(&event.path, &target, origin.direction(), event.mode)
                }
            }
            ChangeKind::Remove => {
                let target = self.pair.counterpart(&event.path, origin);
                self.remove(&target, event.is_dir)
            }
            ChangeKind::Rename => {
                let old_path = event.old_path.as_deref().ok_or_else(|| {
                    HotcopyError::Other(anyhow::anyhow!(
                        "rename event without old path: {}",
                        event.path.display()
                    ))
                })?;
                let from = self.pair.counterpart(old_path, origin);
                let to = self.pair.counterpart(&event.path, origin);
                self.rename(&from, &to)
            }
        }
    }

    /// Paths in the opposite tree that `handle` is about to touch.
    pub fn targets(&self, event: &ChangeEvent, origin: Root) -> Vec<Target> {
        let target = self.pair.counterpart(&event.path, origin);
        let opposite = self.pair.root(origin.opposite());
        let mut out = Vec::new();

        match event.kind {
            ChangeKind::Create | ChangeKind::Write => {
                // Parents that mkdir -p is going to create
                let missing = target
                    .ancestors()
                    .skip(1)
                    .take_while(|p| p.starts_with(opposite) && *p != opposite && !p.exists());
                out.extend(missing.map(|p| Target {
                    path: p.to_path_buf(),
                    tree: false,
                }));
                out.push(Target {
                    path: target,
                    tree: false,
                });
            }
            ChangeKind::Remove => {
                let tree = event.is_dir || target.is_dir();
                out.push(Target { path: target, tree });
            }
            ChangeKind::Rename => {
                if let Some(old) = &event.old_path {
                    let from = self.pair.counterpart(old, origin);
                    let tree = from.is_dir();
                    out.push(Target { path: from, tree });
                    out.push(Target { path: target, tree });
                }
            }
        }
        out
    }

    /// mkdir -p `target` with `mode`; no content is copied.
    pub fn mirror_dir(&self, target: &Path, mode: u32) -> HotcopyResult<Outcome> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        if mode != 0 {
            builder.mode(mode);
        }
        builder
            .create(target)
            .map_err(|e| HotcopyError::io(target, e))?;
        ownership::apply(&self.owner, target, mode)?;
        Ok(Outcome::DirCreated(target.to_path_buf()))
    }

    /// Encrypt or decrypt `source` into `target`, creating missing parents.
    pub fn mirror_file(
        &self,
        source: &Path,
        target: &Path,
        direction: Direction,
        mode: u32,
    ) -> HotcopyResult<Outcome> {
        // Deleted again before we got to it; its Remove event is queued behind us
        if std::fs::symlink_metadata(source).is_err() {
            debug!(source = %source.display(), "source vanished before mirroring");
            return Ok(Outcome::Skipped {
                target: target.to_path_buf(),
                reason: "source no longer exists",
            });
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HotcopyError::io(parent, e))?;
        }

        let outcome = match direction {
            Direction::Encrypt => {
                let bytes = hotcopy_crypto::encrypt_file(&self.key, source, target)?;
                Outcome::Encrypted {
                    target: target.to_path_buf(),
                    bytes,
                }
            }
            Direction::Decrypt => {
                let bytes = hotcopy_crypto::decrypt_file(&self.key, source, target)?;
                Outcome::Decrypted {
                    target: target.to_path_buf(),
                    bytes,
                }
            }
        };
        ownership::apply(&self.owner, target, mode)?;
        Ok(outcome)
    }

    /// Delete `target` (recursively for directories) if it exists.
    pub fn remove(&self, target: &Path, is_dir: bool) -> HotcopyResult<Outcome> {
        let meta = match std::fs::symlink_metadata(target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::Skipped {
                    target: target.to_path_buf(),
                    reason: "already absent",
                });
            }
            Err(e) => return Err(HotcopyError::io(target, e)),
        };

        // Removals of a deleted directory do not always say it was one
        if is_dir || meta.is_dir() {
            std::fs::remove_dir_all(target).map_err(|e| HotcopyError::io(target, e))?;
        } else {
            std::fs::remove_file(target).map_err(|e| HotcopyError::io(target, e))?;
        }
        Ok(Outcome::Removed(target.to_path_buf()))
    }

    /// Rename `from` to `to` if `from` exists. Content is not re-encrypted.
    pub fn rename(&self, from: &Path, to: &Path) -> HotcopyResult<Outcome> {
        match std::fs::symlink_metadata(from) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Outcome::Skipped {
                    target: from.to_path_buf(),
                    reason: "rename source not mirrored",
                });
            }
            Err(e) => return Err(HotcopyError::io(from, e)),
        }

        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HotcopyError::io(parent, e))?;
        }
        std::fs::rename(from, to).map_err(|e| HotcopyError::io(from, e))?;
        Ok(Outcome::Renamed {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        })
    }
}
