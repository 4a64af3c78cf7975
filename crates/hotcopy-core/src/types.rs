use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of change reported for a watched tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Create,
    Write,
    Remove,
    /// Rename or move within the watched tree; `old_path` is set
    Rename,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Create => "CREATE",
            ChangeKind::Write => "WRITE",
            ChangeKind::Remove => "REMOVE",
            ChangeKind::Rename => "RENAME",
        };
        f.write_str(s)
    }
}

/// A single filesystem change under one of the two mirrored roots.
///
/// Produced by the event source, consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    /// Previous location, only for `ChangeKind::Rename`
    pub old_path: Option<PathBuf>,
    pub is_dir: bool,
    /// Unix permission bits of the changed entry (0 when unknown)
    pub mode: u32,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
            is_dir: false,
            mode: 0,
        }
    }

    pub fn rename(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Rename,
            path: new_path.into(),
            old_path: Some(old_path.into()),
            is_dir: false,
            mode: 0,
        }
    }

    pub fn dir(mut self, is_dir: bool) -> Self {
        self.is_dir = is_dir;
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

/// Which of the two trees a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Root {
    Plain,
    Cipher,
}

impl Root {
    pub fn opposite(self) -> Root {
        match self {
            Root::Plain => Root::Cipher,
            Root::Cipher => Root::Plain,
        }
    }

    /// Transform applied when mirroring a change that originated here
    pub fn direction(self) -> Direction {
        match self {
            Root::Plain => Direction::Encrypt,
            Root::Cipher => Direction::Decrypt,
        }
    }
}

impl std::fmt::Display for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Root::Plain => f.write_str("plain"),
            Root::Cipher => f.write_str("cipher"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// plain → cipher
    Encrypt,
    /// cipher → plain
    Decrypt,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Encrypt => f.write_str("encrypt"),
            Direction::Decrypt => f.write_str("decrypt"),
        }
    }
}
