pub mod config;
pub mod error;
pub mod types;

pub use error::{HotcopyError, HotcopyResult};
pub use types::{ChangeEvent, ChangeKind, Direction, Root};
