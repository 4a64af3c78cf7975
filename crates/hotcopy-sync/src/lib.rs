//! hotcopy-sync: keeps a plaintext tree and a ciphertext tree in agreement
//!
//! ```text
//! notify ──► MirrorWatcher ──► Intake ──► JobQueue ──► Dispatcher ──► EventHandler
//!                               │ drop root paths          │ classify origin
//!                               │ drop echoes (ttl)        │ suspend opposite watch (suspend)
//!                                                          │ map path, encrypt/decrypt/mkdir/rm/mv
//! ```
//!
//! Events are applied strictly one at a time, in arrival order.

pub mod dispatcher;
pub mod echo;
pub mod handler;
pub mod ownership;
pub mod path_map;
pub mod queue;
pub mod watcher;

pub use dispatcher::{DispatchStats, Dispatcher, EchoGuard};
pub use echo::{RecentWrites, WatchControl};
pub use handler::{EventHandler, Outcome};
pub use path_map::{map_path, MirrorPair};
pub use queue::JobQueue;
pub use watcher::{Intake, MirrorWatcher, Translator};
