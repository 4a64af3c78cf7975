//! notify-backed event source for both roots.
//!
//! The notify callback runs on the backend's own thread. It feeds raw notify
//! events through a `Translator` and hands the resulting `ChangeEvent`s to the
//! `Intake`, which only ever appends to the job queue, so the backend is never
//! held up by mirror I/O.
//!
//! Two backend quirks are absorbed here:
//! - inotify reports one rename as `Name(From)`, `Name(To)` and then
//!   `Name(Both)`, all sharing a tracker. The halves are held back until the
//!   `Both` arrives so the mirror sees a single Rename. Halves that never get
//!   a partner (moves into or out of the trees) become Remove / Create.
//! - A new directory is only watched after its Create has been delivered, so
//!   whatever lands inside it first produces no event. New directories are
//!   walked right away and once more after `SETTLE`.

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use hotcopy_core::{ChangeEvent, ChangeKind, HotcopyError, HotcopyResult};
use notify::event::{AccessKind, AccessMode, CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};
use walkdir::WalkDir;

use crate::echo::{RecentWrites, WatchControl};
use crate::ownership::{mode_bits, mode_of};
use crate::path_map::MirrorPair;
use crate::queue::JobQueue;

/// How long an unpaired rename half waits for its partner, and how long a
/// new directory settles before its second scan.
pub const SETTLE: Duration = Duration::from_millis(100);

const TICK: Duration = Duration::from_millis(50);

/// Gate between the event source and the job queue.
#[derive(Debug, Clone)]
pub struct Intake {
    queue: JobQueue,
    pair: Arc<MirrorPair>,
    echoes: Option<Arc<RecentWrites>>,
}

impl Intake {
    pub fn new(queue: JobQueue, pair: MirrorPair) -> Self {
        Self {
            queue,
            pair: Arc::new(pair),
            echoes: None,
        }
    }

    /// Drop events on paths the mirror wrote recently.
    pub fn with_echo_filter(mut self, recent: Arc<RecentWrites>) -> Self {
        self.echoes = Some(recent);
        self
    }

    pub fn pair(&self) -> &MirrorPair {
        &self.pair
    }

    /// Queue `event` unless it is root noise or an echo. Returns true if queued.
    pub fn offer(&self, event: ChangeEvent) -> bool {
        if self.pair.is_root(&event.path) {
            trace!(path = %event.path.display(), "ignoring root event");
            return false;
        }
        if let Some(recent) = &self.echoes {
            let echoed = recent.is_echo(&event.path)
                || event.old_path.as_deref().is_some_and(|p| recent.is_echo(p));
            if echoed {
                trace!(kind = %event.kind, path = %event.path.display(), "dropping echo");
                return false;
            }
        }
        self.queue.push(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    From,
    To,
}

/// One half of a tracked rename waiting for its `Both`
#[derive(Debug)]
struct Half {
    tracker: usize,
    side: Side,
    path: PathBuf,
    at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl Stamp {
    fn of(meta: &Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

/// A directory walked on arrival, due for a second scan
#[derive(Debug)]
struct FreshDir {
    path: PathBuf,
    at: Instant,
    seen: HashMap<PathBuf, Stamp>,
}

/// Turns the raw notify stream into change events, in order.
#[derive(Debug)]
pub struct Translator {
    pair: MirrorPair,
    halves: Vec<Half>,
    fresh: Vec<FreshDir>,
}

impl Translator {
    pub fn new(pair: &MirrorPair) -> Self {
        Self {
            pair: pair.clone(),
            halves: Vec::new(),
            fresh: Vec::new(),
        }
    }

    /// Translate one notify event into zero or more change events.
    pub fn feed(&mut self, event: &notify::Event) -> Vec<ChangeEvent> {
        let mut out = Vec::new();

        match (event.kind, event.tracker()) {
            (EventKind::Modify(ModifyKind::Name(RenameMode::From)), Some(tracker)) => {
                self.resolve_halves(&mut out);
                self.hold(tracker, Side::From, event);
            }
            (EventKind::Modify(ModifyKind::Name(RenameMode::To)), Some(tracker))
                if self
                    .halves
                    .iter()
                    .any(|h| h.tracker == tracker && h.side == Side::From) =>
            {
                self.hold(tracker, Side::To, event);
            }
            (EventKind::Modify(ModifyKind::Name(RenameMode::Both)), tracker) => {
                if let Some(tracker) = tracker {
                    self.halves.retain(|h| h.tracker != tracker);
                }
                self.resolve_halves(&mut out);
                self.paired_rename(&event.paths, &mut out);
            }
            _ => {
                self.resolve_halves(&mut out);
                self.translate(event, &mut out);
            }
        }
        out
    }

    /// Resolve rename halves whose partner did not show up within `settle`
    /// and rescan new directories that have settled.
    pub fn tick(&mut self, settle: Duration) -> Vec<ChangeEvent> {
        let mut out = Vec::new();

        if self.halves.last().is_some_and(|h| h.at.elapsed() >= settle) {
            self.resolve_halves(&mut out);
        }

        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.fresh)
            .into_iter()
            .partition(|dir| dir.at.elapsed() >= settle);
        self.fresh = waiting;
        for dir in due {
            rescan(&dir, &mut out);
        }
        out
    }

    /// True while rename halves are held back.
    pub fn has_pending(&self) -> bool {
        !self.halves.is_empty()
    }

    fn hold(&mut self, tracker: usize, side: Side, event: &notify::Event) {
        if let Some(path) = event.paths.first() {
            self.halves.push(Half {
                tracker,
                side,
                path: path.clone(),
                at: Instant::now(),
            });
        }
    }

    fn resolve_halves(&mut self, out: &mut Vec<ChangeEvent>) {
        for half in std::mem::take(&mut self.halves) {
            trace!(tracker = half.tracker, path = %half.path.display(), "unpaired rename half");
            match half.side {
                Side::From => self.departed(&half.path, out),
                Side::To => self.arrived(&half.path, false, out),
            }
        }
    }

    fn paired_rename(&mut self, paths: &[PathBuf], out: &mut Vec<ChangeEvent>) {
        let [old, new] = paths else {
            for path in paths {
                if std::fs::symlink_metadata(path).is_ok() {
                    self.arrived(path, false, out);
                } else {
                    self.departed(path, out);
                }
            }
            return;
        };

        match (self.pair.classify(old), self.pair.classify(new)) {
            (Some(a), Some(b)) if a == b => {
                let described = describe(ChangeKind::Create, new, false);
                out.push(
                    ChangeEvent::rename(old, new)
                        .dir(described.is_dir)
                        .mode(described.mode),
                );
            }
            // Moved between the trees or in/out of them
            _ => {
                self.departed(old, out);
                self.arrived(new, false, out);
            }
        }
    }

    fn translate(&mut self, event: &notify::Event, out: &mut Vec<ChangeEvent>) {
        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    self.arrived(path, kind == CreateKind::Folder, out);
                }
            }
            // Untracked halves come from backends that never pair them
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                for path in &event.paths {
                    self.departed(path, out);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                for path in &event.paths {
                    self.arrived(path, false, out);
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if std::fs::symlink_metadata(path).is_ok() {
                        self.arrived(path, false, out);
                    } else {
                        self.departed(path, out);
                    }
                }
            }
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                out.extend(
                    event
                        .paths
                        .iter()
                        .filter(|p| self.pair.classify(p).is_some())
                        .map(|p| describe(ChangeKind::Write, p, false)),
                );
            }
            EventKind::Remove(kind) => {
                out.extend(
                    event
                        .paths
                        .iter()
                        .filter(|p| self.pair.classify(p).is_some())
                        .map(|p| {
                            ChangeEvent::new(ChangeKind::Remove, p).dir(kind == RemoveKind::Folder)
                        }),
                );
            }
            _ => {}
        }
    }

    fn departed(&self, path: &Path, out: &mut Vec<ChangeEvent>) {
        if self.pair.classify(path).is_some() {
            out.push(ChangeEvent::new(ChangeKind::Remove, path));
        }
    }

    /// Something appeared at `path`; a directory brings its contents along.
    fn arrived(&mut self, path: &Path, is_dir_hint: bool, out: &mut Vec<ChangeEvent>) {
        if self.pair.classify(path).is_none() || self.pair.is_root(path) {
            return;
        }
        let event = describe(ChangeKind::Create, path, is_dir_hint);
        let is_dir = event.is_dir;
        out.push(event);
        if is_dir {
            self.scan_new_dir(path, out);
        }
    }

    fn scan_new_dir(&mut self, dir: &Path, out: &mut Vec<ChangeEvent>) {
        let mut seen = HashMap::new();
        for (path, meta) in walk(dir) {
            seen.insert(path.clone(), Stamp::of(&meta));
            out.push(entry_event(&path, &meta));
        }
        debug!(dir = %dir.display(), entries = seen.len(), "scanned new directory");
        self.fresh.push(FreshDir {
            path: dir.to_path_buf(),
            at: Instant::now(),
            seen,
        });
    }
}

/// Emit whatever changed in `dir` since it was first walked.
fn rescan(dir: &FreshDir, out: &mut Vec<ChangeEvent>) {
    for (path, meta) in walk(&dir.path) {
        if dir.seen.get(&path) != Some(&Stamp::of(&meta)) {
            out.push(entry_event(&path, &meta));
        }
    }
}

/// Entries below `dir`, each directory before its contents.
fn walk(dir: &Path) -> impl Iterator<Item = (PathBuf, Metadata)> {
    WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let meta = e.metadata().ok()?;
            Some((e.into_path(), meta))
        })
}

fn entry_event(path: &Path, meta: &Metadata) -> ChangeEvent {
    ChangeEvent::new(ChangeKind::Create, path)
        .dir(meta.is_dir())
        .mode(mode_bits(meta))
}

/// Build an event for a path that should still exist, reading dir flag and mode.
fn describe(kind: ChangeKind, path: &Path, is_dir_hint: bool) -> ChangeEvent {
    let is_dir = is_dir_hint
        || std::fs::symlink_metadata(path)
            .map(|m| m.is_dir())
            .unwrap_or(false);
    ChangeEvent::new(kind, path).dir(is_dir).mode(mode_of(path))
}

/// Recursive notify watch over both roots, feeding an `Intake`.
pub struct MirrorWatcher {
    watcher: RecommendedWatcher,
    roots: [PathBuf; 2],
    // Dropping it stops the settle thread
    _stop: Sender<()>,
}

impl MirrorWatcher {
    /// Start watching both roots. Backend errors are sent on `errors`.
    pub fn start(
        intake: Intake,
        errors: mpsc::UnboundedSender<HotcopyError>,
    ) -> HotcopyResult<Self> {
        let roots = [
            intake.pair().plain().to_path_buf(),
            intake.pair().cipher().to_path_buf(),
        ];
        let translator = Arc::new(Mutex::new(Translator::new(intake.pair())));

        let (stop, stopped) = channel::<()>();
        {
            let translator = translator.clone();
            let intake = intake.clone();
            std::thread::Builder::new()
                .name("hotcopy-settle".into())
                .spawn(move || loop {
                    match stopped.recv_timeout(TICK) {
                        Err(RecvTimeoutError::Timeout) => {
                            let mut translator =
                                translator.lock().expect("translator lock poisoned");
                            for change in translator.tick(SETTLE) {
                                intake.offer(change);
                            }
                        }
                        _ => break,
                    }
                })
                .map_err(|e| HotcopyError::Watch(format!("starting settle thread: {e}")))?;
        }

        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    // Offer under the lock so settle-thread output keeps its place
                    let mut translator = translator.lock().expect("translator lock poisoned");
                    for change in translator.feed(&event) {
                        intake.offer(change);
                    }
                }
                Err(e) => {
                    error!("watch error: {e}");
                    let _ = errors.send(HotcopyError::Watch(e.to_string()));
                }
            },
        )
        .map_err(|e| HotcopyError::Watch(format!("creating watcher: {e}")))?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|e| HotcopyError::Watch(format!("watching {}: {e}", root.display())))?;
            info!(root = %root.display(), "watching");
        }

        Ok(Self {
            watcher,
            roots,
            _stop: stop,
        })
    }

    pub fn roots(&self) -> &[PathBuf; 2] {
        &self.roots
    }
}

impl WatchControl for MirrorWatcher {
    fn suspend(&mut self, root: &Path) -> HotcopyResult<()> {
        debug!(root = %root.display(), "suspending watch");
        self.watcher
            .unwatch(root)
            .map_err(|e| HotcopyError::Watch(format!("unwatching {}: {e}", root.display())))
    }

    fn resume(&mut self, root: &Path) -> HotcopyResult<()> {
        debug!(root = %root.display(), "resuming watch");
        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| HotcopyError::Watch(format!("watching {}: {e}", root.display())))
    }
}
