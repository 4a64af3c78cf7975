//! Single consumer of the job queue.
//!
//! Per event: classify origin root → guard against echoes → handle → release.
//! Events are applied one at a time; the file I/O runs on the blocking pool
//! while the async side only waits for it.

use std::sync::Arc;

use hotcopy_core::config::ErrorPolicy;
use hotcopy_core::{ChangeEvent, ChangeKind, HotcopyError, HotcopyResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::echo::{RecentWrites, WatchControl};
use crate::handler::{EventHandler, Outcome};
use crate::queue::JobQueue;

/// How the dispatcher keeps its own writes from coming back as events
pub enum EchoGuard {
    /// Unwatch the opposite root while the handler runs
    Suspend(Box<dyn WatchControl>),
    /// Record target paths; the intake drops matching events within the TTL
    Ttl(Arc<RecentWrites>),
}

/// Counters reported when the consumer loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub applied: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct Dispatcher {
    handler: EventHandler,
    guard: EchoGuard,
    policy: ErrorPolicy,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(handler: EventHandler, guard: EchoGuard, policy: ErrorPolicy) -> Self {
        Self {
            handler,
            guard,
            policy,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Mirror one event onto the opposite tree.
    pub fn process(&mut self, event: &ChangeEvent) -> HotcopyResult<Outcome> {
        let pair = self.handler.pair();
        let Some(origin) = pair.classify(&event.path) else {
            return Ok(Outcome::Skipped {
                target: event.path.clone(),
                reason: "outside both roots",
            });
        };
        if event.kind == ChangeKind::Rename {
            let old_origin = event.old_path.as_deref().and_then(|p| pair.classify(p));
            if old_origin != Some(origin) {
                return Ok(Outcome::Skipped {
                    target: event.path.clone(),
                    reason: "rename across roots",
                });
            }
        }

        debug!(
            kind = %event.kind,
            path = %event.path.display(),
            direction = %origin.direction(),
            "dispatching"
        );

        match &mut self.guard {
            EchoGuard::Suspend(control) => {
                let opposite = pair.root(origin.opposite()).to_path_buf();
                control.suspend(&opposite)?;
                let result = self.handler.handle(event, origin);
                // Resume even when the handler failed
                control.resume(&opposite)?;
                result
            }
            EchoGuard::Ttl(recent) => {
                let targets = self.handler.targets(event, origin);
                mark_all(recent, &targets);
                let result = self.handler.handle(event, origin);
                // Events can trail the write, so restart the window once it is done
                mark_all(recent, &targets);
                result
            }
        }
    }

    /// Drain `queue` until it is closed or `cancel` fires.
    ///
    /// Returns an error on the first watch failure, and on the first failure
    /// of any kind under `ErrorPolicy::Abort`.
    pub async fn run(
        mut self,
        queue: JobQueue,
        cancel: CancellationToken,
    ) -> HotcopyResult<DispatchStats> {
        info!(policy = ?self.policy, "dispatcher started");

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = queue.pop() => match next {
                    Some(event) => event,
                    None => break,
                },
            };

            let (dispatcher, event, result) = tokio::task::spawn_blocking(move || {
                let result = self.process(&event);
                (self, event, result)
            })
            .await
            .map_err(|e| HotcopyError::Other(anyhow::anyhow!("dispatch task panicked: {e}")))?;
            self = dispatcher;

            self.record(&event, result)?;
        }

        info!(
            applied = self.stats.applied,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            "dispatcher stopped"
        );
        Ok(self.stats)
    }

    fn record(&mut self, event: &ChangeEvent, result: HotcopyResult<Outcome>) -> HotcopyResult<()> {
        match result {
            Ok(Outcome::Skipped { target, reason }) => {
                self.stats.skipped += 1;
                debug!(kind = %event.kind, target = %target.display(), reason, "skipped");
                Ok(())
            }
            Ok(outcome) => {
                self.stats.applied += 1;
                info!(kind = %event.kind, path = %event.path.display(), ?outcome, "mirrored");
                Ok(())
            }
            Err(e @ HotcopyError::Watch(_)) => {
                self.stats.failed += 1;
                error!(kind = %event.kind, path = %event.path.display(), error = %e, "watch lost");
                Err(e)
            }
            Err(e) => {
                self.stats.failed += 1;
                match self.policy {
                    ErrorPolicy::Abort => {
                        error!(kind = %event.kind, path = %event.path.display(), error = %e, "mirror failed");
                        Err(e)
                    }
                    ErrorPolicy::Skip => {
                        warn!(kind = %event.kind, path = %event.path.display(), error = %e, "mirror failed, skipping event");
                        Ok(())
                    }
                }
            }
        }
    }
}

fn mark_all(recent: &RecentWrites, targets: &[crate::handler::Target]) {
    for target in targets {
        if target.tree {
            recent.mark_tree(&target.path);
        } else {
            recent.mark(&target.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_map::MirrorPair;
    use hotcopy_core::config::OwnershipConfig;
    use secrecy::SecretString;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records suspend/resume calls instead of touching a real watcher
    #[derive(Clone, Default)]
    struct FakeWatch {
        calls: Arc<Mutex<Vec<String>>>,
        fail_resume: bool,
    }

    impl WatchControl for FakeWatch {
        fn suspend(&mut self, root: &Path) -> HotcopyResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("suspend {}", root.display()));
            Ok(())
        }

        fn resume(&mut self, root: &Path) -> HotcopyResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("resume {}", root.display()));
            if self.fail_resume {
                return Err(HotcopyError::Watch("inotify limit reached".into()));
            }
            Ok(())
        }
    }

    fn setup(guard: EchoGuard, policy: ErrorPolicy) -> (TempDir, PathBuf, PathBuf, Dispatcher) {
        let tmp = TempDir::new().unwrap();
        let plain = tmp.path().join("data");
        let cipher = tmp.path().join("enc-data");
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::create_dir_all(&cipher).unwrap();

        let handler = EventHandler::new(
            MirrorPair::new(&plain, &cipher).unwrap(),
            hotcopy_crypto::derive_key(&SecretString::from("testkey")),
            OwnershipConfig::default(),
        );
        (tmp, plain, cipher, Dispatcher::new(handler, guard, policy))
    }

    #[test]
    fn test_suspend_wraps_opposite_root() {
        let watch = FakeWatch::default();
        let calls = watch.calls.clone();
        let (_tmp, plain, cipher, mut dispatcher) =
            setup(EchoGuard::Suspend(Box::new(watch)), ErrorPolicy::Abort);

        std::fs::write(plain.join("a.txt"), b"abc").unwrap();
        dispatcher
            .process(&ChangeEvent::new(ChangeKind::Create, plain.join("a.txt")))
            .unwrap();

        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                format!("suspend {}", cipher.display()),
                format!("resume {}", cipher.display()),
            ]
        );
        assert!(cipher.join("a.txt").exists());
    }

    #[test]
    fn test_suspend_resumes_after_handler_failure() {
        let watch = FakeWatch::default();
        let calls = watch.calls.clone();
        let (_tmp, plain, cipher, mut dispatcher) =
            setup(EchoGuard::Suspend(Box::new(watch)), ErrorPolicy::Abort);

        // Malformed record in the cipher tree
        std::fs::write(cipher.join("bad"), [0u8; 30]).unwrap();
        let err = dispatcher
            .process(&ChangeEvent::new(ChangeKind::Write, cipher.join("bad")))
            .unwrap_err();
        assert!(matches!(err, HotcopyError::Format(_)));
        assert!(!plain.join("bad").exists());

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.last().unwrap(), &format!("resume {}", plain.display()));
    }

    #[test]
    fn test_resume_failure_is_watch_error() {
        let watch = FakeWatch {
            fail_resume: true,
            ..Default::default()
        };
        let (_tmp, plain, _cipher, mut dispatcher) =
            setup(EchoGuard::Suspend(Box::new(watch)), ErrorPolicy::Skip);

        let err = dispatcher
            .process(&ChangeEvent::new(ChangeKind::Remove, plain.join("x")))
            .unwrap_err();
        assert!(matches!(err, HotcopyError::Watch(_)));
    }

    #[test]
    fn test_ttl_marks_targets() {
        let recent = Arc::new(RecentWrites::new(Duration::from_secs(60)));
        let (_tmp, plain, cipher, mut dispatcher) =
            setup(EchoGuard::Ttl(recent.clone()), ErrorPolicy::Abort);

        std::fs::create_dir_all(plain.join("a")).unwrap();
        std::fs::write(plain.join("a/b.txt"), b"abc").unwrap();
        dispatcher
            .process(&ChangeEvent::new(ChangeKind::Create, plain.join("a/b.txt")))
            .unwrap();

        assert!(recent.is_echo(&cipher.join("a/b.txt")));
        assert!(recent.is_echo(&cipher.join("a")));
        assert!(!recent.is_echo(&plain.join("a/b.txt")));
    }

    #[test]
    fn test_outside_roots_skipped() {
        let (_tmp, _plain, _cipher, mut dispatcher) = setup(
            EchoGuard::Ttl(Arc::new(RecentWrites::new(Duration::from_secs(1)))),
            ErrorPolicy::Abort,
        );
        let out = dispatcher
            .process(&ChangeEvent::new(ChangeKind::Write, "/somewhere/else"))
            .unwrap();
        assert!(out.is_skipped());
    }

    #[test]
    fn test_cross_root_rename_skipped() {
        let (_tmp, plain, cipher, mut dispatcher) = setup(
            EchoGuard::Ttl(Arc::new(RecentWrites::new(Duration::from_secs(1)))),
            ErrorPolicy::Abort,
        );
        let out = dispatcher
            .process(&ChangeEvent::rename(plain.join("x"), cipher.join("x")))
            .unwrap();
        assert!(out.is_skipped());
    }

    #[tokio::test]
    async fn test_run_abort_stops_on_failure() {
        let (_tmp, plain, cipher, dispatcher) = setup(
            EchoGuard::Ttl(Arc::new(RecentWrites::new(Duration::from_secs(1)))),
            ErrorPolicy::Abort,
        );
        std::fs::write(cipher.join("bad"), [0u8; 30]).unwrap();
        std::fs::write(plain.join("good.txt"), b"ok").unwrap();

        let queue = JobQueue::new();
        queue.push(ChangeEvent::new(ChangeKind::Write, cipher.join("bad")));
        queue.push(ChangeEvent::new(ChangeKind::Write, plain.join("good.txt")));

        let result = dispatcher.run(queue.clone(), CancellationToken::new()).await;
        assert!(matches!(result, Err(HotcopyError::Format(_))));
        // The second job was never taken
        assert_eq!(queue.len(), 1);
        assert!(!cipher.join("good.txt").exists());
    }

    #[tokio::test]
    async fn test_run_skip_continues_after_failure() {
        let (_tmp, plain, cipher, dispatcher) = setup(
            EchoGuard::Ttl(Arc::new(RecentWrites::new(Duration::from_secs(1)))),
            ErrorPolicy::Skip,
        );
        std::fs::write(cipher.join("bad"), [0u8; 30]).unwrap();
        std::fs::write(plain.join("good.txt"), b"ok").unwrap();

        let queue = JobQueue::new();
        queue.push(ChangeEvent::new(ChangeKind::Write, cipher.join("bad")));
        queue.push(ChangeEvent::new(ChangeKind::Write, plain.join("good.txt")));
        queue.push(ChangeEvent::new(ChangeKind::Remove, plain.join("never")));
        queue.close();

        let stats = dispatcher
            .run(queue, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            stats,
            DispatchStats {
                applied: 1,
                skipped: 1,
                failed: 1
            }
        );
        assert!(cipher.join("good.txt").exists());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (_tmp, _plain, _cipher, dispatcher) = setup(
            EchoGuard::Ttl(Arc::new(RecentWrites::new(Duration::from_secs(1)))),
            ErrorPolicy::Abort,
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(dispatcher.run(JobQueue::new(), cancel.clone()));

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("dispatcher should stop")
            .unwrap()
            .unwrap();
        assert_eq!(stats, DispatchStats::default());
    }
}
