//! Daemon lifecycle: wire watcher, queue and dispatcher; run until a signal,
//! a lost watch, or a fatal mirror failure.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use hotcopy_core::config::{EchoStrategy, HotcopyConfig};
use hotcopy_core::{HotcopyError, HotcopyResult};
use hotcopy_sync::{
    DispatchStats, Dispatcher, EchoGuard, EventHandler, Intake, JobQueue, MirrorPair,
    MirrorWatcher, RecentWrites,
};
use secrecy::SecretString;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run(config: HotcopyConfig, password: SecretString) -> Result<()> {
    let pair = MirrorPair::new(&config.mirror.plain_root, &config.mirror.cipher_root)?;
    ensure_dir(pair.plain())?;
    ensure_dir(pair.cipher())?;

    let key = hotcopy_crypto::derive_key(&password);
    drop(password);

    let handler = EventHandler::new(pair.clone(), key, config.ownership.clone());
    let queue = JobQueue::new();
    let intake = Intake::new(queue.clone(), pair);
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel::<HotcopyError>();

    // In suspend mode the dispatcher owns the watcher; otherwise we keep it alive here
    let (guard, _watcher) = match config.mirror.echo {
        EchoStrategy::Ttl => {
            let recent = Arc::new(RecentWrites::new(config.mirror.echo_ttl()));
            let watcher = MirrorWatcher::start(intake.with_echo_filter(recent.clone()), errors_tx)?;
            (EchoGuard::Ttl(recent), Some(watcher))
        }
        EchoStrategy::Suspend => {
            let watcher = MirrorWatcher::start(intake, errors_tx)?;
            (EchoGuard::Suspend(Box::new(watcher)), None)
        }
    };
    info!(
        echo = ?config.mirror.echo,
        ttl_ms = config.mirror.echo_ttl_ms,
        on_error = ?config.mirror.on_error,
        "mirror running"
    );

    let cancel = CancellationToken::new();
    let dispatcher = Dispatcher::new(handler, guard, config.mirror.on_error);
    let mut consumer = tokio::spawn(dispatcher.run(queue.clone(), cancel.clone()));

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;

    let watch_failure = tokio::select! {
        _ = sigterm.recv() => { info!("received SIGTERM"); None }
        _ = sigint.recv() => { info!("received SIGINT"); None }
        Some(e) = errors_rx.recv() => {
            error!("watch backend failed: {e}");
            Some(e)
        }
        joined = &mut consumer => return finish(joined, queue.len()),
    };

    cancel.cancel();
    let stopped = finish(consumer.await, queue.len());
    match watch_failure {
        Some(e) => Err(anyhow::Error::new(e).context("mirror stopped")),
        None => stopped,
    }
}

fn ensure_dir(root: &Path) -> Result<()> {
    if !root.is_dir() {
        return Err(HotcopyError::Config(format!(
            "mirror root {} is not a directory",
            root.display()
        ))
        .into());
    }
    Ok(())
}

fn finish(
    joined: Result<HotcopyResult<DispatchStats>, JoinError>,
    pending: usize,
) -> Result<()> {
    let stats = joined
        .context("dispatcher task failed")?
        .context("mirror stopped")?;
    info!(
        applied = stats.applied,
        skipped = stats.skipped,
        failed = stats.failed,
        pending,
        "hotcopyd exiting"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_dir(dir.path()).is_ok());

        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(ensure_dir(&file).is_err());
        assert!(ensure_dir(&dir.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_run_rejects_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HotcopyConfig::default();
        config.mirror.plain_root = dir.path().join("plain");
        config.mirror.cipher_root = dir.path().join("cipher");

        let err = run(config, SecretString::from("testkey")).await.unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[tokio::test]
    async fn test_run_rejects_nested_roots() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HotcopyConfig::default();
        config.mirror.plain_root = dir.path().to_path_buf();
        config.mirror.cipher_root = dir.path().join("inner");

        assert!(run(config, SecretString::from("testkey")).await.is_err());
    }
}
