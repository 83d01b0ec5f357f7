//! Continuous ingestion of a watched directory.
//!
//! Every file created in the directory is tailed from its first line; each
//! line is published under a run scoped to that file. A tail stops when its
//! file is removed or renamed away, or after `wait_until_exit` without a new
//! line, and flushes the broker before exiting.

use super::Publisher;
use crate::error::ProducerError;
use doe_core::new_id;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default idle time after which a tail gives up
pub const DEFAULT_WAIT_UNTIL_EXIT: Duration = Duration::from_secs(60 * 60);
/// Default interval between reads at end of file
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lines buffered between a tail and its publisher
const LINE_BUFFER: usize = 1024;

/// Watches a directory and tails every file created in it
#[derive(Debug, Clone)]
pub struct WatchDirectoryProducer {
    publisher: Arc<Publisher>,
    wait_until_exit: Duration,
    poll_interval: Duration,
}

impl WatchDirectoryProducer {
    /// Producer publishing through `publisher`
    #[must_use]
    pub const fn new(publisher: Arc<Publisher>) -> Self {
        Self {
            publisher,
            wait_until_exit: DEFAULT_WAIT_UNTIL_EXIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Stop tailing a file after this long without a new line
    #[must_use]
    pub const fn with_wait_until_exit(mut self, wait: Duration) -> Self {
        self.wait_until_exit = wait;
        self
    }

    /// Poll for appended data this often
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Watch `dir` until `token` is cancelled, then stop every tail and wait
    /// for them to flush.
    pub async fn run(&self, dir: &Path, token: CancellationToken) -> Result<(), ProducerError> {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |event: notify::Result<Event>| {
                // The receiver is gone only during shutdown.
                let _ = events_tx.send(event);
            },
            notify::Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        info!(dir = %dir.display(), "watching directory");

        let mut tails = Tails::default();
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                Some(done) = tails.tasks.join_next(), if !tails.tasks.is_empty() => {
                    if let Ok(Some(path)) = done {
                        tails.forget(&path);
                    }
                }
                event = events.recv() => match event {
                    Some(Ok(event)) => self.on_event(event, &mut tails, &token),
                    Some(Err(e)) => warn!(error = %e, "watch error"),
                    None => break,
                },
            }
        }

        drop(watcher);
        tails.shutdown().await;
        info!(dir = %dir.display(), "stopped watching directory");
        Ok(())
    }

    fn on_event(&self, event: Event, tails: &mut Tails, parent: &CancellationToken) {
        for path in event.paths {
            match event.kind {
                EventKind::Create(_) => tails.start(self, path, parent),
                EventKind::Remove(_) => tails.stop(&path),
                EventKind::Modify(ModifyKind::Name(_)) => {
                    if path.exists() {
                        tails.start(self, path, parent);
                    } else {
                        tails.stop(&path);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Tails in flight. Tail tasks yield their path when they exit; publisher
/// tasks yield nothing.
#[derive(Default)]
struct Tails {
    tracked: HashMap<PathBuf, CancellationToken>,
    tasks: JoinSet<Option<PathBuf>>,
}

impl Tails {
    fn start(
        &mut self,
        producer: &WatchDirectoryProducer,
        path: PathBuf,
        parent: &CancellationToken,
    ) {
        if !path.is_file() {
            return;
        }
        if self.tracked.get(&path).is_some_and(|t| !t.is_cancelled()) {
            debug!(path = %path.display(), "already tailing");
            return;
        }
        let child = parent.child_token();
        self.tracked.insert(path.clone(), child.clone());

        let (lines_tx, lines_rx) = mpsc::channel(LINE_BUFFER);
        let publisher = producer.publisher.clone();
        let publish = publish_lines(publisher, path.clone(), lines_rx);
        self.tasks.spawn(async move {
            publish.await;
            None
        });
        let follow = tail(
            path.clone(),
            lines_tx,
            child,
            producer.wait_until_exit,
            producer.poll_interval,
        );
        self.tasks.spawn(async move {
            follow.await;
            Some(path)
        });
    }

    fn stop(&mut self, path: &Path) {
        if let Some(child) = self.tracked.remove(path) {
            debug!(path = %path.display(), "file gone, stopping tail");
            child.cancel();
        }
    }

    /// Drop the entry of an exited tail, unless the path is tailed again
    fn forget(&mut self, path: &Path) {
        if self.tracked.get(path).is_some_and(CancellationToken::is_cancelled) {
            self.tracked.remove(path);
        }
    }

    async fn shutdown(mut self) {
        for child in self.tracked.values() {
            child.cancel();
        }
        while self.tasks.join_next().await.is_some() {}
    }
}

/// Follow `path` from its start, sending complete lines to `lines`. A line
/// that is not UTF-8 is skipped.
async fn tail(
    path: PathBuf,
    lines: mpsc::Sender<String>,
    token: CancellationToken,
    wait_until_exit: Duration,
    poll_interval: Duration,
) {
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open file");
            token.cancel();
            return;
        }
    };
    info!(path = %path.display(), "tailing file");
    let mut reader = BufReader::new(file);
    let mut pending = Vec::new();
    let mut last_read = Instant::now();

    while !token.is_cancelled() {
        match reader.read_until(b'\n', &mut pending).await {
            Ok(0) => {
                if last_read.elapsed() >= wait_until_exit {
                    info!(path = %path.display(), "no new lines, stopping tail");
                    break;
                }
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(poll_interval) => {}
                }
            }
            Ok(_) if pending.ends_with(b"\n") => {
                last_read = Instant::now();
                let line = match String::from_utf8(std::mem::take(&mut pending)) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping non UTF-8 line");
                        continue;
                    }
                };
                if lines.send(line).await.is_err() {
                    break;
                }
            }
            // Partial line; wait for the rest.
            Ok(_) => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "read failed");
                break;
            }
        }
    }
    token.cancel();
}

/// Publish every line received from a tail, then flush
async fn publish_lines(publisher: Arc<Publisher>, path: PathBuf, mut lines: mpsc::Receiver<String>) {
    let run_id = new_id();
    let mut published = 0;
    while let Some(line) = lines.recv().await {
        match publisher.publish_line(&line, &run_id).await {
            Ok(n) => published += n,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to publish"),
        }
    }
    if let Err(e) = publisher.flush_all().await {
        warn!(path = %path.display(), error = %e, "flush failed");
    }
    info!(path = %path.display(), run_id = %run_id, published, "finished file");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::producer::{factory_for, FactorySettings};
    use doe_core::{Scan, ScanType};
    use std::io::Write;

    fn scans(broker: &MemoryBroker) -> Vec<Scan> {
        broker
            .pending("ddr-scan-vp-test")
            .iter()
            .map(|m| Scan::unmarshal(&m.payload).unwrap())
            .collect()
    }

    async fn wait_for(broker: &MemoryBroker, host: &str) -> bool {
        for _ in 0..200 {
            if scans(broker).iter().any(|s| s.target_host() == host) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_tail_follows_create_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let broker = MemoryBroker::new();
        let factory = factory_for(ScanType::Ddr, &FactorySettings::default()).unwrap();
        let publisher = Publisher::new(Arc::new(broker.clone()), factory, "vp-test");
        let producer = WatchDirectoryProducer::new(Arc::new(publisher))
            .with_poll_interval(Duration::from_millis(10));

        let token = CancellationToken::new();
        let watch_dir = dir.path().to_path_buf();
        let run_token = token.clone();
        let handle = tokio::spawn(async move { producer.run(&watch_dir, run_token).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        let a = dir.path().join("a.csv");
        let mut file = std::fs::File::create(&a).unwrap();
        writeln!(file, "1.1.1.1").unwrap();
        file.sync_all().unwrap();
        assert!(wait_for(&broker, "1.1.1.1").await);

        std::fs::remove_file(&a).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        writeln!(file, "4.4.4.4").unwrap();
        drop(file);

        let mut b = std::fs::File::create(dir.path().join("b.csv")).unwrap();
        writeln!(b, "8.8.8.8").unwrap();
        b.sync_all().unwrap();
        assert!(wait_for(&broker, "8.8.8.8").await);

        token.cancel();
        handle.await.unwrap().unwrap();

        let scans = scans(&broker);
        assert!(scans.iter().all(|s| s.meta().vantage_point == "vp-test"));
        assert!(!scans.iter().any(|s| s.target_host() == "4.4.4.4"));
        let run_a = scans.iter().find(|s| s.target_host() == "1.1.1.1").unwrap();
        let run_b = scans.iter().find(|s| s.target_host() == "8.8.8.8").unwrap();
        assert_ne!(run_a.meta().run_id, run_b.meta().run_id);
    }

    #[tokio::test]
    async fn test_tail_exits_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        std::fs::write(&path, "9.9.9.9\npartial").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        tail(
            path,
            tx,
            token.clone(),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;

        assert_eq!(rx.recv().await.as_deref(), Some("9.9.9.9\n"));
        assert!(rx.recv().await.is_none());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_tail_skips_invalid_utf8_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        std::fs::write(&path, b"1.1.1.1\n\xff\xfe\n8.8.8.8\n").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tail(
            path,
            tx,
            CancellationToken::new(),
            Duration::from_millis(50),
            Duration::from_millis(10),
        )
        .await;

        assert_eq!(rx.recv().await.as_deref(), Some("1.1.1.1\n"));
        assert_eq!(rx.recv().await.as_deref(), Some("8.8.8.8\n"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_exited_tail_is_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.csv");
        std::fs::write(&path, "1.1.1.1\n").unwrap();

        let broker = MemoryBroker::new();
        let factory = factory_for(ScanType::Ddr, &FactorySettings::default()).unwrap();
        let publisher = Publisher::new(Arc::new(broker.clone()), factory, "vp-test");
        let producer = WatchDirectoryProducer::new(Arc::new(publisher))
            .with_wait_until_exit(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(10));

        let token = CancellationToken::new();
        let mut tails = Tails::default();
        tails.start(&producer, path.clone(), &token);
        assert_eq!(tails.tracked.len(), 1);

        while let Some(done) = tails.tasks.join_next().await {
            if let Some(path) = done.unwrap() {
                tails.forget(&path);
            }
        }
        assert!(tails.tracked.is_empty());
        assert_eq!(scans(&broker).len(), 1);

        // a live tail for the same path is kept
        tails.start(&producer, path.clone(), &token);
        tails.forget(&path);
        assert_eq!(tails.tracked.len(), 1);
        tails.shutdown().await;
    }
}
