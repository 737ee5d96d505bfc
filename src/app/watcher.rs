// taillight - app/watcher.rs
//
// Watches open log files for growth. When bytes appear past the last known
// position they are read in bounded positional chunks, scanned for newline
// offsets, and delivered to the owning engine as NewBreaks{tail} messages.
// The watcher holds only typed sender handles; it never touches engine
// state.
//
// Two interchangeable variants share one loop:
//   - Events: a notify watcher feeds wakeups into the tick loop, giving
//     near-zero detection latency with a 100 ms fallback rescan.
//   - Polling: a plain 50 ms tick.
//
// Per file, growth notifications are strictly increasing in byte position,
// and every newline offset past the registration size is delivered at
// least once.

use crate::app::messages::{FileId, Message, MessageSender};
use crate::core::log_file::LogFile;
use crate::util::constants::{
    BACKPRESSURE_HIGH_WATER, BACKPRESSURE_LOW_WATER, BACKPRESSURE_SLEEP_MS, WATCH_CHUNK_SIZE,
    WATCH_EVENT_TIMEOUT_MS, WATCH_POLL_INTERVAL_MS,
};
use notify::Watcher as _;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Which growth-detection strategy the watcher thread runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    Events,
    Polling,
}

enum Command {
    Add {
        file: Arc<LogFile>,
        id: FileId,
        sender: MessageSender,
    },
    Close,
}

/// Cloneable handle used by engines to register files.
#[derive(Clone)]
pub struct WatcherHandle {
    cmd_tx: Sender<Command>,
}

impl WatcherHandle {
    /// Register a file, recording its current size as the starting byte
    /// position. Growth and errors are posted to `sender`.
    pub fn add(&self, file: Arc<LogFile>, id: FileId, sender: MessageSender) {
        let _ = self.cmd_tx.send(Command::Add { file, id, sender });
    }
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// The watcher thread. One instance is shared across engines.
#[derive(Debug)]
pub struct Watcher {
    cmd_tx: Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    /// Spawn a watcher of the given kind.
    pub fn spawn(kind: WatcherKind) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("watcher".into())
            .spawn(move || run(cmd_rx, kind))
            .expect("failed to spawn watcher thread");
        tracing::debug!(?kind, "Watcher started");
        Self {
            cmd_tx,
            handle: Some(handle),
        }
    }

    /// The platform-preferred variant: event-driven where the notification
    /// backends are dependable for plain files, polling elsewhere.
    pub fn spawn_default() -> Self {
        if cfg!(unix) {
            Self::spawn(WatcherKind::Events)
        } else {
            Self::spawn(WatcherKind::Polling)
        }
    }

    pub fn handle(&self) -> WatcherHandle {
        WatcherHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Stop the thread and join. Outstanding reads finish best-effort.
    pub fn close(&mut self) {
        let _ = self.cmd_tx.send(Command::Close);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.close();
        }
    }
}

// =============================================================================
// Watcher thread
// =============================================================================

struct WatchedFile {
    file: Arc<LogFile>,
    id: FileId,
    sender: MessageSender,
    /// Last byte position known to have been delivered.
    position: u64,
}

fn run(cmd_rx: Receiver<Command>, kind: WatcherKind) {
    let mut files: Vec<WatchedFile> = Vec::new();

    // Event variant: a notify backend pushes wakeups into wake_rx. The tick
    // loop then rescans every watched file, so a single wakeup covers all
    // files and missed events are healed by the timeout rescan.
    let (wake_tx, wake_rx) = mpsc::channel::<()>();
    let mut notify_backend = match kind {
        WatcherKind::Events => {
            match notify::recommended_watcher(move |result: Result<notify::Event, _>| {
                if let Ok(event) = result {
                    if matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                    ) {
                        let _ = wake_tx.send(());
                    }
                }
            }) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    tracing::warn!(error = %e, "Notify backend unavailable; falling back to timed rescan");
                    None
                }
            }
        }
        WatcherKind::Polling => None,
    };

    loop {
        // Drain registration commands.
        loop {
            match cmd_rx.try_recv() {
                Ok(Command::Add { file, id, sender }) => {
                    if let Some(backend) = notify_backend.as_mut() {
                        let target = file.path().parent().unwrap_or_else(|| file.path());
                        if let Err(e) =
                            backend.watch(target, notify::RecursiveMode::NonRecursive)
                        {
                            tracing::warn!(
                                file = %file.path().display(),
                                error = %e,
                                "Failed to register notify watch; relying on timed rescan"
                            );
                        }
                    }
                    let position = file.size();
                    tracing::debug!(
                        file = %file.path().display(),
                        position,
                        "Watching file for growth"
                    );
                    files.push(WatchedFile {
                        file,
                        id,
                        sender,
                        position,
                    });
                }
                Ok(Command::Close) => return,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        // Scan every watched file for new bytes; deregister on error.
        files.retain_mut(|watched| match tick(watched) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    file = %watched.file.path().display(),
                    error = %e,
                    "Watch read failed; deregistering"
                );
                watched.sender.send(Message::FileError {
                    file: Some(watched.id),
                    error: format!("{}: {e}", watched.file.name()),
                });
                false
            }
        });

        // Idle until the next tick.
        match kind {
            WatcherKind::Events => match wake_rx.recv_timeout(Duration::from_millis(
                WATCH_EVENT_TIMEOUT_MS,
            )) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // Backend gone; degrade to timed rescans.
                    std::thread::sleep(Duration::from_millis(WATCH_EVENT_TIMEOUT_MS));
                }
            },
            WatcherKind::Polling => {
                std::thread::sleep(Duration::from_millis(WATCH_POLL_INTERVAL_MS));
            }
        }
    }
}

/// Read one bounded chunk past the last known position and deliver any
/// newline offsets found in it.
fn tick(watched: &mut WatchedFile) -> std::io::Result<()> {
    let chunk = watched
        .file
        .get_raw(watched.position, watched.position + WATCH_CHUNK_SIZE as u64)?;
    if chunk.is_empty() {
        return Ok(());
    }

    let breaks: Vec<u64> = memchr::memchr_iter(b'\n', &chunk)
        .map(|offset| watched.position + offset as u64)
        .collect();
    watched.position += chunk.len() as u64;

    watched.sender.send(Message::SizeChanged {
        size: watched.position,
    });
    watched.sender.send(Message::NewBreaks {
        file: watched.id,
        breaks,
        scanned_size: watched.position,
        tail: true,
    });

    // Backpressure: never flood an engine that is not draining. Bounded so
    // a dropped receiver cannot wedge the watcher.
    if watched.sender.len() > BACKPRESSURE_HIGH_WATER {
        let mut waited = 0;
        while watched.sender.len() > BACKPRESSURE_LOW_WATER && waited < 20 {
            std::thread::sleep(Duration::from_millis(BACKPRESSURE_SLEEP_MS));
            waited += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::messages;
    use std::io::Write;
    use std::sync::atomic::AtomicBool;

    fn open_log(path: &std::path::Path) -> Arc<LogFile> {
        let log_file = LogFile::new(path);
        log_file.open(&AtomicBool::new(false)).unwrap();
        Arc::new(log_file)
    }

    /// Collect NewBreaks offsets until `expected` offsets arrive or the
    /// timeout lapses.
    fn collect_breaks(
        rx: &messages::MessageReceiver,
        expected: usize,
        timeout: Duration,
    ) -> Vec<u64> {
        let deadline = std::time::Instant::now() + timeout;
        let mut offsets = Vec::new();
        while offsets.len() < expected && std::time::Instant::now() < deadline {
            if let Some(envelope) = rx.recv_timeout(Duration::from_millis(100)) {
                if let Message::NewBreaks { breaks, .. } = envelope.message {
                    offsets.extend(breaks);
                }
            }
        }
        offsets
    }

    fn growth_round_trip(kind: WatcherKind) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.log");
        std::fs::write(&path, b"a\n").unwrap();

        let log_file = open_log(&path);
        let (tx, rx) = messages::channel();

        let mut watcher = Watcher::spawn(kind);
        watcher.handle().add(Arc::clone(&log_file), FileId(0), tx);

        // Give the watcher a moment to register before appending.
        std::thread::sleep(Duration::from_millis(150));
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"bb\n").unwrap();
        file.flush().unwrap();

        let offsets = collect_breaks(&rx, 1, Duration::from_secs(5));
        assert_eq!(offsets, vec![4], "expected the appended newline offset");
        watcher.close();
    }

    #[test]
    fn test_polling_watcher_reports_growth() {
        growth_round_trip(WatcherKind::Polling);
    }

    #[test]
    fn test_event_watcher_reports_growth() {
        growth_round_trip(WatcherKind::Events);
    }

    #[test]
    fn test_growth_positions_strictly_increase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.log");
        std::fs::write(&path, b"start\n").unwrap();

        let log_file = open_log(&path);
        let (tx, rx) = messages::channel();
        let mut watcher = Watcher::spawn(WatcherKind::Polling);
        watcher.handle().add(Arc::clone(&log_file), FileId(0), tx);

        std::thread::sleep(Duration::from_millis(150));
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        for i in 0..5 {
            writeln!(file, "line {i}").unwrap();
            file.flush().unwrap();
            std::thread::sleep(Duration::from_millis(80));
        }

        let offsets = collect_breaks(&rx, 5, Duration::from_secs(10));
        assert!(offsets.len() >= 5);
        assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
        watcher.close();
    }

    #[test]
    fn test_close_joins_promptly() {
        let mut watcher = Watcher::spawn(WatcherKind::Polling);
        watcher.close();
    }
}
