// taillight - app/line_reader.rs
//
// Background line loading. A single worker thread services line-fetch
// requests so that scrolling over not-yet-decoded regions never blocks a
// render tick: the engine enqueues a request, renders a blank row, and
// installs the decoded line when the LineRead message arrives.

use crate::app::messages::{FileId, Message, MessageSender};
use crate::core::log_file::LogFile;
use crate::util::constants::{LINE_READER_RECV_TIMEOUT_MS, LINE_REQUEST_QUEUE_CAPACITY};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Identity of one in-flight read: (file, index, start, end).
pub type RequestKey = (FileId, usize, u64, u64);

enum Request {
    Read {
        file: Arc<LogFile>,
        id: FileId,
        index: usize,
        start: u64,
        end: u64,
    },
    /// Sentinel so `stop` can wake a worker blocked on an empty queue.
    Shutdown,
}

/// Handle to the line reader worker.
pub struct LineReader {
    tx: SyncSender<Request>,
    pending: Arc<Mutex<HashSet<RequestKey>>>,
    exit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LineReader {
    /// Spawn the worker. Decoded lines are posted to `sender` as
    /// `LineRead` messages.
    pub fn start(sender: MessageSender) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Request>(LINE_REQUEST_QUEUE_CAPACITY);
        let pending = Arc::new(Mutex::new(HashSet::new()));
        let exit = Arc::new(AtomicBool::new(false));

        let worker_pending = Arc::clone(&pending);
        let worker_exit = Arc::clone(&exit);
        let handle = std::thread::Builder::new()
            .name("line-reader".into())
            .spawn(move || {
                let timeout = Duration::from_millis(LINE_READER_RECV_TIMEOUT_MS);
                while !worker_exit.load(Ordering::Relaxed) {
                    let request = match rx.recv_timeout(timeout) {
                        Ok(request) => request,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    };
                    let Request::Read {
                        file,
                        id,
                        index,
                        start,
                        end,
                    } = request
                    else {
                        break;
                    };
                    worker_pending
                        .lock()
                        .expect("pending set poisoned")
                        .remove(&(id, index, start, end));
                    if worker_exit.load(Ordering::Relaxed) {
                        break;
                    }
                    let line = file.get_line(start, end);
                    sender.send(Message::LineRead {
                        file: id,
                        index,
                        start,
                        end,
                        line,
                    });
                }
            })
            .expect("failed to spawn line reader thread");

        Self {
            tx,
            pending,
            exit,
            handle: Some(handle),
        }
    }

    /// Enqueue a line fetch unless an identical request is already in
    /// flight. No two simultaneously pending requests share a key.
    pub fn request_line(&self, file: &Arc<LogFile>, id: FileId, index: usize, start: u64, end: u64) {
        let key: RequestKey = (id, index, start, end);
        {
            let mut pending = self.pending.lock().expect("pending set poisoned");
            if !pending.insert(key) {
                return;
            }
        }
        // The queue bound applies backpressure here if the worker is far
        // behind; matching the pending insert above keeps the key retired
        // exactly once by the worker.
        if self
            .tx
            .send(Request::Read {
                file: Arc::clone(file),
                id,
                index,
                start,
                end,
            })
            .is_err()
        {
            self.pending
                .lock()
                .expect("pending set poisoned")
                .remove(&key);
        }
    }

    /// Whether a request with this key is currently in flight.
    pub fn is_pending(&self, key: &RequestKey) -> bool {
        self.pending
            .lock()
            .expect("pending set poisoned")
            .contains(key)
    }

    /// Signal shutdown and join the worker. The worker exits cleanly even
    /// with requests still queued.
    pub fn stop(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
        let _ = self.tx.try_send(Request::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("pending", &self.pending.lock().map(|p| p.len()).unwrap_or(0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::messages;

    fn fixture(content: &[u8]) -> (tempfile::TempDir, Arc<LogFile>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.log");
        std::fs::write(&path, content).unwrap();
        let log_file = LogFile::new(&path);
        log_file.open(&AtomicBool::new(false)).unwrap();
        (dir, Arc::new(log_file))
    }

    #[test]
    fn test_delivers_line_read_message() {
        let (_dir, file) = fixture(b"alpha\nbeta\n");
        let (tx, rx) = messages::channel();
        let mut reader = LineReader::start(tx);

        reader.request_line(&file, FileId(0), 1, 5, 10);

        let envelope = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("LineRead within timeout");
        match envelope.message {
            Message::LineRead {
                file: id,
                index,
                start,
                end,
                line,
            } => {
                assert_eq!(id, FileId(0));
                assert_eq!(index, 1);
                assert_eq!((start, end), (5, 10));
                assert_eq!(line, "beta");
            }
            other => panic!("expected LineRead, got {other:?}"),
        }
        reader.stop();
    }

    #[test]
    fn test_duplicate_request_is_single_flight() {
        let (_dir, file) = fixture(b"alpha\nbeta\n");
        let (tx, rx) = messages::channel();
        let mut reader = LineReader::start(tx);

        let requests = 10;
        for _ in 0..requests {
            reader.request_line(&file, FileId(0), 0, 0, 5);
        }
        // Every request issued while the key was still pending was dropped
        // at the door; a request issued after the worker retired the key is
        // legitimately in flight again, so the observable bound is "no more
        // deliveries than requests, at least one delivery".
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_some());
        std::thread::sleep(Duration::from_millis(100));
        let mut delivered = 1;
        while rx.try_recv().is_some() {
            delivered += 1;
        }
        assert!(delivered <= requests);
        assert!(!reader.is_pending(&(FileId(0), 0, 0, 5)));
        reader.stop();
    }

    #[test]
    fn test_stop_joins_cleanly_with_queued_requests() {
        let (_dir, file) = fixture(b"alpha\nbeta\n");
        let (tx, _rx) = messages::channel();
        let mut reader = LineReader::start(tx);
        for index in 0..100 {
            reader.request_line(&file, FileId(0), index, 0, 5);
        }
        reader.stop();
    }

    #[test]
    fn test_request_after_completion_is_pending_again() {
        let (_dir, file) = fixture(b"alpha\nbeta\n");
        let (tx, rx) = messages::channel();
        let mut reader = LineReader::start(tx);

        reader.request_line(&file, FileId(0), 0, 0, 5);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_some());

        // The key was retired, so an identical request goes through again.
        reader.request_line(&file, FileId(0), 0, 0, 5);
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_some());
        reader.stop();
    }
}
