// taillight - app/messages.rs
//
// Typed, ordered, coalescible messages from the engine and its background
// workers to a UI collaborator.
//
// The queue is a small Mutex<VecDeque> + Condvar pair rather than an mpsc
// channel because coalescing needs to replace a message that is still
// queued: for PendingLines, PointerMoved, and SizeChanged only the latest
// value matters and bursts must not flood a render loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Identifies one of the engine's log files in messages and cache keys.
/// Assigned by the engine in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

/// A merge-index entry produced by the timestamp scan:
/// (file line number, end position, timestamp in UNIX seconds).
pub type MergeEntry = (usize, u64, f64);

// =============================================================================
// Message
// =============================================================================

/// All messages that flow from background work to the engine and onward to
/// its collaborator.
#[derive(Debug, Clone)]
pub enum Message {
    /// Scan progress for the loading indicator.
    ScanProgress {
        message: String,
        complete: f64,
        scan_start: Option<u64>,
    },

    /// New line break offsets for a file. `tail` marks watcher appends,
    /// which arrive in order; initial-scan batches arrive in reverse and
    /// are re-sorted on receipt.
    NewBreaks {
        file: FileId,
        breaks: Vec<u64>,
        scanned_size: u64,
        tail: bool,
    },

    /// A batch of merge-index entries from the merge scan worker.
    MergeBatch {
        file: FileId,
        entries: Vec<MergeEntry>,
    },

    /// The initial scan has finished (or was cancelled with partial results).
    ScanComplete { size: u64, scan_start: u64 },

    /// Unseen lines have accrued while tailing is off.
    PendingLines { count: usize },

    /// The pointer line changed.
    PointerMoved { pointer_line: Option<usize> },

    /// A watched file's size changed.
    SizeChanged { size: u64 },

    /// A requested line has been read and decoded.
    LineRead {
        file: FileId,
        index: usize,
        start: u64,
        end: u64,
        line: String,
    },

    /// A file could not be opened, read, or watched.
    FileError {
        file: Option<FileId>,
        error: String,
    },

    /// Request to dismiss any overlay.
    DismissOverlay,

    /// Tail mode changed.
    TailFile { tail: bool },

    /// Request to open the goto prompt.
    Goto,
}

impl Message {
    /// Whether this message replaces `other` if `other` is still queued.
    /// Only the latest PendingLines / PointerMoved / SizeChanged matters.
    pub fn can_replace(&self, other: &Message) -> bool {
        matches!(
            (self, other),
            (Message::PendingLines { .. }, Message::PendingLines { .. })
                | (Message::PointerMoved { .. }, Message::PointerMoved { .. })
                | (Message::SizeChanged { .. }, Message::SizeChanged { .. })
        )
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A queued message plus the shared event-stop flag: any observer may stop
/// an envelope to prevent further propagation downstream.
#[derive(Debug)]
pub struct Envelope {
    pub message: Message,
    stopped: AtomicBool,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            stopped: AtomicBool::new(false),
        }
    }

    /// Prevent downstream observers from seeing this message.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Queue
// =============================================================================

#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<VecDeque<Envelope>>,
    ready: Condvar,
}

/// Sending half of the message queue. Cheap to clone; background workers
/// hold only senders.
#[derive(Debug, Clone)]
pub struct MessageSender {
    shared: Arc<Shared>,
}

impl MessageSender {
    /// Enqueue a message, replacing a queued message of the same coalescible
    /// kind if one is present.
    pub fn send(&self, message: Message) {
        let mut queue = self.shared.queue.lock().expect("message queue poisoned");
        if let Some(slot) = queue
            .iter_mut()
            .rev()
            .find(|envelope| message.can_replace(&envelope.message))
        {
            *slot = Envelope::new(message);
        } else {
            queue.push_back(Envelope::new(message));
        }
        drop(queue);
        self.shared.ready.notify_one();
    }

    /// Number of messages currently queued. Used by the watcher and scan
    /// workers for backpressure.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().expect("message queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving half; owned by the engine.
#[derive(Debug)]
pub struct MessageReceiver {
    shared: Arc<Shared>,
}

impl MessageReceiver {
    /// Receive the next message, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Envelope> {
        let mut queue = self.shared.queue.lock().expect("message queue poisoned");
        if let Some(envelope) = queue.pop_front() {
            return Some(envelope);
        }
        let (mut queue, _result) = self
            .shared
            .ready
            .wait_timeout(queue, timeout)
            .expect("message queue poisoned");
        queue.pop_front()
    }

    /// Receive the next message without waiting.
    pub fn try_recv(&self) -> Option<Envelope> {
        self.shared
            .queue
            .lock()
            .expect("message queue poisoned")
            .pop_front()
    }
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (MessageSender, MessageReceiver) {
    let shared = Arc::new(Shared::default());
    (
        MessageSender {
            shared: Arc::clone(&shared),
        },
        MessageReceiver { shared },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_delivery() {
        let (tx, rx) = channel();
        tx.send(Message::Goto);
        tx.send(Message::DismissOverlay);
        assert!(matches!(rx.try_recv().unwrap().message, Message::Goto));
        assert!(matches!(
            rx.try_recv().unwrap().message,
            Message::DismissOverlay
        ));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_pending_lines_coalesces() {
        let (tx, rx) = channel();
        tx.send(Message::PendingLines { count: 1 });
        tx.send(Message::Goto);
        tx.send(Message::PendingLines { count: 5 });
        // The later count replaces the earlier one in place.
        match rx.try_recv().unwrap().message {
            Message::PendingLines { count } => assert_eq!(count, 5),
            other => panic!("expected PendingLines, got {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap().message, Message::Goto));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_non_coalescible_kinds_accumulate() {
        let (tx, rx) = channel();
        tx.send(Message::NewBreaks {
            file: FileId(0),
            breaks: vec![1],
            scanned_size: 2,
            tail: false,
        });
        tx.send(Message::NewBreaks {
            file: FileId(0),
            breaks: vec![3],
            scanned_size: 4,
            tail: false,
        });
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn test_recv_timeout_wakes_on_send() {
        let (tx, rx) = channel();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.send(Message::Goto);
        });
        let envelope = rx.recv_timeout(Duration::from_secs(2));
        assert!(envelope.is_some());
        handle.join().unwrap();
    }

    #[test]
    fn test_recv_timeout_elapses_empty() {
        let (_tx, rx) = channel();
        assert!(rx.recv_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn test_event_stop() {
        let envelope = Envelope::new(Message::Goto);
        assert!(!envelope.is_stopped());
        envelope.stop();
        assert!(envelope.is_stopped());
    }

    #[test]
    fn test_len_reflects_queue_depth() {
        let (tx, rx) = channel();
        assert!(tx.is_empty());
        tx.send(Message::Goto);
        tx.send(Message::DismissOverlay);
        assert_eq!(tx.len(), 2);
        rx.try_recv();
        assert_eq!(tx.len(), 1);
    }
}
