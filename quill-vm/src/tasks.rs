//! Async unit bookkeeping and cancellation

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

/// Diagnostic id of an execution unit; the main unit is 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    pub const MAIN: TaskId = TaskId(0);
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// ID generator using an atomic counter
pub struct IdGenerator {
    counter: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }

    pub fn next_task_id(&self) -> TaskId {
        TaskId(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts outstanding async units so the host can wait for them
pub struct TaskTracker {
    ids: IdGenerator,
    outstanding: Mutex<usize>,
    done: Condvar,
    spawned: AtomicUsize,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self {
            ids: IdGenerator::new(),
            outstanding: Mutex::new(0),
            done: Condvar::new(),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Registers a new unit and returns its id
    pub fn begin(&self) -> TaskId {
        *self.outstanding.lock() += 1;
        self.spawned.fetch_add(1, Ordering::Relaxed);
        self.ids.next_task_id()
    }

    /// Marks a unit as finished
    pub fn finish(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.done.notify_all();
        }
    }

    pub fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }

    /// Total units started so far
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Blocks until no unit is outstanding
    pub fn wait(&self) {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            self.done.wait(&mut outstanding);
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound; true when all finished
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            if self.done.wait_for(&mut outstanding, timeout).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }
}

impl Default for TaskTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Program-wide cancellation signal.
///
/// Cancelling drops the internal sender, which makes [`receiver`](Self::receiver)
/// ready in every `select!` waiting on it.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.tx.lock().take();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Relaxed)
    }

    /// Becomes ready (disconnected) once cancelled
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.rx
    }

    /// Sleeps for `duration` unless cancelled first; true when cancelled
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.inner.rx.recv_timeout(duration) {
            Err(channel::RecvTimeoutError::Timeout) => self.is_cancelled(),
            _ => true,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
