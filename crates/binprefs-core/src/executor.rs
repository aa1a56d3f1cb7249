//! Write Executor: ordered write-behind to the file store
//!
//! Every persistence side effect of a store goes through one FIFO queue
//! drained by one background thread, so operations reach the [`FileStore`]
//! in exactly the order they were submitted. There are two ways in:
//!
//! - [`WriteExecutor::submit`]: enqueue and return (editor `apply`)
//! - [`WriteExecutor::submit_tracked`]: enqueue and get a [`Ticket`] to wait
//!   on (editor `commit`)
//!
//! Both push onto the same queue. The queue is bounded; submitters block
//! while it is full.
//!
//! A failed operation is reported to the error handler and counted; it does
//! not stop the operations queued behind it. Nothing is retried.
//! On shutdown the worker drains what is already queued before exiting.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::error::{PrefsError, PrefsResult};
use crate::file_store::FileStore;
use crate::handler::ErrorHandler;

/// A single persistence operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Save the encoded record for a key
    Persist { key: String, record: Vec<u8> },
    /// Delete a key's record
    Delete { key: String },
    /// Delete every record
    Clear,
}

impl WriteOp {
    /// Key the operation targets; `None` for `Clear`.
    pub fn key(&self) -> Option<&str> {
        match self {
            WriteOp::Persist { key, .. } | WriteOp::Delete { key } => Some(key),
            WriteOp::Clear => None,
        }
    }
}

/// Completion tracking for one tracked batch.
#[derive(Debug)]
struct Completion {
    state: Mutex<CompletionState>,
    done: Condvar,
}

#[derive(Debug)]
struct CompletionState {
    remaining: usize,
    failed: usize,
}

impl Completion {
    fn new(operations: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CompletionState { remaining: operations, failed: 0 }),
            done: Condvar::new(),
        })
    }

    fn record(&self, ok: bool) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if !ok {
            state.failed += 1;
        }
        if state.remaining == 0 {
            self.done.notify_all();
        }
    }
}

/// Handle on a tracked batch.
#[derive(Debug, Clone)]
pub struct Ticket {
    completion: Arc<Completion>,
}

impl Ticket {
    /// Block until every operation of the batch has executed.
    ///
    /// Returns true only if all of them succeeded.
    pub fn wait(&self) -> bool {
        let mut state = self.completion.state.lock();
        while state.remaining > 0 {
            self.completion.done.wait(&mut state);
        }
        state.failed == 0
    }

    pub fn is_done(&self) -> bool {
        self.completion.state.lock().remaining == 0
    }
}

enum Job {
    Write {
        op: WriteOp,
        completion: Option<Arc<Completion>>,
    },
    Barrier(Arc<Completion>),
}

struct Queue {
    jobs: VecDeque<Job>,
    closed: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    executed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time executor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteStats {
    /// Operations attempted since start
    pub executed: u64,
    /// Operations that failed since start
    pub failed: u64,
    /// Jobs waiting in the queue
    pub pending: usize,
}

/// Owner of the worker thread. Dropping it drains the queue and joins.
pub struct WriteExecutor {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl WriteExecutor {
    /// Spawn the worker thread for one store.
    pub fn start(
        name: &str,
        store: Arc<dyn FileStore>,
        handler: Arc<dyn ErrorHandler>,
        capacity: usize,
    ) -> PrefsResult<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue { jobs: VecDeque::new(), closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("binprefs-writer-{}", name))
            .spawn(move || run_worker(worker_shared, store, handler))
            .map_err(|e| PrefsError::io(name, "failed to spawn writer thread", e))?;

        Ok(Self { shared, worker: Some(worker) })
    }

    /// Enqueue operations without waiting for them.
    pub fn submit(&self, ops: Vec<WriteOp>) -> PrefsResult<()> {
        self.enqueue(ops.into_iter().map(|op| Job::Write { op, completion: None }))
    }

    /// Enqueue operations and return a ticket that resolves once all of
    /// them have executed.
    pub fn submit_tracked(&self, ops: Vec<WriteOp>) -> PrefsResult<Ticket> {
        let completion = Completion::new(ops.len());
        let ticket = Ticket { completion: Arc::clone(&completion) };
        self.enqueue(ops.into_iter().map(|op| Job::Write {
            op,
            completion: Some(Arc::clone(&completion)),
        }))?;
        Ok(ticket)
    }

    /// Block until everything submitted before this call has executed.
    pub fn flush(&self) -> PrefsResult<()> {
        let completion = Completion::new(1);
        let ticket = Ticket { completion: Arc::clone(&completion) };
        self.enqueue(std::iter::once(Job::Barrier(completion)))?;
        ticket.wait();
        Ok(())
    }

    pub fn stats(&self) -> WriteStats {
        WriteStats {
            executed: self.shared.executed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            pending: self.shared.queue.lock().jobs.len(),
        }
    }

    /// Request shutdown and wait for the worker to drain the queue.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn enqueue(&self, jobs: impl Iterator<Item = Job>) -> PrefsResult<()> {
        let mut queue = self.shared.queue.lock();
        if queue.closed {
            return Err(PrefsError::Closed);
        }
        for job in jobs {
            while queue.jobs.len() >= self.shared.capacity {
                self.shared.not_full.wait(&mut queue);
            }
            queue.jobs.push_back(job);
            self.shared.not_empty.notify_one();
        }
        Ok(())
    }

    fn stop(&mut self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
        }
        self.shared.not_empty.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WriteExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker loop: pop jobs in order until closed and empty.
fn run_worker(shared: Arc<Shared>, store: Arc<dyn FileStore>, handler: Arc<dyn ErrorHandler>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    shared.not_full.notify_one();
                    break job;
                }
                if queue.closed {
                    debug!(
                        executed = shared.executed.load(Ordering::Relaxed),
                        failed = shared.failed.load(Ordering::Relaxed),
                        "write executor stopped"
                    );
                    return;
                }
                shared.not_empty.wait(&mut queue);
            }
        };

        match job {
            Job::Barrier(completion) => completion.record(true),
            Job::Write { op, completion } => {
                let ok = execute(store.as_ref(), handler.as_ref(), &op);
                shared.executed.fetch_add(1, Ordering::Relaxed);
                if !ok {
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(completion) = completion {
                    completion.record(ok);
                }
            }
        }
    }
}

/// Run one operation against the store, reporting any failure.
fn execute(store: &dyn FileStore, handler: &dyn ErrorHandler, op: &WriteOp) -> bool {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match op {
        WriteOp::Persist { key, record } => store.save(key, record),
        WriteOp::Delete { key } => store.remove(key),
        WriteOp::Clear => store.clear(),
    }));

    let subject = op.key().unwrap_or("<store>");
    let result = outcome.unwrap_or_else(|_| {
        Err(PrefsError::Io {
            target: subject.to_string(),
            kind: std::io::ErrorKind::Other,
            message: "file store panicked".to_string(),
        })
    });

    match result {
        Ok(()) => {
            trace!(key = subject, op = op_name(op), "write executed");
            true
        }
        Err(e) => {
            // A panicking handler must not take the worker down with it
            let reported = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&e, subject)));
            if reported.is_err() {
                warn!(key = subject, error = %e, "error handler panicked");
            }
            false
        }
    }
}

fn op_name(op: &WriteOp) -> &'static str {
    match op {
        WriteOp::Persist { .. } => "persist",
        WriteOp::Delete { .. } => "delete",
        WriteOp::Clear => "clear",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::NoopErrorHandler;
    use crate::memory_store::{MemoryFileStore, StoreOp};
    use std::time::Duration;

    fn persist(key: &str, byte: u8) -> WriteOp {
        WriteOp::Persist { key: key.to_string(), record: vec![byte] }
    }

    fn start(store: &Arc<MemoryFileStore>, capacity: usize) -> WriteExecutor {
        let file_store: Arc<dyn FileStore> = Arc::clone(store) as Arc<dyn FileStore>;
        WriteExecutor::start("test", file_store, Arc::new(NoopErrorHandler), capacity).unwrap()
    }

    #[test]
    fn test_operations_execute_in_submission_order() {
        let store = Arc::new(MemoryFileStore::new());
        let executor = start(&store, 4);

        executor.submit(vec![persist("a", 1), persist("b", 1)]).unwrap();
        let ticket = executor
            .submit_tracked(vec![WriteOp::Delete { key: "a".into() }, persist("a", 2)])
            .unwrap();
        executor.submit(vec![persist("c", 1)]).unwrap();

        assert!(ticket.wait());
        executor.flush().unwrap();

        assert_eq!(
            store.operations(),
            vec![
                StoreOp::Save("a".into()),
                StoreOp::Save("b".into()),
                StoreOp::Remove("a".into()),
                StoreOp::Save("a".into()),
                StoreOp::Save("c".into()),
            ]
        );
        assert_eq!(store.raw("a"), Some(vec![2]));
    }

    #[test]
    fn test_tracked_failure_does_not_stop_queue() {
        let store = Arc::new(MemoryFileStore::new());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let handler = move |err: &PrefsError, ctx: &str| sink.lock().push((err.clone(), ctx.to_string()));
        let file_store: Arc<dyn FileStore> = Arc::clone(&store) as Arc<dyn FileStore>;
        let executor = WriteExecutor::start("test", file_store, Arc::new(handler), 8).unwrap();

        store.fail_removes(true);
        let ticket = executor
            .submit_tracked(vec![persist("x", 1), WriteOp::Delete { key: "y".into() }, persist("z", 1)])
            .unwrap();
        assert!(!ticket.wait());

        assert_eq!(store.raw("x"), Some(vec![1]));
        assert_eq!(store.raw("z"), Some(vec![1]));
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1, "y");

        let stats = executor.stats();
        assert_eq!(stats.executed, 3);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_empty_tracked_batch_resolves_immediately() {
        let store = Arc::new(MemoryFileStore::new());
        let executor = start(&store, 1);
        let ticket = executor.submit_tracked(Vec::new()).unwrap();
        assert!(ticket.is_done());
        assert!(ticket.wait());
    }

    #[test]
    fn test_bounded_queue_applies_backpressure() {
        let store = Arc::new(MemoryFileStore::new());
        store.set_save_delay(Duration::from_millis(5));
        let executor = start(&store, 2);

        let ops: Vec<WriteOp> = (0..10).map(|i| persist(&format!("k{}", i), i as u8)).collect();
        executor.submit(ops).unwrap();
        executor.flush().unwrap();

        assert_eq!(store.len(), 10);
        assert_eq!(executor.stats().pending, 0);
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let store = Arc::new(MemoryFileStore::new());
        store.set_save_delay(Duration::from_millis(10));
        let executor = start(&store, 16);

        executor.submit(vec![persist("a", 1), persist("b", 2), persist("c", 3)]).unwrap();
        executor.shutdown();

        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_panicking_handler_keeps_worker_alive() {
        let store = Arc::new(MemoryFileStore::new());
        let handler = |_: &PrefsError, _: &str| panic!("handler failed");
        let file_store: Arc<dyn FileStore> = Arc::clone(&store) as Arc<dyn FileStore>;
        let executor = WriteExecutor::start("test", file_store, Arc::new(handler), 4).unwrap();

        store.fail_saves(true);
        let ticket = executor.submit_tracked(vec![persist("a", 1)]).unwrap();
        assert!(!ticket.wait());

        store.fail_saves(false);
        let ticket = executor.submit_tracked(vec![persist("b", 2)]).unwrap();
        assert!(ticket.wait());
        assert_eq!(store.raw("b"), Some(vec![2]));

        let stats = executor.stats();
        assert_eq!(stats.executed, 2);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_clear_op() {
        let store = Arc::new(MemoryFileStore::new());
        store.insert_raw("old", &[1]);
        let executor = start(&store, 4);

        let ticket = executor.submit_tracked(vec![WriteOp::Clear, persist("new", 1)]).unwrap();
        assert!(ticket.wait());
        assert_eq!(store.raw("old"), None);
        assert_eq!(store.raw("new"), Some(vec![1]));
    }
}
