// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The work queue facade (component D).
//!
//! [`WorkQueue`] is the interface every other component in this crate submits work through - the
//! concrete scheduling policy (work-stealing, priority lanes, NUMA-aware placement, ...) is out of
//! scope here, same as [`HostAllocator`][crate::HostAllocator]. [`ThreadPoolWorkQueue`] is the one
//! concrete implementation this crate ships, backed by a fixed-size `threadpool::ThreadPool` for
//! non-blocking work and a bounded `async-channel` fed to a small pool of dedicated threads for
//! work that is allowed to block.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

/// A task submitted to a [`WorkQueue`].
pub type Task = Box<dyn FnOnce() + Send>;

/// The interface every scheduling primitive in this crate (parallel-for, join records, shared
/// context construction) submits work through.
pub trait WorkQueue: Send + Sync {
    /// Submits `task` to the non-blocking queue. Never blocks the calling thread. The task is
    /// expected not to block for long - use [`WorkQueue::try_enqueue_blocking`] for work that may.
    fn enqueue(&self, task: Task);

    /// Submits `task`, which may block, to the blocking queue.
    ///
    /// # Errors
    ///
    /// Returns `task` back, unrun, if the blocking queue is full and `allow_queuing` is `false`.
    /// If `allow_queuing` is `true`, this call instead blocks the caller until space is available
    /// and always succeeds.
    fn try_enqueue_blocking(&self, task: Task, allow_queuing: bool) -> std::result::Result<(), Task>;

    /// Blocks the calling thread until every task enqueued so far (on either queue, including
    /// tasks that have themselves enqueued further tasks) has completed.
    fn await_all(&self);

    /// Blocks the calling thread until the queue is fully drained: no task is outstanding and none
    /// is pending, even transitively through tasks that enqueue further tasks as they run.
    fn quiesce(&self);

    /// The number of worker threads backing the non-blocking queue.
    fn parallelism_level(&self) -> usize;
}

/// A [`WorkQueue`] backed by a `threadpool::ThreadPool` (non-blocking work) and a bounded
/// `async-channel` fed to dedicated threads (blocking work).
pub struct ThreadPoolWorkQueue {
    pool: threadpool::ThreadPool,
    blocking_tx: async_channel::Sender<Task>,
    outstanding: Arc<Outstanding>,
    parallelism_level: usize,
    // Kept alive for the lifetime of the queue so the blocking workers' `recv_blocking` calls
    // return `Err` (and the threads exit) once this queue is dropped, instead of leaking threads.
    _blocking_workers: Vec<std::thread::JoinHandle<()>>,
}

impl std::fmt::Debug for ThreadPoolWorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolWorkQueue")
            .field("parallelism_level", &self.parallelism_level)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Outstanding {
    count: AtomicUsize,
    lock: Mutex<()>,
    drained: Condvar,
}

impl Outstanding {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _guard = self.lock.lock();
            self.drained.notify_all();
        }
    }

    fn wait_until_drained(&self) {
        let mut guard = self.lock.lock();
        while self.count.load(Ordering::SeqCst) != 0 {
            self.drained.wait(&mut guard);
        }
    }
}

impl ThreadPoolWorkQueue {
    /// Creates a queue with `worker_threads` non-blocking workers and a blocking queue bounded to
    /// `blocking_queue_capacity` pending tasks, backed by the same number of dedicated threads.
    #[must_use]
    pub fn new(worker_threads: usize, blocking_queue_capacity: usize) -> Self {
        let pool = threadpool::Builder::new()
            .num_threads(worker_threads)
            .thread_name("hostrt-worker".to_string())
            .build();

        let (blocking_tx, blocking_rx) = async_channel::bounded::<Task>(blocking_queue_capacity.max(1));
        let outstanding = Arc::new(Outstanding::default());

        let blocking_workers = (0..worker_threads.max(1))
            .map(|index| {
                let blocking_rx = blocking_rx.clone();
                let outstanding = Arc::clone(&outstanding);
                std::thread::Builder::new()
                    .name(format!("hostrt-blocking-{index}"))
                    .spawn(move || {
                        crate::non_blocking_thread::flag_current_thread();
                        while let Ok(task) = blocking_rx.recv_blocking() {
                            let _guard = scopeguard::guard(&outstanding, |outstanding| outstanding.end());
                            task();
                        }
                    })
                    .expect("spawning a blocking worker thread")
            })
            .collect();

        Self {
            pool,
            blocking_tx,
            outstanding,
            parallelism_level: worker_threads.max(1),
            _blocking_workers: blocking_workers,
        }
    }
}

impl WorkQueue for ThreadPoolWorkQueue {
    fn enqueue(&self, task: Task) {
        self.outstanding.begin();
        let outstanding = Arc::clone(&self.outstanding);
        self.pool.execute(move || {
            // `threadpool` gives us no per-worker-thread startup hook, and it reuses threads
            // across tasks, so flag on every invocation rather than once - `flag_current_thread`
            // is a single thread-local `Cell::set`, cheap enough to repeat. Without this, a task
            // running here that calls `await_all`/`quiesce`/`await_values` on a value only this
            // same pool can resolve would deadlock with no guard catching it.
            crate::non_blocking_thread::flag_current_thread();

            // `task` may panic - `threadpool` does not catch it, it just tears down the worker
            // thread and replaces it. Guard the matching `end()` so a panicking task still counts
            // as finished instead of wedging every future `await_all`/`quiesce` forever.
            let _guard = scopeguard::guard(outstanding, |outstanding| outstanding.end());
            task();
        });
    }

    fn try_enqueue_blocking(&self, task: Task, allow_queuing: bool) -> std::result::Result<(), Task> {
        self.outstanding.begin();

        let result = if allow_queuing {
            self.blocking_tx.send_blocking(task).map_err(|err| err.0)
        } else {
            self.blocking_tx.try_send(task).map_err(|err| match err {
                async_channel::TrySendError::Full(task) | async_channel::TrySendError::Closed(task) => task,
            })
        };

        if let Err(task) = result {
            self.outstanding.end();
            return Err(task);
        }

        Ok(())
    }

    fn await_all(&self) {
        crate::non_blocking_thread::assert_not_flagged();
        self.outstanding.wait_until_drained();
    }

    fn quiesce(&self) {
        // Recursive enqueues keep `outstanding.count` above zero for as long as there is any
        // transitive descendant still running, so the same wait serves both `await_all` and
        // `quiesce` - the difference is purely one of caller intent.
        crate::non_blocking_thread::assert_not_flagged();
        self.outstanding.wait_until_drained();
    }

    fn parallelism_level(&self) -> usize {
        self.parallelism_level
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;

    use super::*;

    #[test]
    fn enqueue_runs_the_task() {
        let queue = ThreadPoolWorkQueue::new(2, 8);
        let ran = Arc::new(StdAtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        queue.enqueue(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        queue.await_all();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn quiesce_waits_out_recursively_enqueued_tasks() {
        let queue = Arc::new(ThreadPoolWorkQueue::new(4, 64));
        let completed = Arc::new(StdAtomicUsize::new(0));

        fn spawn_chain(queue: Arc<ThreadPoolWorkQueue>, completed: Arc<StdAtomicUsize>, depth: u32) {
            queue.enqueue(Box::new(move || {
                completed.fetch_add(1, Ordering::SeqCst);
                if depth > 0 {
                    spawn_chain(Arc::clone(&queue), Arc::clone(&completed), depth - 1);
                }
            }));
        }

        spawn_chain(Arc::clone(&queue), Arc::clone(&completed), 5);
        queue.quiesce();
        assert_eq!(completed.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn blocking_queue_rejects_when_full_and_queuing_disallowed() {
        let queue = ThreadPoolWorkQueue::new(1, 1);
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        assert!(
            queue
                .try_enqueue_blocking(
                    Box::new(move || {
                        let _ = release_rx.recv();
                    }),
                    false,
                )
                .is_ok()
        );

        // The single blocking worker thread is now stuck on `recv`, so the channel capacity of 1
        // is immediately filled by this next task...
        assert!(queue.try_enqueue_blocking(Box::new(|| {}), false).is_ok());

        // ...and this one must be rejected instead of queuing, and handed back unrun.
        let result = queue.try_enqueue_blocking(Box::new(|| {}), false);
        assert!(result.is_err());

        release_tx.send(()).unwrap();
    }

    #[test]
    fn parallelism_level_matches_configured_worker_count() {
        let queue = ThreadPoolWorkQueue::new(3, 8);
        assert_eq!(queue.parallelism_level(), 3);
    }
}
