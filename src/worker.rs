//! FIFO task queue drained by the reactor thread (spec §4.B).
//!
//! Grounded on `calf::worker_service` in the original source: a
//! `std::deque` of tasks guarded by a mutex, a condition variable, and an
//! atomic quit flag, with `dispatch`/`packaged_dispatch`/`run_one`/`run_loop`/
//! `quit`. Translated verbatim in shape; the original's lock-free queue
//! (`calf::platform::windows::Queue`, see `non_blocking_queue.hpp`) is
//! explicitly not ported — spec §9 flags it as buggy (`current_next` reads
//! from a dangling local, the head is never advanced past the first push)
//! and directs implementers to a mutex-protected FIFO instead, which matches
//! the one-producer-per-direction contention profile here anyway.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Condvar, Mutex};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A one-shot result handle returned by [`WorkerService::packaged_dispatch`].
///
/// Blocking on [`TaskHandle::wait`] mirrors `std::future::get()` on the
/// `std::future<Ret>` the original's `packaged_dispatch` returns.
pub struct TaskHandle<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Blocks the calling thread until the dispatched task completes and
    /// returns its result. Returns `Err` if the task panicked instead of
    /// returning.
    pub fn wait(self) -> Result<T, mpsc::RecvError> {
        self.rx.recv()
    }
}

/// A FIFO queue of zero-argument callables, drained strictly in dispatch
/// order by whichever thread calls [`WorkerService::run_one`] or
/// [`WorkerService::run_loop`].
pub struct WorkerService {
    queue: Mutex<VecDeque<Task>>,
    cv: Condvar,
    quit: AtomicBool,
}

impl WorkerService {
    pub fn new() -> WorkerService {
        WorkerService {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
            quit: AtomicBool::new(false),
        }
    }

    /// Appends `task` to the tail of the queue and wakes one waiter.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.queue.lock().unwrap();
        queue.push_back(Box::new(task));
        self.cv.notify_one();
    }

    /// Dispatches `f` and returns a handle that yields its result once the
    /// task has run on whichever thread calls `run_one`/`run_loop`.
    pub fn packaged_dispatch<F, T>(&self, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.dispatch(move || {
            // A panic inside `f` drops `tx` without sending, which turns
            // into a `RecvError` for the waiter rather than poisoning
            // the queue (see `run_one`'s panic containment below).
            let _ = tx.send(f());
        });
        TaskHandle { rx }
    }

    /// Drains the queue until empty or `quit` is set, running each task on
    /// the calling thread. A task that panics is caught and dropped; the
    /// queue remains usable afterward.
    pub fn run_one(&self) {
        loop {
            let task = {
                let mut queue = self.queue.lock().unwrap();
                if self.quit.load(Ordering::Relaxed) {
                    return;
                }
                match queue.pop_front() {
                    Some(task) => task,
                    None => return,
                }
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                drop(payload);
            }
        }
    }

    /// Blocks on the condition variable, draining the queue each time it is
    /// woken, until [`WorkerService::quit`] is called.
    pub fn run_loop(&self) {
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                while queue.is_empty() && !self.quit.load(Ordering::Relaxed) {
                    queue = self.cv.wait(queue).unwrap();
                }
                if self.quit.load(Ordering::Relaxed) {
                    return;
                }
            }
            self.run_one();
        }
    }

    /// Sets the quit flag and wakes every waiter. After this, `run_loop`
    /// returns promptly and `run_one` stops draining even if tasks remain
    /// queued.
    pub fn quit(&self) {
        self.quit.store(true, Ordering::Relaxed);
        self.cv.notify_all();
    }

    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }
}

impl Default for WorkerService {
    fn default() -> Self {
        WorkerService::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn fifo_order_single_thread() {
        let worker = WorkerService::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..50 {
            let seen = seen.clone();
            worker.dispatch(move || seen.lock().unwrap().push(i));
        }
        worker.run_one();
        let seen = seen.lock().unwrap();
        let expected: Vec<i32> = (0..50).collect();
        assert_eq!(*seen, expected);
    }

    #[test]
    fn packaged_dispatch_returns_value() {
        let worker = WorkerService::new();
        let handle = worker.packaged_dispatch(|| 6 * 7);
        worker.run_one();
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn panic_does_not_poison_queue() {
        let worker = WorkerService::new();
        worker.dispatch(|| panic!("boom"));
        let seen = Arc::new(Mutex::new(false));
        let seen2 = seen.clone();
        worker.dispatch(move || *seen2.lock().unwrap() = true);
        worker.run_one();
        assert!(*seen.lock().unwrap());
    }

    #[test]
    fn quit_stops_run_loop() {
        let worker = Arc::new(WorkerService::new());
        let w2 = worker.clone();
        let handle = std::thread::spawn(move || w2.run_loop());
        worker.quit();
        handle.join().unwrap();
        assert!(worker.is_quit());
    }
}
