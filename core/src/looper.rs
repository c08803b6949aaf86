//! Main-thread task queue.
//!
//! The thread that creates a `MainLooper` becomes the main thread. Other
//! threads reach it through a `MainHandle`, posting closures that run in post
//! order whenever the main thread drains the queue.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::trace;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// The receiving end of the main-thread queue. Not `Send`: it stays on the
/// thread that created it.
pub struct MainLooper {
    rx: Receiver<Task>,
    handle: MainHandle,
    _not_send: std::marker::PhantomData<*const ()>,
}

/// Cloneable handle for posting work onto the main thread.
#[derive(Clone)]
pub struct MainHandle {
    tx: Sender<Task>,
    thread: ThreadId,
}

impl MainLooper {
    /// Create a looper bound to the current thread.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            rx,
            handle: MainHandle {
                tx,
                thread: thread::current().id(),
            },
            _not_send: std::marker::PhantomData,
        }
    }

    pub fn handle(&self) -> MainHandle {
        self.handle.clone()
    }

    /// Run every task queued so far. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Block for at most `timeout` waiting for a task, then run it along with
    /// anything queued behind it.
    pub fn run_for(&self, timeout: Duration) -> usize {
        match self.rx.recv_timeout(timeout) {
            Ok(task) => {
                task();
                1 + self.run_pending()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Run tasks until `done` returns true or `timeout` elapses. Returns
    /// whether `done` was satisfied.
    pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.run_for((deadline - now).min(Duration::from_millis(20)));
        }
    }
}

impl Default for MainLooper {
    fn default() -> Self {
        Self::new()
    }
}

impl MainHandle {
    /// Queue `task` for the main thread.
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The looper holds a sender clone through its handle, so the channel
        // never disconnects while the looper is alive.
        if self.tx.send(Box::new(task)).is_err() {
            trace!("main looper gone, dropping posted task");
        }
    }

    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    pub fn main_thread_id(&self) -> ThreadId {
        self.thread
    }
}

impl std::fmt::Debug for MainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainHandle")
            .field("thread", &self.thread)
            .field("queued", &self.tx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn tasks_run_in_post_order() {
        let looper = MainLooper::new();
        let handle = looper.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            handle.post(move || seen.lock().unwrap().push(i));
        }
        assert_eq!(looper.run_pending(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn tasks_posted_from_workers_run_on_main() {
        let looper = MainLooper::new();
        let handle = looper.handle();
        let main = thread::current().id();
        let ran_on = Arc::new(Mutex::new(None));

        let worker_handle = handle.clone();
        let ran_on_worker = Arc::clone(&ran_on);
        thread::spawn(move || {
            assert!(!worker_handle.is_main_thread());
            worker_handle.post(move || {
                *ran_on_worker.lock().unwrap() = Some(thread::current().id());
            });
        })
        .join()
        .unwrap();

        assert!(looper.run_until(Duration::from_secs(1), || ran_on.lock().unwrap().is_some()));
        assert_eq!(*ran_on.lock().unwrap(), Some(main));
        assert!(handle.is_main_thread());
    }

    #[test]
    fn run_until_times_out() {
        let looper = MainLooper::new();
        assert!(!looper.run_until(Duration::from_millis(30), || false));
    }
}
