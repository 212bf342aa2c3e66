//! The pool's single background worker thread.
//!
//! Tasks run strictly in submission order, one at a time. Every stream fill
//! and provider rewind goes through here, which is what serializes provider
//! access across streams. Shutdown rejects new tasks but lets the queued
//! ones finish, so a stream never waits on a fill that will not run.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::PlaybackError;

/// A unit of work for the worker.
pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

struct TaskQueue {
    tasks: VecDeque<Task>,
    stopping: bool,
}

struct Shared {
    queue: Mutex<TaskQueue>,
    ready: Condvar,
}

/// Handle to the worker thread. Shuts the thread down when dropped.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl Worker {
    pub(crate) fn spawn(name: &str) -> Result<Self, PlaybackError> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(TaskQueue {
                tasks: VecDeque::new(),
                stopping: false,
            }),
            ready: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&thread_shared))
            .map_err(PlaybackError::WorkerSpawn)?;
        let thread_id = handle.thread().id();

        tracing::info!(thread = name, "playback worker started");
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
            thread_id,
        })
    }

    /// Appends a task. Fails once shutdown has begun.
    pub(crate) fn enqueue(&self, task: Task) -> Result<(), PlaybackError> {
        let mut queue = self.shared.queue.lock();
        if queue.stopping {
            tracing::warn!("task rejected, playback worker is shutting down");
            return Err(PlaybackError::PoolShutDown);
        }
        queue.tasks.push_back(task);
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Tasks queued and not yet started.
    pub(crate) fn pending(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// True when called from the worker thread itself.
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Rejects further tasks and stops the worker once the queue drains.
    ///
    /// Joins the thread unless called from it.
    pub(crate) fn shutdown(&self) {
        let pending = {
            let mut queue = self.shared.queue.lock();
            queue.stopping = true;
            queue.tasks.len()
        };
        self.shared.ready.notify_all();
        if pending > 0 {
            tracing::debug!(pending, "draining queued tasks before shutdown");
        }

        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if self.is_current() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("playback worker panicked");
        } else {
            tracing::info!("playback worker stopped");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            while queue.tasks.is_empty() && !queue.stopping {
                shared.ready.wait(&mut queue);
            }
            match queue.tasks.pop_front() {
                Some(task) => task,
                None => break,
            }
        };

        task();
    }
}
