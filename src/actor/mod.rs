//! Serial task executors.
//!
//! An [`Actor`] owns a worker thread and a state value. Tasks submitted from any thread run one
//! at a time on the worker, in deadline order with submission order breaking ties, and receive
//! the state as `&mut S`. Nothing else ever touches the state.

mod latch;

pub use latch::Latch;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::foundation::error::{VidmarkError, VidmarkResult};

/// Work item executed on an actor thread.
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// Actor without state of its own: a plain serial dispatch queue.
pub type SerialActor = Actor<()>;

/// Handle returned by `submit*`, used to cancel a task that has not started yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

struct Queue<S> {
    tasks: BTreeMap<(Instant, u64), Task<S>>,
    next_seq: u64,
    running: bool,
    shutdown: bool,
}

struct Shared<S> {
    name: String,
    queue: Mutex<Queue<S>>,
    work: Condvar,
    idle: Condvar,
    thread_id: Mutex<Option<ThreadId>>,
    join: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl<S> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Queue<S>> {
        self.queue.lock()
    }
}

/// Single-threaded task executor owning a state value `S`.
///
/// Cloning the handle is cheap; every clone addresses the same worker.
pub struct Actor<S: Send + 'static> {
    shared: Arc<Shared<S>>,
}

impl<S: Send + 'static> Clone for Actor<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: Send + 'static> std::fmt::Debug for Actor<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actor")
            .field("name", &self.shared.name)
            .field("stopped", &self.shared.stopped.load(Ordering::Acquire))
            .finish()
    }
}

impl Actor<()> {
    /// Spawn a stateless serial actor.
    pub fn serial(name: impl Into<String>) -> VidmarkResult<Self> {
        Self::spawn(name, ())
    }
}

impl<S: Send + 'static> Actor<S> {
    /// Spawn the worker thread and hand it `state`.
    pub fn spawn(name: impl Into<String>, state: S) -> VidmarkResult<Self> {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            queue: Mutex::new(Queue {
                tasks: BTreeMap::new(),
                next_seq: 0,
                running: false,
                shutdown: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
            thread_id: Mutex::new(None),
            join: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(worker, state))
            .map_err(|e| VidmarkError::io(format!("failed to spawn actor thread '{name}': {e}")))?;

        *shared.thread_id.lock() = Some(handle.thread().id());
        *shared.join.lock() = Some(handle);
        Ok(Self { shared })
    }

    /// Actor name (also the worker thread name).
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue `task` to run as soon as every earlier-due task has run.
    pub fn submit(&self, task: impl FnOnce(&mut S) + Send + 'static) -> TaskId {
        self.enqueue(Instant::now(), Box::new(task))
    }

    /// Queue `task` to run no earlier than `delay` from now.
    pub fn submit_delayed(
        &self,
        task: impl FnOnce(&mut S) + Send + 'static,
        delay: Duration,
    ) -> TaskId {
        self.enqueue(Instant::now() + delay, Box::new(task))
    }

    fn enqueue(&self, deadline: Instant, task: Task<S>) -> TaskId {
        let mut q = self.shared.lock();
        let seq = q.next_seq;
        q.next_seq += 1;
        if q.shutdown {
            tracing::debug!(actor = %self.shared.name, "task submitted after shutdown, dropped");
            return TaskId(seq);
        }
        q.tasks.insert((deadline, seq), task);
        drop(q);
        self.shared.work.notify_one();
        TaskId(seq)
    }

    /// Remove a task that has not started. Returns `true` when it was still pending.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = {
            let mut q = self.shared.lock();
            let key = q.tasks.keys().find(|(_, seq)| *seq == id.0).copied();
            key.and_then(|k| q.tasks.remove(&k))
        };
        let removed = removed.is_some();
        if removed {
            self.shared.idle.notify_all();
        }
        removed
    }

    /// Discard every pending task without running it. A running task finishes.
    ///
    /// Returns the number of tasks discarded.
    pub fn drain(&self) -> usize {
        let pending = std::mem::take(&mut self.shared.lock().tasks);
        let discarded = pending.len();
        drop(pending);
        self.shared.idle.notify_all();
        if discarded > 0 {
            tracing::debug!(actor = %self.shared.name, discarded, "pending tasks discarded");
        }
        discarded
    }

    /// Block until the queue is empty and no task is running.
    ///
    /// Delayed tasks are waited for. Returns immediately on the actor's own thread or after
    /// shutdown.
    pub fn wait_idle(&self) {
        if self.is_current() {
            return;
        }
        let mut q = self.shared.lock();
        while !q.shutdown && (q.running || !q.tasks.is_empty()) {
            self.shared.idle.wait(&mut q);
        }
    }

    /// Run `task` on the actor and block for its result.
    ///
    /// Returns `None` when the actor is shut down, when the task panicked, or when called from
    /// the actor's own thread (where waiting would deadlock).
    pub fn call<R: Send + 'static>(
        &self,
        task: impl FnOnce(&mut S) -> R + Send + 'static,
    ) -> Option<R> {
        if self.is_current() {
            tracing::error!(actor = %self.shared.name, "blocking call issued from the actor thread");
            return None;
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(move |state| {
            let _ = tx.send(task(state));
        });
        rx.recv().ok()
    }

    /// `true` when called from this actor's worker thread.
    pub fn is_current(&self) -> bool {
        self.shared
            .thread_id
            .lock()
            .is_some_and(|id| id == std::thread::current().id())
    }

    /// `true` once [`Actor::shutdown`] has been requested.
    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Stop the worker: pending tasks are dropped, a running task finishes.
    ///
    /// Joins the worker unless called from it. Idempotent.
    pub fn shutdown(&self) {
        let pending = {
            let mut q = self.shared.lock();
            q.shutdown = true;
            std::mem::take(&mut q.tasks)
        };
        let dropped = pending.len();
        drop(pending);
        self.shared.work.notify_all();
        self.shared.idle.notify_all();
        if dropped > 0 {
            tracing::debug!(actor = %self.shared.name, dropped, "actor shut down with pending tasks");
        }

        if self.is_current() {
            return;
        }
        let handle = self.shared.join.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::warn!(actor = %self.shared.name, "actor thread panicked");
        }
    }
}

impl<S: Send + 'static> Drop for Actor<S> {
    /// The last handle stops the worker; the worker thread holds the only other reference.
    fn drop(&mut self) {
        if Arc::strong_count(&self.shared) == 2 && !self.shared.stopped.load(Ordering::Acquire) {
            self.shutdown();
        }
    }
}

fn run_worker<S>(shared: Arc<Shared<S>>, mut state: S) {
    loop {
        let task = {
            let mut q = shared.lock();
            loop {
                if q.shutdown {
                    q.running = false;
                    drop(q);
                    shared.stopped.store(true, Ordering::Release);
                    shared.idle.notify_all();
                    return;
                }
                let next_deadline = q.tasks.keys().next().map(|(deadline, _)| *deadline);
                match next_deadline {
                    None => {
                        q.running = false;
                        shared.idle.notify_all();
                        shared.work.wait(&mut q);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if deadline <= now {
                            if let Some((_, task)) = q.tasks.pop_first() {
                                q.running = true;
                                break task;
                            }
                        } else {
                            shared.work.wait_until(&mut q, deadline);
                        }
                    }
                }
            }
        };

        if std::panic::catch_unwind(AssertUnwindSafe(|| task(&mut state))).is_err() {
            tracing::error!(actor = %shared.name, "actor task panicked");
        }

        let mut q = shared.lock();
        q.running = false;
        let now_idle = q.tasks.is_empty();
        drop(q);
        if now_idle {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/actor/actor.rs"]
mod tests;
