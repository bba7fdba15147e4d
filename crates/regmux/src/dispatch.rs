// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Listener dispatch policy.
//!
//! The multiplexer invokes listener operations through the owning
//! registration, and the registration decides *where* the operation runs:
//!
//! - Consumers that merely forward the call elsewhere (and perform at most
//!   trivial bookkeeping) can run inline, while the registry lock is held.
//!   That is [`InlineExecutor`].
//! - Consumers that do real work in the same process must not run under the
//!   lock. [`WorkerExecutor`] hands operations to a dedicated thread through
//!   an unbounded channel and returns immediately.
//!
//! The split is a caller-supplied policy; the multiplexer itself never
//! blocks on listener work either way.
//!
//! # Thread Safety
//!
//! Executors are `Send + Sync` and may be shared across registrations via
//! `Arc`. Operations must not block or panic; a panicking operation kills a
//! [`WorkerExecutor`]'s thread, after which further dispatches fail with
//! [`Error::DispatchQueueClosed`].

use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::thread::JoinHandle;

/// A unit of listener work handed to an executor.
pub type DispatchTask = Box<dyn FnOnce() + Send>;

/// Execution policy for listener operations.
pub trait ListenerExecutor: Send + Sync {
    /// Runs or enqueues the given task.
    fn execute(&self, task: DispatchTask) -> Result<()>;
}

/// Runs tasks synchronously on the calling thread.
///
/// Appropriate for listeners that are thin forwarding shims: the task runs
/// while the multiplexer's lock is held, so it must not block or call back
/// into mutating multiplexer operations other than identity-checked removal.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl ListenerExecutor for InlineExecutor {
    fn execute(&self, task: DispatchTask) -> Result<()> {
        task();
        Ok(())
    }
}

/// Runs tasks on a dedicated background thread.
///
/// Tasks are executed in submission order. Dropping the executor (or calling
/// [`WorkerExecutor::shutdown`]) drains the queue, then joins the thread.
///
/// # Example
///
/// ```ignore
/// let executor = Arc::new(WorkerExecutor::new("telemetry")?);
/// let registration = SimpleRegistration::with_executor(Some(request), listener, executor);
/// ```
pub struct WorkerExecutor {
    sender: Mutex<Option<Sender<DispatchTask>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerExecutor {
    /// Spawns the dispatch thread. `name` tags the thread for diagnostics.
    pub fn new(name: &str) -> Result<Self> {
        let (sender, receiver) = unbounded::<DispatchTask>();
        let worker = std::thread::Builder::new()
            .name(format!("regmux-dispatch-{}", name))
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .map_err(Error::ThreadSpawn)?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stops accepting tasks, drains the queue and joins the thread.
    ///
    /// Safe to call more than once; later calls are no-ops.
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());

        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("[WorkerExecutor] dispatch thread panicked");
            }
        }
    }
}

impl ListenerExecutor for WorkerExecutor {
    fn execute(&self, task: DispatchTask) -> Result<()> {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(task).map_err(|_| Error::DispatchQueueClosed),
            None => Err(Error::DispatchQueueClosed),
        }
    }
}

impl Drop for WorkerExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerExecutor")
            .field("running", &self.sender.lock().is_some())
            .finish()
    }
}
