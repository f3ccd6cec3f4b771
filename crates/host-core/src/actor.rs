//! The engine thread.
//!
//! A single dedicated thread owns the [`HostEngine`] and runs every native
//! call. The control path talks to it through an [`EngineHandle`]:
//!
//! - [`EngineHandle::invoke`] blocks until the call has run and returns its value
//! - [`EngineHandle::invoke_async`] returns a future for the same
//! - [`EngineHandle::post`] queues the call and returns immediately
//!
//! Calls run in submission order.

use std::future::Future;
use std::thread::{JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};

use mixcast_common::error::{MixcastError, MixcastResult};

use crate::host::HostEngine;

type Job = Box<dyn FnOnce(&mut dyn HostEngine) + Send>;

enum Command {
    Run(Job),
    Shutdown,
}

/// Cloneable sender side of the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
    thread: ThreadId,
}

impl EngineHandle {
    /// Run `f` on the engine thread and wait for its result.
    ///
    /// Fails instead of deadlocking when called from the engine thread
    /// itself, e.g. from a signal callback. Also fails inside a tokio
    /// runtime context, where waiting would block a worker thread; async
    /// callers use [`EngineHandle::invoke_async`].
    pub fn invoke<R, F>(&self, f: F) -> MixcastResult<R>
    where
        F: FnOnce(&mut dyn HostEngine) -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_engine_thread() {
            return Err(MixcastError::engine(
                "blocking engine call issued from the engine thread",
            ));
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(MixcastError::engine(
                "blocking engine call issued inside an async runtime, use invoke_async",
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.send(Box::new(move |host| {
            let _ = tx.send(f(host));
        }))?;
        rx.blocking_recv()
            .map_err(|_| MixcastError::engine("engine thread dropped the call"))
    }

    /// Queue `f` on the engine thread and return a future for its result.
    pub fn invoke_async<R, F>(&self, f: F) -> impl Future<Output = MixcastResult<R>>
    where
        F: FnOnce(&mut dyn HostEngine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let queued = self.send(Box::new(move |host| {
            let _ = tx.send(f(host));
        }));
        async move {
            queued?;
            rx.await
                .map_err(|_| MixcastError::engine("engine thread dropped the call"))
        }
    }

    /// Queue `f` on the engine thread without waiting.
    pub fn post<F>(&self, f: F) -> MixcastResult<()>
    where
        F: FnOnce(&mut dyn HostEngine) + Send + 'static,
    {
        self.send(Box::new(f))
    }

    /// Whether the caller is running on the engine thread.
    pub fn is_engine_thread(&self) -> bool {
        std::thread::current().id() == self.thread
    }

    /// Whether the engine thread still accepts calls.
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, job: Job) -> MixcastResult<()> {
        self.tx
            .send(Command::Run(job))
            .map_err(|_| MixcastError::engine("engine thread is not running"))
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("thread", &self.thread)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Owner of the engine thread. Dropping it shuts the thread down after the
/// already-queued calls have run.
pub struct EngineThread {
    handle: EngineHandle,
    join: Option<JoinHandle<Box<dyn HostEngine>>>,
}

impl EngineThread {
    /// Move `host` onto a new engine thread.
    pub fn spawn(host: Box<dyn HostEngine>) -> MixcastResult<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();

        let join = std::thread::Builder::new()
            .name("mixcast-engine".to_string())
            .spawn(move || {
                let mut host = host;
                tracing::debug!("Engine thread started");
                let mut calls: u64 = 0;
                while let Some(command) = rx.blocking_recv() {
                    match command {
                        Command::Run(job) => {
                            job(host.as_mut());
                            calls += 1;
                        }
                        Command::Shutdown => break,
                    }
                }
                tracing::debug!(calls, "Engine thread stopped");
                host
            })?;

        let thread = join.thread().id();
        Ok(Self {
            handle: EngineHandle { tx, thread },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the thread and hand the host back.
    pub fn shutdown(mut self) -> MixcastResult<Box<dyn HostEngine>> {
        self.stop()?
            .ok_or_else(|| MixcastError::engine("engine thread already joined"))
    }

    fn stop(&mut self) -> MixcastResult<Option<Box<dyn HostEngine>>> {
        let Some(join) = self.join.take() else {
            return Ok(None);
        };
        let _ = self.handle.tx.send(Command::Shutdown);
        join.join()
            .map(Some)
            .map_err(|_| MixcastError::engine("engine thread panicked"))
    }
}

impl Drop for EngineThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "Engine thread did not shut down cleanly");
        }
    }
}
