//! Single-flight background execution.
//!
//! A [`TaskRunner`] owns one dedicated worker thread and the state that lives
//! on it (for the orchestrator: the engine and the output sink). Jobs are
//! submitted from the foreground and run on the worker one at a time; while a
//! job is pending or running, further submissions fail with
//! [`Error::TaskInProgress`] instead of queueing.
//!
//! Completion is delivered through the returned [`TaskHandle`], which is a
//! [`Future`] for async and UI consumers and offers a blocking
//! [`TaskHandle::wait`] for command-line use. A UI consumer must move the
//! notification onto its own event thread before touching UI state.
//!
//! # Cancellation
//!
//! [`TaskHandle::cancel`] only stops a task that has not started yet. Once the
//! worker has picked the task up, inference runs to completion: the runtimes
//! expose no interrupt hook. There is no built-in timeout either; a caller that
//! needs a deadline has to cancel before the task starts running.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use crate::error::{EngineError, Error, ResourceError, Result};

/// Where a submitted task is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug)]
struct TaskStatus {
    state: TaskState,
    cancel_requested: bool,
}

#[derive(Debug)]
struct TaskShared {
    status: Mutex<TaskStatus>,
}

impl TaskShared {
    fn lock(&self) -> MutexGuard<'_, TaskStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: TaskState) {
        self.lock().state = state;
    }
}

/// Handle to a submitted task.
///
/// Await it, or call [`wait`](TaskHandle::wait) from synchronous code. Dropping
/// the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: u64,
    shared: Arc<TaskShared>,
    reply: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current state. `Succeeded`/`Failed` are set before the result is delivered.
    pub fn state(&self) -> TaskState {
        self.shared.lock().state
    }

    /// Ask the worker to skip this task. Returns `true` if the task had not
    /// started yet and will now finish as [`Error::Cancelled`]; `false` if it
    /// is already running or done.
    pub fn cancel(&self) -> bool {
        let mut status = self.shared.lock();
        if status.state == TaskState::Pending {
            status.cancel_requested = true;
            log::debug!("Task {} cancellation requested", self.id);
            true
        } else {
            false
        }
    }

    /// Block the current thread until the task completes.
    ///
    /// Must not be called from within an async runtime; await the handle there.
    pub fn wait(self) -> Result<T> {
        self.reply
            .blocking_recv()
            .unwrap_or_else(|_| Err(EngineError::WorkerGone.into()))
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().reply)
            .poll(cx)
            .map(|reply| reply.unwrap_or_else(|_| Err(EngineError::WorkerGone.into())))
    }
}

type Job<S, T> = Box<dyn FnOnce(&mut S, u64) -> Result<T> + Send>;

struct Envelope<S, T> {
    id: u64,
    shared: Arc<TaskShared>,
    job: Job<S, T>,
    reply: oneshot::Sender<Result<T>>,
}

/// Runs jobs against worker-owned state `S` on one dedicated thread.
pub struct TaskRunner<S, T> {
    name: String,
    sender: Option<mpsc::UnboundedSender<Envelope<S, T>>>,
    busy: Arc<AtomicBool>,
    next_id: AtomicU64,
    worker: Option<JoinHandle<()>>,
}

impl<S, T> TaskRunner<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    /// Start the worker thread, moving `state` onto it.
    pub fn new(name: impl Into<String>, state: S) -> Result<Self> {
        Self::spawn(name.into(), state, None)
    }

    /// Like [`new`](Self::new), but the worker waits for a message on the
    /// returned channel before starting each task.
    #[cfg(test)]
    fn gated(name: &str, state: S) -> Result<(Self, std::sync::mpsc::Sender<()>)> {
        let (open, gate) = std::sync::mpsc::channel();
        Ok((Self::spawn(name.to_string(), state, Some(gate))?, open))
    }

    fn spawn(name: String, state: S, gate: Option<std::sync::mpsc::Receiver<()>>) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(false));

        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn({
                let busy = Arc::clone(&busy);
                move || run_worker(state, receiver, busy, gate)
            })
            .map_err(ResourceError::WorkerSpawn)?;

        log::debug!("Started worker thread '{name}'");
        Ok(Self {
            name,
            sender: Some(sender),
            busy,
            next_id: AtomicU64::new(1),
            worker: Some(worker),
        })
    }

    /// `true` while a task is pending or running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Schedule `job` on the worker and return immediately.
    ///
    /// Fails with [`Error::TaskInProgress`] if a task is still pending or running.
    pub fn submit<F>(&self, job: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce(&mut S, u64) -> Result<T> + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::TaskInProgress);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(TaskShared {
            status: Mutex::new(TaskStatus {
                state: TaskState::Pending,
                cancel_requested: false,
            }),
        });
        let (reply, receiver) = oneshot::channel();

        let envelope = Envelope {
            id,
            shared: Arc::clone(&shared),
            job: Box::new(job),
            reply,
        };
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(envelope).is_ok())
            .unwrap_or(false);
        if !sent {
            self.busy.store(false, Ordering::Release);
            return Err(EngineError::WorkerGone.into());
        }

        log::debug!("Task {id} submitted to '{}'", self.name);
        Ok(TaskHandle {
            id,
            shared,
            reply: receiver,
        })
    }
}

impl<S, T> Drop for TaskRunner<S, T> {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the current task is done.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Worker thread '{}' panicked", self.name);
            }
        }
    }
}

fn run_worker<S, T>(
    mut state: S,
    mut receiver: mpsc::UnboundedReceiver<Envelope<S, T>>,
    busy: Arc<AtomicBool>,
    gate: Option<std::sync::mpsc::Receiver<()>>,
) {
    while let Some(envelope) = receiver.blocking_recv() {
        let Envelope {
            id,
            shared,
            job,
            reply,
        } = envelope;

        if let Some(gate) = &gate {
            let _ = gate.recv();
        }

        let start = {
            let mut status = shared.lock();
            if status.cancel_requested {
                status.state = TaskState::Failed;
                false
            } else {
                status.state = TaskState::Running;
                true
            }
        };

        let result = if start {
            log::debug!("Task {id} started");
            match catch_unwind(AssertUnwindSafe(|| job(&mut state, id))) {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    log::error!("Task {id} panicked: {message}");
                    Err(EngineError::Panicked(message).into())
                }
            }
        } else {
            log::info!("Task {id} cancelled before it started");
            Err(Error::Cancelled { task: id })
        };

        match &result {
            Ok(_) => {
                log::debug!("Task {id} succeeded");
                shared.set(TaskState::Succeeded);
            }
            Err(e) => {
                log::debug!("Task {id} failed: {e}");
                shared.set(TaskState::Failed);
            }
        }

        // Free the slot first so a consumer reacting to completion can submit right away.
        busy.store(false, Ordering::Release);
        if reply.send(result).is_err() {
            log::debug!("Task {id} finished after its handle was dropped");
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    #[test]
    fn runs_jobs_against_worker_state() {
        let runner = TaskRunner::new("test-worker", 10u32).unwrap();
        let first = runner
            .submit(|count: &mut u32, _id| {
                *count += 1;
                Ok(*count)
            })
            .unwrap();
        assert_eq!(first.wait().unwrap(), 11);

        let second = runner.submit(|count: &mut u32, id| Ok(*count * 100 + id as u32)).unwrap();
        assert_eq!(second.id(), 2);
        assert_eq!(second.wait().unwrap(), 1102);
    }

    #[test]
    fn second_submit_while_running_is_rejected() {
        let runner: TaskRunner<(), ()> = TaskRunner::new("single-flight", ()).unwrap();
        let (release, hold) = std_mpsc::channel::<()>();
        let (started_tx, started) = std_mpsc::channel::<()>();

        let handle = runner
            .submit(move |_, _| {
                started_tx.send(()).unwrap();
                hold.recv().unwrap();
                Ok(())
            })
            .unwrap();
        started.recv().unwrap();
        assert_eq!(handle.state(), TaskState::Running);
        assert!(runner.is_busy());

        assert!(matches!(
            runner.submit(|_, _| Ok(())),
            Err(Error::TaskInProgress)
        ));

        release.send(()).unwrap();
        handle.wait().unwrap();
        assert!(!runner.is_busy());
        assert!(runner.submit(|_, _| Ok(())).unwrap().wait().is_ok());
    }

    #[test]
    fn failure_frees_the_slot() {
        let runner: TaskRunner<(), ()> = TaskRunner::new("failing", ()).unwrap();
        let handle = runner
            .submit(|_, _| Err(EngineError::GenerationFailed("boom".into()).into()))
            .unwrap();
        assert!(matches!(
            handle.wait(),
            Err(Error::Engine(EngineError::GenerationFailed(_)))
        ));
        assert!(runner.submit(|_, _| Ok(())).unwrap().wait().is_ok());
    }

    #[test]
    fn panic_is_delivered_as_engine_error() {
        let runner: TaskRunner<(), ()> = TaskRunner::new("panicking", ()).unwrap();
        let handle = runner.submit(|_, _| panic!("model exploded")).unwrap();
        match handle.wait() {
            Err(Error::Engine(EngineError::Panicked(message))) => assert_eq!(message, "model exploded"),
            other => panic!("unexpected result: {other:?}"),
        }

        // The worker survives and accepts new work.
        assert!(runner.submit(|_, _| Ok(())).unwrap().wait().is_ok());
    }

    #[test]
    fn pending_task_can_be_cancelled() {
        let (runner, open) = TaskRunner::<(), u8>::gated("gated", ()).unwrap();
        let handle = runner.submit(|_, _| Ok(7)).unwrap();
        assert_eq!(handle.state(), TaskState::Pending);
        assert!(handle.cancel());

        open.send(()).unwrap();
        let id = handle.id();
        let state = Arc::clone(&handle.shared);
        assert!(matches!(handle.wait(), Err(Error::Cancelled { task }) if task == id));
        assert_eq!(state.lock().state, TaskState::Failed);
        assert!(!runner.is_busy());
    }

    #[test]
    fn running_task_cannot_be_cancelled() {
        let runner: TaskRunner<(), ()> = TaskRunner::new("uncancellable", ()).unwrap();
        let (release, hold) = std_mpsc::channel::<()>();
        let (started_tx, started) = std_mpsc::channel::<()>();
        let handle = runner
            .submit(move |_, _| {
                started_tx.send(()).unwrap();
                hold.recv().unwrap();
                Ok(())
            })
            .unwrap();
        started.recv().unwrap();

        assert!(!handle.cancel());
        release.send(()).unwrap();
        assert!(handle.wait().is_ok());
    }

    #[tokio::test]
    async fn handle_is_a_future() {
        let runner = TaskRunner::new("async", String::from("voice")).unwrap();
        let handle = runner
            .submit(|name: &mut String, _| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(name.len())
            })
            .unwrap();
        assert_eq!(handle.await.unwrap(), 5);
    }
}
