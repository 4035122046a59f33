//! Interpreter instances: one thread, one queue and one interpreter each.

use crate::config::EngineConfig;
use crate::invocation::{Interpreter, Invocation, Outcome};
use crate::source::ScriptLibrary;
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use sf_error::ScriptError;
use sf_traits::HostEnvironment;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

enum Reply {
    Done(Result<Outcome, ScriptError>),
    /// The instance was abandoned before the job ran.
    Recycled,
}

const PENDING: u8 = 0;
const STARTED: u8 = 1;
const CANCELLED: u8 = 2;

/// Progress of one queued job, shared by the caller and the instance thread.
///
/// A job leaves `PENDING` exactly once: the thread claims it (`STARTED`) or
/// the caller withdraws it (`CANCELLED`). Cancelled jobs are skipped.
#[derive(Clone, Default)]
struct JobState(Arc<AtomicU8>);

impl JobState {
    fn start(&self) -> bool {
        self.transition(STARTED)
    }

    fn cancel(&self) -> bool {
        self.transition(CANCELLED)
    }

    fn started(&self) -> bool {
        self.0.load(Ordering::Acquire) == STARTED
    }

    fn transition(&self, to: u8) -> bool {
        self.0
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Job {
    invocation: Invocation,
    state: JobState,
    reply: Sender<Reply>,
}

/// Result of handing a call to an instance.
pub(crate) enum Submission {
    Done(Result<Outcome, ScriptError>),
    /// The deadline passed. `started` tells whether the call was running,
    /// otherwise it was withdrawn from the queue and never runs.
    TimedOut { started: bool },
    /// The instance is gone; the call never ran and may be retried.
    Recycled,
    /// The instance thread died while running the call.
    Died,
}

/// A thread owning one interpreter and serving its call queue in order.
///
/// Only the owning thread touches the interpreter, so calls on one instance
/// never overlap.
pub(crate) struct Instance {
    id: usize,
    generation: u64,
    sender: Mutex<Option<Sender<Job>>>,
    abort: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Instance {
    /// Starts a thread, loads the library into it and waits until it is ready.
    pub(crate) fn spawn(
        id: usize,
        library: Arc<ScriptLibrary>,
        config: &EngineConfig,
        host: Arc<dyn HostEnvironment>,
    ) -> Result<Self, ScriptError> {
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(config.queue_capacity);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), ScriptError>>(1);
        let abort = Arc::new(AtomicBool::new(false));
        let generation = library.generation();
        let limits = config.limits.clone();

        let thread_abort = Arc::clone(&abort);
        let thread = std::thread::Builder::new()
            .name(format!("sf-script-{id}"))
            .spawn(move || {
                let interpreter =
                    Interpreter::new(library, &limits, host, Arc::clone(&thread_abort));
                match interpreter {
                    Ok(mut interpreter) => {
                        let _ = ready_tx.send(Ok(()));
                        serve(id, &mut interpreter, &receiver, &thread_abort);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| ScriptError::Load {
                document: format!("instance-{id}"),
                message: format!("Failed to start interpreter thread: {e}"),
                line: None,
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(ScriptError::Load {
                document: format!("instance-{id}"),
                message: "Interpreter thread exited during startup".to_string(),
                line: None,
            })
        });
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        debug!(instance = id, generation, "Provisioned interpreter instance");

        Ok(Self {
            id,
            generation,
            sender: Mutex::new(Some(sender)),
            abort,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Queues a call and waits for its reply.
    ///
    /// The deadline covers time spent waiting for queue space as well as
    /// execution.
    pub(crate) fn submit(&self, invocation: Invocation, timeout: Option<Duration>) -> Submission {
        let Some(sender) = self.sender.lock().clone() else {
            return Submission::Recycled;
        };

        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let state = JobState::default();
        let job = Job {
            invocation,
            state: state.clone(),
            reply: reply_tx,
        };

        // Deadlines too far out to represent are treated as none
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        let reply = match deadline {
            None => {
                if sender.send(job).is_err() {
                    return Submission::Recycled;
                }
                drop(sender);
                reply_rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
            }
            Some(deadline) => {
                match sender.send_deadline(job, deadline) {
                    Ok(()) => {}
                    Err(SendTimeoutError::Timeout(_)) => {
                        return Submission::TimedOut { started: false }
                    }
                    Err(SendTimeoutError::Disconnected(_)) => return Submission::Recycled,
                }
                drop(sender);
                reply_rx.recv_deadline(deadline)
            }
        };

        settle(reply, &state, &reply_rx)
    }

    /// Stops accepting calls; queued calls still run, then the thread exits.
    pub(crate) fn retire(&self) {
        self.sender.lock().take();
        self.thread.lock().take();
        trace!(instance = self.id, generation = self.generation, "Retired instance");
    }

    /// Terminates the running call and rejects everything still queued.
    ///
    /// The thread is left to wind down on its own.
    pub(crate) fn abandon(&self) {
        self.abort.store(true, Ordering::Relaxed);
        self.sender.lock().take();
        self.thread.lock().take();
    }

    /// Like [`abandon`](Self::abandon) but waits for the thread to exit.
    pub(crate) fn shutdown(&self) {
        self.abort.store(true, Ordering::Relaxed);
        self.sender.lock().take();
        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!(instance = self.id, "Interpreter thread panicked");
            }
        }
    }
}

/// Turns what came back on the reply channel into a submission outcome.
fn settle(
    reply: Result<Reply, RecvTimeoutError>,
    state: &JobState,
    reply_rx: &Receiver<Reply>,
) -> Submission {
    match reply {
        Ok(Reply::Done(result)) => Submission::Done(result),
        Ok(Reply::Recycled) => Submission::Recycled,
        Err(RecvTimeoutError::Timeout) => {
            if state.cancel() {
                return Submission::TimedOut { started: false };
            }
            // Finished right at the deadline
            match reply_rx.try_recv() {
                Ok(Reply::Done(result)) => Submission::Done(result),
                _ => Submission::TimedOut { started: true },
            }
        }
        Err(RecvTimeoutError::Disconnected) => {
            if state.started() {
                Submission::Died
            } else {
                // Dropped from the queue of an exiting thread
                Submission::Recycled
            }
        }
    }
}

fn serve(id: usize, interpreter: &mut Interpreter, receiver: &Receiver<Job>, abort: &AtomicBool) {
    for job in receiver.iter() {
        if abort.load(Ordering::Relaxed) {
            let _ = job.reply.send(Reply::Recycled);
            continue;
        }
        if !job.state.start() {
            trace!(instance = id, "Skipping withdrawn call");
            continue;
        }

        let result = interpreter.execute(&job.invocation);
        // The caller may have given up already
        let _ = job.reply.send(Reply::Done(result));
    }

    trace!(instance = id, "Interpreter thread exiting");
}
