//! The run loop: a dedicated thread that exclusively owns the event store.
//!
//! Producers push [`Command`]s into one inbound queue; the loop processes them
//! one at a time, in queue order, and pushes [`Response`]s into one outbound
//! channel. No locks guard the store. The loop stops on [`Command::Shutdown`],
//! when every producer has gone away, or when processing a command panics; on
//! every one of those paths the outbound channel is closed.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutionError, TesError, TesResult};
use crate::protocol::{Command, Response, RESET_ACK};
use crate::storage::ActiveStore;

/// Run loop configuration.
#[derive(Debug, Clone)]
pub struct RunLoopConfig {
    /// Inbound queue bound. `None` is unbounded; `Some(n)` blocks producers
    /// once `n` commands are queued.
    pub queue_capacity: Option<usize>,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            queue_capacity: None,
            thread_name: "tes-run-loop".to_string(),
        }
    }
}

/// Lifecycle of a run loop. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Accepting commands.
    Running,
    /// Shut down; no further commands are processed.
    Stopped,
}

/// Why a run loop exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// A [`Command::Shutdown`] was processed.
    Shutdown,
    /// Every inbound sender was dropped.
    Disconnected,
    /// Processing a command panicked; carries the panic message.
    Failed(String),
}

/// The store plus the state machine driving it.
///
/// [`RunLoop::handle`] can be called directly for synchronous use; [`spawn`]
/// moves the loop onto its own thread.
#[derive(Debug)]
pub struct RunLoop {
    store: ActiveStore,
    state: LoopState,
    #[cfg(test)]
    panic_on: Option<&'static str>,
    #[cfg(test)]
    delay_on: Option<(&'static str, std::time::Duration)>,
}

impl Default for RunLoop {
    fn default() -> Self {
        Self::with_store(ActiveStore::new())
    }
}

impl RunLoop {
    /// Create a loop over an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a loop over an existing store.
    #[must_use]
    pub const fn with_store(store: ActiveStore) -> Self {
        Self {
            store,
            state: LoopState::Running,
            #[cfg(test)]
            panic_on: None,
            #[cfg(test)]
            delay_on: None,
        }
    }

    /// Stalls the first command with the given name, once.
    #[cfg(test)]
    pub(crate) fn with_delay(mut self, command: &'static str, delay: std::time::Duration) -> Self {
        self.delay_on = Some((command, delay));
        self
    }

    /// Whether the loop still accepts commands.
    #[must_use]
    pub const fn state(&self) -> LoopState {
        self.state
    }

    /// The owned store.
    #[must_use]
    pub const fn store(&self) -> &ActiveStore {
        &self.store
    }

    /// Applies one command to the store and returns the response, if the
    /// command has one.
    pub fn handle(&mut self, command: Command) -> Option<Response> {
        #[cfg(test)]
        if self.panic_on == Some(command.name()) {
            panic!("injected failure in {}", command.name());
        }
        #[cfg(test)]
        if let Some((name, delay)) = self.delay_on {
            if name == command.name() {
                self.delay_on = None;
                thread::sleep(delay);
            }
        }

        match command {
            Command::Shutdown => {
                self.state = LoopState::Stopped;
                None
            }
            Command::Reset => {
                self.store.reset();
                Some(Response::Ack {
                    message: RESET_ACK.to_string(),
                })
            }
            Command::AddEvent { event } => {
                let id = self.store.add(event);
                debug!(event_id = %id, "event added");
                None
            }
            Command::GetAllEvents => Some(Response::Events {
                events: self.store.get_all(),
            }),
            Command::GetFullEventLog => Some(Response::EventLog {
                entries: self.store.full_event_log(),
            }),
            Command::GetAllMatchingEvents { expectations } => Some(Response::Events {
                events: self.store.get_all_matching(&expectations),
            }),
            Command::ExpectEvent { expectations } => Some(Response::Lookup {
                result: self.store.find_first_match(&expectations),
            }),
            Command::ExpectEventExtendedDebug {
                expectations,
                partial_filter,
            } => Some(Response::ExtendedLookup {
                result: self.store.extended_expect_event(&expectations, &partial_filter),
            }),
            Command::RemoveExpectedEvent { event } => {
                if !self.store.remove_expected_event(&event) {
                    debug!(event_id = %event.id(), "event already resolved, nothing removed");
                }
                None
            }
            Command::DeleteMatchingEvents { expectations } => Some(Response::Count {
                removed: self.store.remove_matching_events(&expectations),
            }),
            Command::Unknown => {
                error!("unrecognized command received, ignoring");
                None
            }
        }
    }

    /// Processes commands until shutdown, disconnect or failure.
    ///
    /// `outbound` is consumed and dropped on return, which closes the results
    /// channel for the reader.
    pub fn run(mut self, inbound: &Receiver<Command>, outbound: Sender<Response>) -> LoopExit {
        info!("event store run loop started");
        loop {
            let Ok(command) = inbound.recv() else {
                info!("all command senders dropped, stopping run loop");
                self.state = LoopState::Stopped;
                return LoopExit::Disconnected;
            };

            let name = command.name();
            debug!(command = name, "processing command");

            match panic::catch_unwind(AssertUnwindSafe(|| self.handle(command))) {
                Ok(Some(response)) => {
                    if outbound.send(response).is_err() {
                        warn!(command = name, "result receiver dropped, discarding response");
                    }
                }
                Ok(None) => {}
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(command = name, %message, "run loop failed while processing command");
                    self.state = LoopState::Stopped;
                    return LoopExit::Failed(message);
                }
            }

            if self.state == LoopState::Stopped {
                info!("event store run loop shut down");
                return LoopExit::Shutdown;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Owner-side handle of a spawned run loop.
///
/// Dropping the handle sends [`Command::Shutdown`] and joins the thread.
pub struct RunLoopHandle {
    commands: Sender<Command>,
    results: Receiver<Response>,
    worker: Option<JoinHandle<LoopExit>>,
}

impl RunLoopHandle {
    /// A new producer for the inbound queue.
    #[must_use]
    pub fn sender(&self) -> Sender<Command> {
        self.commands.clone()
    }

    /// The outbound channel. It has a single logical reader.
    #[must_use]
    pub const fn results(&self) -> &Receiver<Response> {
        &self.results
    }

    /// Enqueues a command. Blocks while a bounded queue is full.
    pub fn send(&self, command: Command) -> TesResult<()> {
        let context = command.name();
        self.commands.send(command).map_err(|_| {
            ExecutionError::Disconnected {
                context: context.to_string(),
            }
            .into()
        })
    }

    /// Returns true once the worker thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Drops this handle's sender and waits for the loop to exit.
    ///
    /// Blocks until a shutdown is processed or every cloned sender is gone.
    pub fn join(mut self) -> TesResult<LoopExit> {
        let worker = self.worker.take();
        drop(self);
        match worker {
            Some(worker) => worker
                .join()
                .map_err(|_| TesError::internal("run loop thread panicked outside command processing")),
            None => Err(TesError::internal("run loop already joined")),
        }
    }
}

impl Drop for RunLoopHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send(Command::Shutdown);
            let _ = worker.join();
        }
    }
}

/// Spawns a run loop over an empty store.
pub fn spawn(config: &RunLoopConfig) -> TesResult<RunLoopHandle> {
    spawn_loop(RunLoop::new(), config)
}

/// Spawns `run_loop` on its own thread.
pub fn spawn_loop(run_loop: RunLoop, config: &RunLoopConfig) -> TesResult<RunLoopHandle> {
    let (commands, inbound) = match config.queue_capacity {
        Some(capacity) => bounded::<Command>(capacity.max(1)),
        None => unbounded::<Command>(),
    };
    let (outbound, results) = unbounded::<Response>();

    let worker = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || run_loop.run(&inbound, outbound))
        .map_err(|e| ExecutionError::Spawn {
            message: e.to_string(),
        })?;

    Ok(RunLoopHandle {
        commands,
        results,
        worker: Some(worker),
    })
}
