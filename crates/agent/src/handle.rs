//! RunHandle — the observable, cancellable, awaitable face of one run.
//!
//! The engine owns a [`RunPublisher`] holding the sending halves; every
//! [`RunHandle`] clone holds receivers only. When the engine task ends the
//! senders drop and every subscription stream ends after delivering what
//! it has not yet seen.

use std::sync::{Arc, Mutex};

use futures::Stream;
use stepwise_core::run::{IterationLogEntry, RunOutcome, RunState, RunStatus};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::{BroadcastStream, WatchStream, errors::BroadcastStreamRecvError};
use tokio_util::sync::CancellationToken;

use crate::event::RunEvent;
use crate::transcript::Transcript;

type EventSlot = Arc<Mutex<Option<broadcast::Sender<RunEvent>>>>;

/// Sending side of a run, owned by the engine and its supervisor.
pub(crate) struct RunPublisher {
    state: watch::Sender<RunState>,
    status: watch::Sender<RunStatus>,
    current: watch::Sender<Option<IterationLogEntry>>,
    events: broadcast::Sender<RunEvent>,
    event_slot: EventSlot,
}

impl RunPublisher {
    /// Create the publisher and the first handle of a run.
    pub(crate) fn channel(
        run_id: impl Into<String>,
        token: CancellationToken,
        event_capacity: usize,
    ) -> (Self, RunHandle) {
        let run_id = run_id.into();
        let (state, state_rx) = watch::channel(RunState::new());
        let (status, status_rx) = watch::channel(RunStatus::Running);
        let (current, current_rx) = watch::channel(None);
        let (events, _) = broadcast::channel(event_capacity.max(1));
        let event_slot = Arc::new(Mutex::new(Some(events.clone())));

        let handle = RunHandle {
            run_id,
            state: state_rx,
            status: status_rx,
            current: current_rx,
            events: event_slot.clone(),
            token,
        };

        let publisher = Self {
            state,
            status,
            current,
            events,
            event_slot,
        };
        (publisher, handle)
    }

    fn emit(&self, event: RunEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_current(&self, entry: &IterationLogEntry) {
        self.state.send_modify(|state| {
            state.current_iteration = Some(entry.clone());
        });
        self.current.send_replace(Some(entry.clone()));
    }

    /// A new iteration is about to call the model.
    pub(crate) fn start_iteration(&self, entry: &IterationLogEntry) {
        self.set_current(entry);
        self.emit(RunEvent::IterationStarted { index: entry.index });
    }

    /// The in-progress iteration changed; replaces it wholesale.
    pub(crate) fn update_iteration(&self, entry: &IterationLogEntry) {
        self.set_current(entry);
        self.emit(RunEvent::IterationUpdated {
            entry: entry.clone(),
        });
    }

    /// Append `entry` to history and clear the in-progress iteration.
    pub(crate) fn complete_iteration(&self, entry: IterationLogEntry) {
        self.state.send_modify(|state| {
            state.history.push(entry.clone());
            state.current_iteration = None;
        });
        self.current.send_replace(None);
        self.emit(RunEvent::IterationCompleted { entry });
    }

    /// Record the terminal outcome. Only the first call has any effect.
    pub(crate) fn finish(&self, outcome: RunOutcome) -> bool {
        let status = outcome.status();
        let applied = self.state.send_if_modified(|state| {
            if state.status.is_terminal() {
                return false;
            }
            state.status = status;
            state.current_iteration = None;
            state.outcome = Some(outcome.clone());
            true
        });
        if !applied {
            return false;
        }

        self.current.send_replace(None);
        self.status.send_replace(status);
        self.emit(RunEvent::StatusChanged { status });
        self.emit(RunEvent::Finished { outcome });

        // Late subscribers get a closed channel instead of one that never ends.
        if let Ok(mut slot) = self.event_slot.lock() {
            slot.take();
        }
        true
    }

    pub(crate) fn history_len(&self) -> usize {
        self.state.borrow().history.len()
    }
}

/// Handle to one in-flight (or finished) run.
///
/// Cheap to clone; every clone observes the same run. Dropping all handles
/// does not stop the run; use [`cancel`](Self::cancel) for that.
#[derive(Clone)]
pub struct RunHandle {
    run_id: String,
    state: watch::Receiver<RunState>,
    status: watch::Receiver<RunStatus>,
    current: watch::Receiver<Option<IterationLogEntry>>,
    events: EventSlot,
    token: CancellationToken,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Snapshot of the whole run state.
    pub fn state(&self) -> RunState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Completed iterations so far.
    pub fn history(&self) -> Vec<IterationLogEntry> {
        self.state.borrow().history.clone()
    }

    pub fn current_iteration(&self) -> Option<IterationLogEntry> {
        self.current.borrow().clone()
    }

    /// Request cooperative cancellation.
    ///
    /// In-flight model or tool calls are not interrupted; no new ones start
    /// once the engine observes the signal. Has no effect on a finished run.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Every history entry, from the first, then each new one as it is
    /// appended. Lossless: a slow consumer only delays itself. Ends once the
    /// run is terminal and all entries were delivered.
    pub fn subscribe_history(&self) -> impl Stream<Item = IterationLogEntry> + Send + 'static {
        let rx = self.state.clone();
        futures::stream::unfold((rx, 0usize), |(mut rx, cursor)| async move {
            loop {
                let (next, terminal) = {
                    let state = rx.borrow_and_update();
                    (state.history.get(cursor).cloned(), state.status.is_terminal())
                };
                if let Some(entry) = next {
                    return Some((entry, (rx, cursor + 1)));
                }
                if terminal || rx.changed().await.is_err() {
                    return None;
                }
            }
        })
    }

    /// The in-progress iteration: the current value first, then every
    /// replacement. Intermediate values may be coalesced for slow consumers.
    pub fn subscribe_current(
        &self,
    ) -> impl Stream<Item = Option<IterationLogEntry>> + Send + 'static {
        WatchStream::new(self.current.clone())
    }

    /// Run status: the current value first, then each change.
    pub fn subscribe_status(&self) -> impl Stream<Item = RunStatus> + Send + 'static {
        WatchStream::new(self.status.clone())
    }

    /// Raw receiver for every [`RunEvent`] published from now on.
    ///
    /// Closed immediately when the run has already finished.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        let sender = self.events.lock().ok().and_then(|slot| slot.clone());
        match sender {
            Some(sender) => sender.subscribe(),
            None => {
                let (closed, rx) = broadcast::channel(1);
                drop(closed);
                rx
            }
        }
    }

    /// [`subscribe_events`](Self::subscribe_events) as a stream.
    ///
    /// A lagging consumer receives `Err(Lagged(n))` for the `n` events it
    /// missed and can resync from [`state`](Self::state).
    pub fn event_stream(
        &self,
    ) -> impl Stream<Item = Result<RunEvent, BroadcastStreamRecvError>> + Send + 'static {
        BroadcastStream::new(self.subscribe_events())
    }

    /// Wait for the run to finish.
    ///
    /// Yields the final message (completed), `Cancelled`, or the failure
    /// reason. History accumulated before a failure stays readable through
    /// [`history`](Self::history).
    pub async fn outcome(&self) -> RunOutcome {
        let mut rx = self.state.clone();
        loop {
            let outcome = rx.borrow_and_update().outcome.clone();
            if let Some(outcome) = outcome {
                return outcome;
            }
            if rx.changed().await.is_err() {
                let last = rx.borrow().outcome.clone();
                return last.unwrap_or_else(|| RunOutcome::Failed {
                    reason: "run ended without an outcome".into(),
                });
            }
        }
    }

    /// Export the run as a transcript (valid at any point, final once the
    /// run is terminal).
    pub fn transcript(&self) -> Transcript {
        Transcript::from_state(&self.run_id, &self.state.borrow())
    }
}

impl std::fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("status", &self.status())
            .finish()
    }
}
