//! Durable step substrate
//!
//! Executes named idempotent actions at-most-once-successfully by memoizing
//! their outputs in the journal, and routes external signals to waiting
//! sagas by correlation key. The saga core consumes this narrow interface;
//! it never re-implements retries or memoization itself.

use crate::events::{EmittedSignal, SagaEvent, SignalPayload};
use crate::journal::SagaJournal;
use crate::{SagaContext, SagaError, SagaId, StepFailure};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Outcome of one signal wait: exactly one of the two, never both.
#[derive(Clone, Debug)]
pub enum WaitOutcome {
    /// The signal arrived with this payload
    Signal(SignalPayload),
    /// The deadline elapsed first
    TimedOut,
}

impl WaitOutcome {
    /// Check whether the wait timed out
    pub fn timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }
}

struct SignalSlot {
    queue: VecDeque<SignalPayload>,
    notify: Arc<Notify>,
}

impl SignalSlot {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

/// Routes signals to pending waits, keyed by `(saga, signal name)`.
///
/// The correlation key is part of the routing key, so a signal addressed to
/// saga A can never resolve a wait belonging to saga B. Signals delivered
/// before anyone waits are queued; a signal arriving for a saga that already
/// terminated is a no-op sitting in a queue nobody reads.
#[derive(Clone, Default)]
struct SignalHub {
    slots: Arc<Mutex<HashMap<(u64, &'static str), SignalSlot>>>,
}

impl SignalHub {
    fn deliver(&self, saga_id: SagaId, payload: SignalPayload) {
        let notify = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let slot = slots
                .entry((saga_id.0, payload.signal_name()))
                .or_insert_with(SignalSlot::new);
            slot.queue.push_back(payload);
            Arc::clone(&slot.notify)
        };
        notify.notify_waiters();
    }

    fn try_take(&self, saga_id: SagaId, signal_name: &'static str) -> Option<SignalPayload> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .get_mut(&(saga_id.0, signal_name))
            .and_then(|slot| slot.queue.pop_front())
    }

    fn notifier(&self, saga_id: SagaId, signal_name: &'static str) -> Arc<Notify> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let slot = slots
            .entry((saga_id.0, signal_name))
            .or_insert_with(SignalSlot::new);
        Arc::clone(&slot.notify)
    }

    /// Re-seed queues from journaled-but-unconsumed signals.
    ///
    /// A name whose queue already holds payloads is skipped wholesale: those
    /// deliveries happened in this process and the queue is already in sync
    /// with the journal. Seeding them again would duplicate signals.
    fn restore(&self, saga_id: SagaId, payloads: Vec<SignalPayload>) {
        let notifiers = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let mut seeded: Vec<&'static str> = Vec::new();
            let mut notifiers = Vec::new();
            for payload in payloads {
                let name = payload.signal_name();
                let slot = slots
                    .entry((saga_id.0, name))
                    .or_insert_with(SignalSlot::new);
                if slot.queue.is_empty() || seeded.contains(&name) {
                    slot.queue.push_back(payload);
                    if !seeded.contains(&name) {
                        seeded.push(name);
                        notifiers.push(Arc::clone(&slot.notify));
                    }
                }
            }
            notifiers
        };
        for notify in notifiers {
            notify.notify_waiters();
        }
    }
}

/// The durable-execution substrate: memoized steps + correlated signals,
/// all backed by the append-only journal.
pub struct Substrate {
    journal: Arc<dyn SagaJournal>,
    hub: SignalHub,
    stats: Arc<crate::stats::RunnerStats>,
}

impl Substrate {
    /// Create a substrate over the given journal backend
    pub fn new(journal: Arc<dyn SagaJournal>) -> Self {
        Self {
            journal,
            hub: SignalHub::default(),
            stats: Arc::new(crate::stats::RunnerStats::new()),
        }
    }

    /// The underlying journal
    pub fn journal(&self) -> &Arc<dyn SagaJournal> {
        &self.journal
    }

    /// Counters shared with the runner driving this substrate
    pub fn stats(&self) -> &Arc<crate::stats::RunnerStats> {
        &self.stats
    }

    /// Append an event, logging instead of failing if the backend errors.
    pub fn record_event(&self, saga_id: SagaId, event: SagaEvent) {
        if let Err(error) = self.journal.append(saga_id, event) {
            tracing::warn!(saga_id = %saga_id, %error, "journal append failed");
        }
    }

    /// Look up a memoized output for `step_id`
    fn memoized<T: DeserializeOwned>(
        &self,
        saga_id: SagaId,
        step_id: &str,
    ) -> Result<Option<T>, SagaError> {
        let entries = self.journal.read(saga_id)?;
        for entry in entries.iter().rev() {
            if let SagaEvent::StepCompleted {
                step_id: completed, output, ..
            } = &entry.event
            {
                if completed.as_ref() == step_id {
                    let value = serde_json::from_value(output.clone()).map_err(|source| {
                        SagaError::CorruptStepOutput {
                            step_id: step_id.into(),
                            source,
                        }
                    })?;
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Read the memoized output of a completed step, if any. Used by later
    /// stages to pick up results produced behind a parallel join.
    pub fn step_output<T: DeserializeOwned>(
        &self,
        saga_id: SagaId,
        step_id: &str,
    ) -> Result<Option<T>, SagaError> {
        self.memoized(saga_id, step_id)
    }

    /// Run a named idempotent action at-most-once-successfully.
    ///
    /// If a completion for `step_id` is already journaled, its memoized
    /// output is returned without re-running the action. Otherwise the
    /// action runs; success is journaled (and memoized for any replay),
    /// failure is journaled but never memoized, so a retry actually
    /// executes the action again.
    pub async fn run_step<T, F, Fut>(
        &self,
        saga_id: SagaId,
        step_id: &str,
        attempt: u32,
        action: F,
    ) -> Result<T, StepFailure>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StepFailure>>,
    {
        match self.memoized::<T>(saga_id, step_id) {
            Ok(Some(cached)) => {
                tracing::debug!(saga_id = %saga_id, step_id, "step replayed from journal");
                self.stats
                    .steps_replayed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return Ok(cached);
            }
            Ok(None) => {}
            Err(error) => {
                return Err(StepFailure::recoverable(error.to_string()));
            }
        }

        self.record_event(
            saga_id,
            SagaEvent::StepStarted {
                step_id: step_id.into(),
                attempt,
                started_at_millis: SagaContext::now_millis(),
            },
        );

        match action().await {
            Ok(output) => {
                let value = serde_json::to_value(&output)
                    .map_err(|e| StepFailure::recoverable(e.to_string()))?;
                self.record_event(
                    saga_id,
                    SagaEvent::StepCompleted {
                        step_id: step_id.into(),
                        output: value,
                        completed_at_millis: SagaContext::now_millis(),
                    },
                );
                self.stats
                    .steps_executed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok(output)
            }
            Err(failure) => {
                self.record_event(
                    saga_id,
                    SagaEvent::StepFailed {
                        step_id: step_id.into(),
                        error: failure.reason().into(),
                        veto: !failure.is_recoverable(),
                        failed_at_millis: SagaContext::now_millis(),
                    },
                );
                self.stats
                    .steps_failed
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Err(failure)
            }
        }
    }

    /// Deliver an external signal to its saga. Journals the delivery and
    /// resolves the matching wait, if one is pending.
    pub fn deliver(&self, saga_id: SagaId, payload: SignalPayload) {
        self.record_event(
            saga_id,
            SagaEvent::SignalReceived {
                payload: payload.clone(),
                received_at_millis: SagaContext::now_millis(),
            },
        );
        self.stats
            .signals_received
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.hub.deliver(saga_id, payload);
    }

    /// Re-queue signals the journal received but no wait ever took.
    ///
    /// Called on run/resume before the first stage executes, with the
    /// pending signals computed by [`crate::journal::replay`]. Without this
    /// a signal delivered before a crash would exist only in the journal
    /// and its wait would time out after the restart.
    pub fn restore_signals(&self, saga_id: SagaId, pending: Vec<SignalPayload>) {
        if pending.is_empty() {
            return;
        }
        tracing::debug!(saga_id = %saga_id, count = pending.len(), "restoring unconsumed signals");
        self.hub.restore(saga_id, pending);
    }

    /// Take a queued signal and journal its consumption, so replay can tell
    /// delivered-and-handled apart from delivered-and-still-pending.
    fn take_signal(&self, saga_id: SagaId, signal_name: &'static str) -> Option<SignalPayload> {
        let payload = self.hub.try_take(saga_id, signal_name)?;
        self.record_event(
            saga_id,
            SagaEvent::SignalConsumed {
                signal_name: signal_name.into(),
                consumed_at_millis: SagaContext::now_millis(),
            },
        );
        Some(payload)
    }

    /// Publish a signal emitted by the saga
    pub fn emit_signal(&self, saga_id: SagaId, payload: EmittedSignal) {
        tracing::info!(saga_id = %saga_id, signal = payload.signal_name(), "signal emitted");
        self.record_event(saga_id, SagaEvent::SignalEmitted { payload });
    }

    /// Wait for a named signal addressed to this saga, up to `timeout`.
    ///
    /// Resolves to exactly one of {payload, timed out}. Multiple concurrent
    /// waits for different signal names on the same saga are permitted.
    pub async fn wait_for_signal(
        &self,
        saga_id: SagaId,
        signal_name: &'static str,
        timeout: Duration,
    ) -> WaitOutcome {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if let Some(payload) = self.take_signal(saga_id, signal_name) {
                return WaitOutcome::Signal(payload);
            }

            let notify = self.hub.notifier(saga_id, signal_name);
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            // Close the race between the queue check and wait registration
            if let Some(payload) = self.take_signal(saga_id, signal_name) {
                return WaitOutcome::Signal(payload);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                // Final check: a signal may have landed with the timeout
                if let Some(payload) = self.take_signal(saga_id, signal_name) {
                    return WaitOutcome::Signal(payload);
                }
                self.record_event(
                    saga_id,
                    SagaEvent::SignalTimedOut {
                        signal_name: signal_name.into(),
                        waited_millis: timeout.as_millis() as u64,
                    },
                );
                self.stats
                    .waits_timed_out
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return WaitOutcome::TimedOut;
            }
        }
    }
}
