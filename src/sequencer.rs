//! Stage sequencer and saga runner
//!
//! Owns the fixed stage graph, advances the persisted stage/status of each
//! saga instance, and decides what runs next. Before any step runs the
//! sequencer re-checks the kill switch; once the switch is observed no
//! further step starts, including steps already scheduled.

use crate::config::SagaConfig;
use crate::effects::{Effects, NotificationKind};
use crate::events::{SagaEvent, SignalPayload};
use crate::instance::{SagaInstance, SagaStatus};
use crate::journal::replay;
use crate::observer::{NoOpObserver, SagaObserver};
use crate::signal::SignalWaiter;
use crate::stages;
use crate::substrate::Substrate;
use crate::{KillSwitch, SagaContext, SagaError, SagaId, TerminalOutcome};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What a stage body tells the sequencer to do next
pub(crate) enum StageFlow {
    /// Enter the given stage
    Next(u8),
    /// The saga is complete
    Done,
}

/// Live handle to a running (or finished) saga: the cancellation token and
/// the shared instance record. Used by the operator control surface.
#[derive(Clone)]
pub struct SagaHandle {
    /// Cooperative cancellation token for this saga
    pub kill: KillSwitch,
    /// Shared instance record
    pub instance: Arc<Mutex<SagaInstance>>,
}

impl SagaHandle {
    /// Check whether the saga already reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_terminal()
    }
}

/// Shared state threaded through a saga's stages and branches.
pub(crate) struct StageCtx {
    pub substrate: Arc<Substrate>,
    pub effects: Effects,
    pub config: SagaConfig,
    pub observer: Arc<dyn SagaObserver>,
    pub instance: Arc<Mutex<SagaInstance>>,
    pub kill: KillSwitch,
    pub context: SagaContext,
    pub next_ticket: AtomicU64,
    pending_waits: AtomicU32,
}

impl StageCtx {
    pub fn saga_id(&self) -> SagaId {
        self.context.saga_id
    }

    pub fn current_stage(&self) -> u8 {
        self.instance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stage
    }

    fn is_terminal(&self) -> bool {
        self.instance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_terminal()
    }

    /// Set a non-terminal status and journal the change. A no-op once the
    /// saga is terminal.
    pub fn set_status(&self, status: SagaStatus) {
        let mut instance = self.instance.lock().unwrap_or_else(|e| e.into_inner());
        if instance.set_status(status).is_ok() {
            drop(instance);
            self.substrate
                .record_event(self.saga_id(), SagaEvent::StatusChanged { status });
        }
    }

    /// Fail fast if the kill switch has been pulled
    pub fn check_kill(&self) -> Result<(), TerminalOutcome> {
        if self.kill.is_triggered() {
            Err(self.kill_outcome())
        } else {
            Ok(())
        }
    }

    /// Terminal outcome describing the pulled kill switch
    pub fn kill_outcome(&self) -> TerminalOutcome {
        let reason = self
            .kill
            .triggered()
            .map(|r| format!("terminated by {}: {}", r.decided_by, r.reason))
            .unwrap_or_else(|| "terminated".to_string());
        TerminalOutcome::failed(self.current_stage(), reason)
    }

    /// Pull the kill switch on behalf of policy, journaling the trigger and
    /// emitting `saga.terminated`. Idempotent.
    pub fn trigger_kill(&self, reason: &str, decided_by: &str) -> TerminalOutcome {
        if let Some(record) = self.kill.trigger(reason, decided_by) {
            self.instance
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .record_kill_switch(record.clone());
            self.substrate.record_event(
                self.saga_id(),
                SagaEvent::KillSwitchTriggered {
                    reason: record.reason.clone(),
                    decided_by: record.decided_by.clone(),
                    triggered_at_millis: record.triggered_at_millis,
                },
            );
            self.substrate.emit_signal(
                self.saga_id(),
                crate::events::EmittedSignal::SagaTerminated {
                    reason: record.reason.clone(),
                },
            );
            self.observer.on_kill_switch(&self.context, &record.reason);
        }
        self.kill_outcome()
    }

    /// Wait for a signal the current stage cannot proceed without.
    ///
    /// The instance shows `AwaitingHuman` while at least one wait is
    /// pending and returns to `Processing` when the last one resolves. A
    /// timeout raises the operator notification and becomes the stage's
    /// terminal outcome; the kill switch firing mid-wait abandons the wait.
    pub async fn await_signal(
        &self,
        signal_name: &'static str,
        timeout: Duration,
    ) -> Result<SignalPayload, TerminalOutcome> {
        self.check_kill()?;
        let stage = self.current_stage();
        let waiter = SignalWaiter::new(Arc::clone(&self.substrate), self.saga_id());

        if self.pending_waits.fetch_add(1, Ordering::SeqCst) == 0 {
            self.set_status(SagaStatus::AwaitingHuman);
        }

        let result = tokio::select! {
            biased;
            _ = self.kill.cancelled() => Err(self.kill_outcome()),
            outcome = waiter.expect(signal_name, timeout, stage) => outcome,
        };

        if self.pending_waits.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.set_status(SagaStatus::Processing);
        }

        if let Err(outcome) = &result {
            // A detached branch can outlive the saga; its expiring wait must
            // not page an operator about a saga that already ended.
            if outcome.status == crate::TerminalStatus::Timeout && !self.is_terminal() {
                self.observer.on_wait_timed_out(&self.context, signal_name);
                self.effects.notifier.create_notification(
                    self.saga_id(),
                    NotificationKind::Timeout,
                    "Onboarding wait expired",
                    &format!(
                        "Saga {} stage {stage}: '{signal_name}' was not received before its deadline. The saga has stopped and needs a manual restart.",
                        self.saga_id()
                    ),
                    true,
                );
            }
        }

        result
    }

    /// Run a side-effecting step under human-in-the-loop recovery.
    /// See [`crate::recovery`].
    pub async fn guard<T, F, Fut>(
        &self,
        step_name: &str,
        action: F,
    ) -> Result<Option<T>, TerminalOutcome>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::StepFailure>>,
    {
        crate::recovery::guard(self, step_name, action).await
    }

    /// Journal step id for a named step of the current stage
    pub fn step_id(&self, step_name: &str) -> String {
        format!("stage{}:{}", self.current_stage(), step_name)
    }
}

/// Drives onboarding sagas through the fixed stage graph.
pub struct SagaRunner {
    pub(crate) substrate: Arc<Substrate>,
    pub(crate) effects: Effects,
    pub(crate) config: SagaConfig,
    pub(crate) observer: Arc<dyn SagaObserver>,
    pub(crate) handles: Mutex<HashMap<u64, SagaHandle>>,
}

impl SagaRunner {
    /// Runner over the given substrate and collaborators
    pub fn new(substrate: Arc<Substrate>, effects: Effects) -> Self {
        Self {
            substrate,
            effects,
            config: SagaConfig::default(),
            observer: Arc::new(NoOpObserver),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the timeout table
    pub fn with_config(mut self, config: SagaConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an observer
    pub fn with_observer(mut self, observer: Arc<dyn SagaObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The substrate this runner drives
    pub fn substrate(&self) -> &Arc<Substrate> {
        &self.substrate
    }

    /// Snapshot of the runner's counters
    pub fn stats(&self) -> crate::stats::RunnerStatsSnapshot {
        self.substrate.stats().snapshot()
    }

    /// Handle to a saga this runner has seen, if any
    pub fn handle(&self, saga_id: SagaId) -> Option<SagaHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&saga_id.0)
            .cloned()
    }

    /// Run a saga to its terminal outcome.
    ///
    /// Safe to call again for a saga that already has journal history: all
    /// completed steps replay from the journal, pending waits re-arm, and a
    /// saga that already ended returns its recorded outcome without side
    /// effects.
    pub async fn run(&self, context: SagaContext) -> Result<TerminalOutcome, SagaError> {
        let saga_id = context.saga_id;
        let entries = self.substrate.journal().read(saga_id)?;
        let replayed = replay(&entries);

        if let Some(outcome) = replayed.outcome {
            return Ok(outcome);
        }

        let fresh = entries.is_empty();
        let kill = KillSwitch::from_record(replayed.kill_switch.clone());
        let mut instance = SagaInstance::new(saga_id, context.applicant_id);
        instance.stage = replayed.stage.max(1);
        instance.status = replayed.status;
        instance.kill_switch = replayed.kill_switch;
        let instance = Arc::new(Mutex::new(instance));

        let handle = SagaHandle {
            kill: kill.clone(),
            instance: Arc::clone(&instance),
        };
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(saga_id.0, handle);

        if fresh {
            self.substrate.record_event(
                saga_id,
                SagaEvent::SagaStarted {
                    context: context.clone(),
                },
            );
            self.observer.on_saga_started(&context);
        }

        let ctx = Arc::new(StageCtx {
            substrate: Arc::clone(&self.substrate),
            effects: self.effects.clone(),
            config: self.config.clone(),
            observer: Arc::clone(&self.observer),
            instance: Arc::clone(&instance),
            kill,
            context,
            next_ticket: AtomicU64::new(replayed.last_ticket_id),
            pending_waits: AtomicU32::new(0),
        });

        // Re-queue journaled signals no wait ever took, so a signal that
        // arrived before a crash still resolves its wait after the restart.
        self.substrate
            .restore_signals(saga_id, replayed.pending_signals);

        let outcome = self.drive(&ctx, replayed.stage.max(1)).await;
        self.finish(&ctx, outcome.clone());
        Ok(outcome)
    }

    /// Resume a saga from its journal after a process restart.
    pub async fn resume(&self, saga_id: SagaId) -> Result<TerminalOutcome, SagaError> {
        let entries = self.substrate.journal().read(saga_id)?;
        let replayed = replay(&entries);
        let context = replayed
            .context
            .ok_or(crate::journal::JournalError::NotFound(saga_id))?;
        self.run(context).await
    }

    async fn drive(&self, ctx: &Arc<StageCtx>, start_stage: u8) -> TerminalOutcome {
        let mut stage = start_stage;
        loop {
            if ctx.kill.is_triggered() {
                return ctx.kill_outcome();
            }

            {
                let mut instance = ctx.instance.lock().unwrap_or_else(|e| e.into_inner());
                if let Err(error) = instance.advance_stage(stage) {
                    return TerminalOutcome::failed(instance.stage, error.to_string());
                }
            }
            ctx.substrate.record_event(
                ctx.saga_id(),
                SagaEvent::StageEntered {
                    stage,
                    entered_at_millis: SagaContext::now_millis(),
                },
            );
            ctx.observer.on_stage_entered(&ctx.context, stage);

            match stages::run_stage(ctx, stage).await {
                Ok(StageFlow::Next(next)) => stage = next,
                Ok(StageFlow::Done) => return TerminalOutcome::completed(stage),
                Err(outcome) => return outcome,
            }
        }
    }

    fn finish(&self, ctx: &Arc<StageCtx>, outcome: TerminalOutcome) {
        {
            let mut instance = ctx.instance.lock().unwrap_or_else(|e| e.into_inner());
            instance.finish(outcome.clone());
        }
        ctx.substrate.record_event(
            ctx.saga_id(),
            SagaEvent::SagaEnded {
                outcome: outcome.clone(),
            },
        );
        ctx.observer.on_saga_ended(&ctx.context, &outcome);

        let stats = self.substrate.stats();
        match outcome.status {
            crate::TerminalStatus::Completed => {
                stats.sagas_completed.fetch_add(1, Ordering::Relaxed);
            }
            crate::TerminalStatus::Failed | crate::TerminalStatus::Timeout => {
                stats.sagas_failed.fetch_add(1, Ordering::Relaxed);
                if ctx.kill.is_triggered() {
                    stats
                        .kill_switch_terminations
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}
