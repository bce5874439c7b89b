//! Operator control surface
//!
//! The three things a human (or the API layer fronting one) can do to a
//! running saga: deliver a signal, resolve an open recovery ticket, and
//! pull the kill switch. Every operation is idempotent against a saga
//! that already ended.

use crate::events::{EmittedSignal, RecoveryAction, SagaEvent, SignalPayload};
use crate::journal::replay;
use crate::sequencer::SagaRunner;
use crate::{SagaContext, SagaError, SagaId};

impl SagaRunner {
    /// Deliver an external signal to a saga.
    ///
    /// A `saga.terminate` payload routes to [`SagaRunner::terminate`]. Any
    /// signal addressed to a saga that already ended is dropped with a log
    /// line; it never reaches a wait.
    pub fn signal(&self, saga_id: SagaId, payload: SignalPayload) -> Result<(), SagaError> {
        if let SignalPayload::Terminate { reason, decided_by } = &payload {
            return self.terminate(saga_id, reason, decided_by);
        }

        if self.saga_ended(saga_id)? {
            tracing::info!(
                saga_id = %saga_id,
                signal = payload.signal_name(),
                "signal for a terminated saga dropped"
            );
            return Ok(());
        }

        self.substrate.deliver(saga_id, payload);
        Ok(())
    }

    /// Resolve the open recovery ticket on a saga with the operator's
    /// decision. A no-op (logged) if the saga ended or has no open ticket.
    pub fn resolve_error(
        &self,
        saga_id: SagaId,
        action: RecoveryAction,
        decided_by: &str,
    ) -> Result<(), SagaError> {
        let entries = self.substrate.journal().read(saga_id)?;
        let replayed = replay(&entries);

        if replayed.is_terminal() {
            tracing::info!(saga_id = %saga_id, "recovery decision against a terminal saga ignored");
            return Ok(());
        }
        let Some(ticket) = replayed.open_ticket else {
            tracing::warn!(saga_id = %saga_id, "recovery decision with no open ticket ignored");
            return Ok(());
        };

        self.substrate.deliver(
            saga_id,
            SignalPayload::RecoveryDecisionReceived {
                ticket_id: ticket.ticket_id,
                action,
                decided_by: decided_by.into(),
            },
        );
        Ok(())
    }

    /// Pull the kill switch on a saga.
    ///
    /// Idempotent: the first trigger wins, later calls and calls against a
    /// terminal saga are no-ops. Works with or without a live handle — a
    /// saga not currently driven by this process gets the trigger journaled
    /// so any later resume observes it before running a single step.
    pub fn terminate(
        &self,
        saga_id: SagaId,
        reason: &str,
        decided_by: &str,
    ) -> Result<(), SagaError> {
        if let Some(handle) = self.handle(saga_id) {
            if handle.is_terminal() {
                tracing::info!(saga_id = %saga_id, "terminate against a terminal saga ignored");
                return Ok(());
            }
            if let Some(record) = handle.kill.trigger(reason, decided_by) {
                handle
                    .instance
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_kill_switch(record.clone());
                self.journal_termination(saga_id, reason, decided_by, record.triggered_at_millis);
            }
            return Ok(());
        }

        let entries = self.substrate.journal().read(saga_id)?;
        let replayed = replay(&entries);
        if replayed.is_terminal() {
            tracing::info!(saga_id = %saga_id, "terminate against a terminal saga ignored");
            return Ok(());
        }
        if replayed.kill_switch.is_none() {
            self.journal_termination(saga_id, reason, decided_by, SagaContext::now_millis());
        }
        Ok(())
    }

    fn saga_ended(&self, saga_id: SagaId) -> Result<bool, SagaError> {
        if let Some(handle) = self.handle(saga_id) {
            return Ok(handle.is_terminal());
        }
        let entries = self.substrate.journal().read(saga_id)?;
        Ok(replay(&entries).is_terminal())
    }

    fn journal_termination(
        &self,
        saga_id: SagaId,
        reason: &str,
        decided_by: &str,
        triggered_at_millis: u64,
    ) {
        self.substrate.record_event(
            saga_id,
            SagaEvent::KillSwitchTriggered {
                reason: reason.into(),
                decided_by: decided_by.into(),
                triggered_at_millis,
            },
        );
        self.substrate.emit_signal(
            saga_id,
            EmittedSignal::SagaTerminated {
                reason: reason.into(),
            },
        );
        self.effects.notifier.create_notification(
            saga_id,
            crate::effects::NotificationKind::Terminated,
            "Onboarding terminated",
            &format!("Saga {saga_id} terminated by {decided_by}: {reason}"),
            false,
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::effects::{
        Effects, NotificationKind, RecordingDownstream, RecordingNotifier, StaticChecks,
    };
    use crate::events::{RecoveryAction, SagaEvent};
    use crate::journal::InMemoryJournal;
    use crate::substrate::Substrate;
    use crate::{ApplicantId, SagaContext, SagaId, SagaRunner, TerminalStatus};
    use std::sync::Arc;

    fn runner() -> (SagaRunner, Arc<RecordingNotifier>) {
        let substrate = Arc::new(Substrate::new(Arc::new(InMemoryJournal::new())));
        let notifier = Arc::new(RecordingNotifier::new());
        let effects = Effects {
            notifier: notifier.clone(),
            checks: Arc::new(StaticChecks::all_clear()),
            downstream: Arc::new(RecordingDownstream::new()),
        };
        (SagaRunner::new(substrate, effects), notifier)
    }

    #[tokio::test]
    async fn terminate_before_run_preempts_every_step() {
        let (runner, notifier) = runner();
        let saga_id = SagaId::new(40);

        runner.terminate(saga_id, "fraud suspected", "ops").unwrap();

        let context = SagaContext::new(saga_id, ApplicantId(9), "owner@acme.test", 100_000);
        let outcome = runner.run(context).await.unwrap();

        assert_eq!(outcome.status, TerminalStatus::Failed);
        assert!(outcome.reason.contains("terminated by ops"));
        assert!(notifier
            .notifications()
            .iter()
            .any(|n| n.kind == NotificationKind::Terminated));
        assert_eq!(runner.stats().kill_switch_terminations, 1);
        assert_eq!(runner.stats().steps_executed, 0);
    }

    #[tokio::test]
    async fn recovery_decision_without_a_ticket_is_dropped() {
        let (runner, _) = runner();
        let saga_id = SagaId::new(41);

        runner
            .resolve_error(saga_id, RecoveryAction::Retry, "ops")
            .unwrap();

        let entries = runner.substrate().journal().read(saga_id).unwrap();
        assert!(entries
            .iter()
            .all(|e| !matches!(e.event, SagaEvent::SignalReceived { .. })));
    }

    #[tokio::test]
    async fn second_terminate_is_a_noop() {
        let (runner, notifier) = runner();
        let saga_id = SagaId::new(42);

        runner.terminate(saga_id, "fraud suspected", "ops").unwrap();
        runner.terminate(saga_id, "changed reason", "ops2").unwrap();

        let entries = runner.substrate().journal().read(saga_id).unwrap();
        let triggers = entries
            .iter()
            .filter(|e| matches!(e.event, SagaEvent::KillSwitchTriggered { .. }))
            .count();
        assert_eq!(triggers, 1);
        assert_eq!(notifier.notifications().len(), 1);
    }
}
