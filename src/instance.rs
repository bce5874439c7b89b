//! Persisted saga instance record and its status machine

use crate::{ApplicantId, SagaError, SagaId, TerminalOutcome, TerminalStatus};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a saga instance.
///
/// `Completed`, `Failed` and `Timeout` are sinks: once entered, no further
/// transition is legal. The instance itself is never destroyed — a terminal
/// saga is retained as an audit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Created, no stage running yet
    Pending,
    /// Steps are running
    Processing,
    /// Blocked on an external signal
    AwaitingHuman,
    /// Blocked on a recovery-ticket decision
    Paused,
    /// All stages ran to completion
    Completed,
    /// Veto, policy block, kill switch, or cancellation
    Failed,
    /// A signal wait exceeded its deadline
    Timeout,
}

impl SagaStatus {
    /// Check whether this status is a terminal sink
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

impl From<TerminalStatus> for SagaStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Completed => Self::Completed,
            TerminalStatus::Failed => Self::Failed,
            TerminalStatus::Timeout => Self::Timeout,
        }
    }
}

/// The kill-switch record for one saga: set at most once, never unset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchRecord {
    /// Why the switch was pulled
    pub reason: Box<str>,
    /// Operator or policy that pulled it
    pub decided_by: Box<str>,
    /// When it was pulled (millis since UNIX epoch)
    pub triggered_at_millis: u64,
}

/// One onboarding run.
///
/// Mutated only by the sequencer, the kill switch, and recovery; `stage` is
/// monotonically non-decreasing while the saga is alive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Saga identifier (also the signal correlation key)
    pub id: SagaId,
    /// Applicant being onboarded
    pub applicant_id: ApplicantId,
    /// Current stage number, 1-based
    pub stage: u8,
    /// Lifecycle status
    pub status: SagaStatus,
    /// Kill-switch record, present once triggered
    pub kill_switch: Option<KillSwitchRecord>,
    /// Terminal result, present once the saga ends
    pub outcome: Option<TerminalOutcome>,
}

impl SagaInstance {
    /// Create a fresh instance at stage 1, status `Pending`
    pub fn new(id: SagaId, applicant_id: ApplicantId) -> Self {
        Self {
            id,
            applicant_id,
            stage: 1,
            status: SagaStatus::Pending,
            kill_switch: None,
            outcome: None,
        }
    }

    /// Check whether the saga has reached a terminal status
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Advance to a later stage. Stage numbers only increase; a saga never
    /// revisits an earlier stage (rejection ends the saga rather than
    /// looping back).
    pub fn advance_stage(&mut self, stage: u8) -> Result<(), SagaError> {
        if self.is_terminal() {
            return Err(SagaError::IllegalTransition(
                format!("saga {} is terminal, cannot enter stage {}", self.id, stage).into(),
            ));
        }
        if stage < self.stage {
            return Err(SagaError::IllegalTransition(
                format!(
                    "saga {} stage would regress {} -> {}",
                    self.id, self.stage, stage
                )
                .into(),
            ));
        }
        self.stage = stage;
        self.status = SagaStatus::Processing;
        Ok(())
    }

    /// Set a non-terminal status. Terminal statuses go through
    /// [`SagaInstance::finish`] so the outcome is recorded alongside.
    pub fn set_status(&mut self, status: SagaStatus) -> Result<(), SagaError> {
        if self.is_terminal() {
            return Err(SagaError::IllegalTransition(
                format!("saga {} is terminal, cannot set {:?}", self.id, status).into(),
            ));
        }
        if status.is_terminal() {
            return Err(SagaError::IllegalTransition(
                format!("terminal status {:?} requires finish()", status).into(),
            ));
        }
        self.status = status;
        Ok(())
    }

    /// Record the kill switch. Idempotent: the first record wins and a
    /// second trigger is a no-op.
    pub fn record_kill_switch(&mut self, record: KillSwitchRecord) {
        if self.kill_switch.is_none() {
            self.kill_switch = Some(record);
        }
    }

    /// Enter a terminal status with its structured outcome. A second call
    /// against an already-terminal saga is a no-op (the first outcome is
    /// the audit record).
    pub fn finish(&mut self, outcome: TerminalOutcome) {
        if self.is_terminal() {
            return;
        }
        self.status = outcome.status.into();
        self.outcome = Some(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> SagaInstance {
        SagaInstance::new(SagaId::new(1), ApplicantId(77))
    }

    #[test]
    fn stage_never_regresses() {
        let mut saga = instance();
        saga.advance_stage(3).unwrap();
        assert!(saga.advance_stage(2).is_err());
        assert_eq!(saga.stage, 3);
        // Re-entering the same stage is allowed (replay after restart)
        saga.advance_stage(3).unwrap();
    }

    #[test]
    fn terminal_status_is_a_sink() {
        let mut saga = instance();
        saga.advance_stage(2).unwrap();
        saga.finish(TerminalOutcome::failed(2, "cancelled"));
        assert!(saga.is_terminal());
        assert!(saga.set_status(SagaStatus::Processing).is_err());
        assert!(saga.advance_stage(4).is_err());

        // Second finish is a no-op; the first outcome is retained
        saga.finish(TerminalOutcome::completed(2));
        assert_eq!(saga.status, SagaStatus::Failed);
        assert_eq!(saga.outcome.as_ref().unwrap().reason.as_ref(), "cancelled");
    }

    #[test]
    fn kill_switch_set_at_most_once() {
        let mut saga = instance();
        saga.record_kill_switch(KillSwitchRecord {
            reason: "fraud".into(),
            decided_by: "ops".into(),
            triggered_at_millis: 1,
        });
        saga.record_kill_switch(KillSwitchRecord {
            reason: "other".into(),
            decided_by: "ops2".into(),
            triggered_at_millis: 2,
        });
        assert_eq!(saga.kill_switch.as_ref().unwrap().reason.as_ref(), "fraud");
    }
}
