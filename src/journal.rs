//! Append-only saga journal and state replay
//!
//! The journal is the durable-execution substrate's source of truth: every
//! stage transition, step completion, signal and ticket is appended here,
//! and [`replay`] folds a saga's entries back into in-memory state after a
//! process restart. Nothing else is persisted.

use crate::events::{SagaEvent, SignalPayload};
use crate::instance::{KillSwitchRecord, SagaStatus};
use crate::risk::AggregatedDecision;
use crate::{SagaContext, SagaId, TerminalOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Journal storage trait
pub trait SagaJournal: Send + Sync + 'static {
    /// Append an event, returning its global sequence number
    fn append(&self, saga_id: SagaId, event: SagaEvent) -> Result<u64, JournalError>;
    /// Read a saga's entries in append order
    fn read(&self, saga_id: SagaId) -> Result<Vec<JournalEntry>, JournalError>;
    /// List every saga with at least one entry
    fn list_sagas(&self) -> Result<Vec<SagaId>, JournalError>;
}

/// One journaled event with its sequence and timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Global append sequence
    pub sequence: u64,
    /// When the entry was recorded (millis since UNIX epoch)
    pub recorded_at_millis: u64,
    /// The event itself
    pub event: SagaEvent,
}

/// Journal backend errors
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Backend storage failure
    #[error("Storage error: {0}")]
    Storage(Box<str>),
    /// No entries for the requested saga
    #[error("Not found: {0}")]
    NotFound(SagaId),
}

/// In-memory journal, used by tests and as the default backend
pub struct InMemoryJournal {
    data: std::sync::RwLock<HashMap<u64, Vec<JournalEntry>>>,
    counter: std::sync::atomic::AtomicU64,
}

impl InMemoryJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self {
            data: std::sync::RwLock::new(HashMap::new()),
            counter: std::sync::atomic::AtomicU64::new(1),
        }
    }
}

impl SagaJournal for InMemoryJournal {
    fn append(&self, saga_id: SagaId, event: SagaEvent) -> Result<u64, JournalError> {
        let seq = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let entry = JournalEntry {
            sequence: seq,
            recorded_at_millis: crate::SagaContext::now_millis(),
            event,
        };

        let mut data = self
            .data
            .write()
            .map_err(|e| JournalError::Storage(e.to_string().into()))?;
        data.entry(saga_id.0).or_default().push(entry);

        Ok(seq)
    }

    fn read(&self, saga_id: SagaId) -> Result<Vec<JournalEntry>, JournalError> {
        let data = self
            .data
            .read()
            .map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.get(&saga_id.0).cloned().unwrap_or_default())
    }

    fn list_sagas(&self) -> Result<Vec<SagaId>, JournalError> {
        let data = self
            .data
            .read()
            .map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.keys().map(|&id| SagaId::new(id)).collect())
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// A recovery ticket as reconstructed from the journal
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenTicket {
    /// Ticket identifier
    pub ticket_id: u64,
    /// Step the ticket was opened for
    pub step_id: Box<str>,
    /// Stage the failure occurred in
    pub stage: u8,
    /// Failure reason shown to the operator
    pub error: Box<str>,
}

/// Saga state rebuilt from the journal
#[derive(Clone, Debug)]
pub struct ReplayedSaga {
    /// Context the saga started with, if a `SagaStarted` entry exists
    pub context: Option<SagaContext>,
    /// Last stage entered (0 if the saga never started a stage)
    pub stage: u8,
    /// Status as of the last entry
    pub status: SagaStatus,
    /// Memoized step outputs keyed by step id
    pub step_outputs: HashMap<Box<str>, serde_json::Value>,
    /// Recovery ticket still awaiting a decision, if any
    pub open_ticket: Option<OpenTicket>,
    /// Highest ticket id ever opened (the next ticket continues from here)
    pub last_ticket_id: u64,
    /// Kill-switch record, if the switch was pulled
    pub kill_switch: Option<KillSwitchRecord>,
    /// Aggregated decision, if the analysis stage recorded one
    pub decision: Option<AggregatedDecision>,
    /// Signals received but never taken by a wait, in delivery order.
    /// These must be re-queued on resume or a journaled signal is lost.
    pub pending_signals: Vec<SignalPayload>,
    /// Terminal outcome, if the saga ended
    pub outcome: Option<TerminalOutcome>,
}

impl ReplayedSaga {
    /// Check whether the replayed saga already ended
    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Fold a saga's journal entries into its current state.
///
/// Later entries win; the fold is total, so a truncated journal still
/// yields a usable (earlier) state.
pub fn replay(entries: &[JournalEntry]) -> ReplayedSaga {
    let mut state = ReplayedSaga {
        context: None,
        stage: 0,
        status: SagaStatus::Pending,
        step_outputs: HashMap::new(),
        open_ticket: None,
        last_ticket_id: 0,
        kill_switch: None,
        decision: None,
        pending_signals: Vec::new(),
        outcome: None,
    };

    for entry in entries {
        match &entry.event {
            SagaEvent::SagaStarted { context } => {
                state.context = Some(context.clone());
                state.status = SagaStatus::Pending;
            }
            SagaEvent::StageEntered { stage, .. } => {
                state.stage = (*stage).max(state.stage);
                state.status = SagaStatus::Processing;
            }
            SagaEvent::StatusChanged { status } => {
                state.status = *status;
            }
            SagaEvent::StepCompleted {
                step_id, output, ..
            } => {
                state.step_outputs.insert(step_id.clone(), output.clone());
            }
            SagaEvent::TicketOpened {
                ticket_id,
                step_id,
                stage,
                error,
            } => {
                state.last_ticket_id = (*ticket_id).max(state.last_ticket_id);
                state.open_ticket = Some(OpenTicket {
                    ticket_id: *ticket_id,
                    step_id: step_id.clone(),
                    stage: *stage,
                    error: error.clone(),
                });
            }
            SagaEvent::TicketResolved { ticket_id, .. } => {
                if state
                    .open_ticket
                    .as_ref()
                    .is_some_and(|t| t.ticket_id == *ticket_id)
                {
                    state.open_ticket = None;
                }
            }
            SagaEvent::KillSwitchTriggered {
                reason,
                decided_by,
                triggered_at_millis,
            } => {
                // First trigger wins; the switch is never unset
                if state.kill_switch.is_none() {
                    state.kill_switch = Some(KillSwitchRecord {
                        reason: reason.clone(),
                        decided_by: decided_by.clone(),
                        triggered_at_millis: *triggered_at_millis,
                    });
                }
            }
            SagaEvent::DecisionRecorded { decision } => {
                state.decision = Some(decision.clone());
            }
            SagaEvent::SagaEnded { outcome } => {
                if state.outcome.is_none() {
                    state.status = outcome.status.into();
                    state.outcome = Some(outcome.clone());
                }
            }
            SagaEvent::SignalReceived { payload, .. } => {
                state.pending_signals.push(payload.clone());
            }
            SagaEvent::SignalConsumed { signal_name, .. } => {
                // Waits take the oldest queued payload of a name first
                if let Some(pos) = state
                    .pending_signals
                    .iter()
                    .position(|p| p.signal_name() == signal_name.as_ref())
                {
                    state.pending_signals.remove(pos);
                }
            }
            SagaEvent::StepStarted { .. }
            | SagaEvent::StepFailed { .. }
            | SagaEvent::StepSkipped { .. }
            | SagaEvent::SignalTimedOut { .. }
            | SagaEvent::SignalEmitted { .. } => {}
        }
    }

    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecoveryAction;

    fn journal_with(events: Vec<SagaEvent>) -> Vec<JournalEntry> {
        events
            .into_iter()
            .enumerate()
            .map(|(i, event)| JournalEntry {
                sequence: i as u64 + 1,
                recorded_at_millis: i as u64,
                event,
            })
            .collect()
    }

    #[test]
    fn replay_rebuilds_stage_status_and_memoized_outputs() {
        let entries = journal_with(vec![
            SagaEvent::SagaStarted {
                context: crate::SagaContext::new(
                    crate::SagaId::new(1),
                    crate::ApplicantId(9),
                    "owner@acme.test",
                    250_000,
                ),
            },
            SagaEvent::StageEntered {
                stage: 1,
                entered_at_millis: 1,
            },
            SagaEvent::StepCompleted {
                step_id: "stage1:itc-check".into(),
                output: serde_json::json!({"score": 72}),
                completed_at_millis: 2,
            },
            SagaEvent::StageEntered {
                stage: 2,
                entered_at_millis: 3,
            },
            SagaEvent::StatusChanged {
                status: SagaStatus::AwaitingHuman,
            },
        ]);

        let state = replay(&entries);
        assert_eq!(state.stage, 2);
        assert_eq!(state.status, SagaStatus::AwaitingHuman);
        assert_eq!(
            state.step_outputs.get("stage1:itc-check").unwrap()["score"],
            72
        );
        assert!(!state.is_terminal());
    }

    #[test]
    fn replay_resolves_tickets_and_keeps_first_kill_switch() {
        let entries = journal_with(vec![
            SagaEvent::TicketOpened {
                ticket_id: 1,
                step_id: "stage6:create-client".into(),
                stage: 6,
                error: "downstream 503".into(),
            },
            SagaEvent::TicketResolved {
                ticket_id: 1,
                action: RecoveryAction::Retry,
            },
            SagaEvent::KillSwitchTriggered {
                reason: "COMPLIANCE_VIOLATION".into(),
                decided_by: "policy".into(),
                triggered_at_millis: 5,
            },
            SagaEvent::KillSwitchTriggered {
                reason: "duplicate".into(),
                decided_by: "ops".into(),
                triggered_at_millis: 6,
            },
            SagaEvent::SagaEnded {
                outcome: TerminalOutcome::failed(6, "COMPLIANCE_VIOLATION"),
            },
        ]);

        let state = replay(&entries);
        assert!(state.open_ticket.is_none());
        assert_eq!(state.last_ticket_id, 1);
        let switch = state.kill_switch.as_ref().unwrap();
        assert_eq!(switch.reason.as_ref(), "COMPLIANCE_VIOLATION");
        assert!(state.is_terminal());
        assert_eq!(state.status, SagaStatus::Failed);
    }

    #[test]
    fn unconsumed_signals_survive_replay() {
        let entries = journal_with(vec![
            SagaEvent::SignalReceived {
                payload: SignalPayload::QuoteApproved {
                    quote_reference: "Q-1".into(),
                },
                received_at_millis: 1,
            },
            SagaEvent::SignalReceived {
                payload: SignalPayload::QuoteSigned {
                    quote_reference: "Q-1".into(),
                },
                received_at_millis: 2,
            },
            SagaEvent::SignalConsumed {
                signal_name: "quote.approved".into(),
                consumed_at_millis: 3,
            },
        ]);

        let state = replay(&entries);
        assert_eq!(state.pending_signals.len(), 1);
        assert!(matches!(
            state.pending_signals[0],
            SignalPayload::QuoteSigned { .. }
        ));
    }

    #[test]
    fn unresolved_ticket_survives_replay() {
        let entries = journal_with(vec![SagaEvent::TicketOpened {
            ticket_id: 3,
            step_id: "stage1:generate-quote".into(),
            stage: 1,
            error: "pricing service unavailable".into(),
        }]);

        let state = replay(&entries);
        let ticket = state.open_ticket.unwrap();
        assert_eq!(ticket.ticket_id, 3);
        assert_eq!(ticket.stage, 1);
    }
}
