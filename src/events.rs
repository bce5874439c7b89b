//! Signal payloads and journal events
//!
//! Every external signal the saga consumes is a variant of the closed
//! [`SignalPayload`] union, validated at the substrate boundary. The core
//! never pattern-matches on untyped data: a payload arriving under the wrong
//! signal name simply does not exist as a value of this type.

use crate::instance::SagaStatus;
use crate::risk::AggregatedDecision;
use crate::{SagaContext, TerminalOutcome};
use serde::{Deserialize, Serialize};

/// Operator decision on an open recovery ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-invoke the failed step from scratch
    Retry,
    /// Fail the saga
    Cancel,
    /// Skip the step; its result is absent
    Continue,
}

/// External signals consumed by the saga, keyed by signal name.
///
/// The serde tag of each variant is the wire name itself, so a payload
/// serializes as `{"signal": "quote.approved", ...}` and the tags agree
/// with [`SignalPayload::signal_name`] by construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum SignalPayload {
    /// `facility-form.submitted`
    #[serde(rename = "facility-form.submitted")]
    FacilityFormSubmitted {
        /// Declared business type from the form
        business_type: Box<str>,
        /// Requested facility amount
        facility_amount: u64,
    },
    /// `quote.approved`
    #[serde(rename = "quote.approved")]
    QuoteApproved {
        /// Reference of the approved quote
        quote_reference: Box<str>,
    },
    /// `quote.signed`
    #[serde(rename = "quote.signed")]
    QuoteSigned {
        /// Reference of the signed quote
        quote_reference: Box<str>,
    },
    /// `contract.signed`
    #[serde(rename = "contract.signed")]
    ContractSigned {
        /// Reference of the executed contract
        contract_reference: Box<str>,
    },
    /// `mandate-documents.submitted`
    #[serde(rename = "mandate-documents.submitted")]
    MandateDocumentsSubmitted {
        /// Number of documents submitted
        document_count: u32,
    },
    /// `fica-documents.received`
    #[serde(rename = "fica-documents.received")]
    FicaDocumentsReceived {
        /// Number of documents received
        document_count: u32,
    },
    /// `risk-decision.received`
    #[serde(rename = "risk-decision.received")]
    RiskDecisionReceived {
        /// Risk manager verdict
        approved: bool,
        /// Free-text notes from the reviewer
        notes: Box<str>,
    },
    /// `procurement-decision.received`
    #[serde(rename = "procurement-decision.received")]
    ProcurementDecisionReceived {
        /// Procurement verdict
        approved: bool,
        /// Free-text notes from the reviewer
        notes: Box<str>,
    },
    /// `final-approval.received`
    #[serde(rename = "final-approval.received")]
    FinalApprovalReceived {
        /// Final sign-off verdict
        approved: bool,
        /// Who signed off
        decided_by: Box<str>,
    },
    /// `recovery-decision.received`
    #[serde(rename = "recovery-decision.received")]
    RecoveryDecisionReceived {
        /// Ticket the decision applies to
        ticket_id: u64,
        /// What to do with the failed step
        action: RecoveryAction,
        /// Operator who decided
        decided_by: Box<str>,
    },
    /// `saga.terminate` (kill switch)
    #[serde(rename = "saga.terminate")]
    Terminate {
        /// Why the saga is being terminated
        reason: Box<str>,
        /// Operator who pulled the switch
        decided_by: Box<str>,
    },
}

impl SignalPayload {
    /// The wire name this payload arrives under
    pub fn signal_name(&self) -> &'static str {
        match self {
            Self::FacilityFormSubmitted { .. } => "facility-form.submitted",
            Self::QuoteApproved { .. } => "quote.approved",
            Self::QuoteSigned { .. } => "quote.signed",
            Self::ContractSigned { .. } => "contract.signed",
            Self::MandateDocumentsSubmitted { .. } => "mandate-documents.submitted",
            Self::FicaDocumentsReceived { .. } => "fica-documents.received",
            Self::RiskDecisionReceived { .. } => "risk-decision.received",
            Self::ProcurementDecisionReceived { .. } => "procurement-decision.received",
            Self::FinalApprovalReceived { .. } => "final-approval.received",
            Self::RecoveryDecisionReceived { .. } => "recovery-decision.received",
            Self::Terminate { .. } => "saga.terminate",
        }
    }
}

/// Signals the saga emits for downstream consumers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum EmittedSignal {
    /// `business-type.determined`
    #[serde(rename = "business-type.determined")]
    BusinessTypeDetermined {
        /// Business type derived from the facility form
        business_type: Box<str>,
    },
    /// `documents.requested`
    #[serde(rename = "documents.requested")]
    DocumentsRequested {
        /// Which document sets were requested
        document_sets: Vec<Box<str>>,
    },
    /// `analysis.completed`
    #[serde(rename = "analysis.completed")]
    AnalysisCompleted {
        /// Aggregated recommendation of the analysis stage
        recommendation: crate::risk::Recommendation,
    },
    /// `saga.terminated`
    #[serde(rename = "saga.terminated")]
    SagaTerminated {
        /// Why the saga terminated
        reason: Box<str>,
    },
}

impl EmittedSignal {
    /// The wire name this signal is published under
    pub fn signal_name(&self) -> &'static str {
        match self {
            Self::BusinessTypeDetermined { .. } => "business-type.determined",
            Self::DocumentsRequested { .. } => "documents.requested",
            Self::AnalysisCompleted { .. } => "analysis.completed",
            Self::SagaTerminated { .. } => "saga.terminated",
        }
    }
}

/// Events stored in the saga's append-only journal.
///
/// The journal is the durable record: replaying it reconstructs the saga's
/// stage, status, memoized step outputs, open ticket and kill-switch state
/// after a process restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SagaEvent {
    /// Saga created. Carries the full context so a restarted process can
    /// resume the saga from the journal alone.
    SagaStarted {
        /// Correlation context the saga started with
        context: SagaContext,
    },
    /// Sequencer entered a stage
    StageEntered {
        /// Stage number entered
        stage: u8,
        /// When the stage was entered
        entered_at_millis: u64,
    },
    /// Instance status changed
    StatusChanged {
        /// New status
        status: SagaStatus,
    },
    /// An idempotent step began executing
    StepStarted {
        /// Step identifier
        step_id: Box<str>,
        /// Attempt number (0 = first)
        attempt: u32,
        /// When the attempt started
        started_at_millis: u64,
    },
    /// A step completed; its output is memoized against `step_id`
    StepCompleted {
        /// Step identifier
        step_id: Box<str>,
        /// Serialized step output, replayed instead of re-running
        output: serde_json::Value,
        /// When the step completed
        completed_at_millis: u64,
    },
    /// A step attempt failed (never memoized; a retry re-runs it)
    StepFailed {
        /// Step identifier
        step_id: Box<str>,
        /// Failure reason
        error: Box<str>,
        /// Whether this was a compliance veto
        veto: bool,
        /// When the attempt failed
        failed_at_millis: u64,
    },
    /// An operator chose `continue`; the step's result is absent
    StepSkipped {
        /// Step identifier
        step_id: Box<str>,
        /// Ticket that authorized the skip
        ticket_id: u64,
    },
    /// An external signal was delivered to this saga
    SignalReceived {
        /// Payload as received
        payload: SignalPayload,
        /// When the signal arrived
        received_at_millis: u64,
    },
    /// A pending wait took a journaled signal off its queue. Replay uses
    /// these to compute which received signals are still unconsumed.
    SignalConsumed {
        /// Signal name the wait resolved under
        signal_name: Box<str>,
        /// When the signal was taken
        consumed_at_millis: u64,
    },
    /// A wait elapsed without its signal
    SignalTimedOut {
        /// Signal name that never arrived
        signal_name: Box<str>,
        /// How long the saga waited
        waited_millis: u64,
    },
    /// The saga published a signal
    SignalEmitted {
        /// Payload as published
        payload: EmittedSignal,
    },
    /// The kill switch was pulled (at most once per saga)
    KillSwitchTriggered {
        /// Reason recorded on the switch
        reason: Box<str>,
        /// Operator or policy that pulled it
        decided_by: Box<str>,
        /// When it was pulled
        triggered_at_millis: u64,
    },
    /// A recovery ticket was opened for a failed step
    TicketOpened {
        /// Ticket identifier
        ticket_id: u64,
        /// Failed step
        step_id: Box<str>,
        /// Stage the failure occurred in
        stage: u8,
        /// Failure reason shown to the operator
        error: Box<str>,
    },
    /// An open recovery ticket was resolved
    TicketResolved {
        /// Ticket identifier
        ticket_id: u64,
        /// Operator decision
        action: RecoveryAction,
    },
    /// The analysis stage recorded its aggregated decision
    DecisionRecorded {
        /// Immutable decision stored against the saga
        decision: AggregatedDecision,
    },
    /// The saga reached a terminal status
    SagaEnded {
        /// Structured terminal result
        outcome: TerminalOutcome,
    },
}

impl SagaEvent {
    /// Short event type tag, used for logging and dedup keys
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SagaStarted { .. } => "saga_started",
            Self::StageEntered { .. } => "stage_entered",
            Self::StatusChanged { .. } => "status_changed",
            Self::StepStarted { .. } => "step_started",
            Self::StepCompleted { .. } => "step_completed",
            Self::StepFailed { .. } => "step_failed",
            Self::StepSkipped { .. } => "step_skipped",
            Self::SignalReceived { .. } => "signal_received",
            Self::SignalConsumed { .. } => "signal_consumed",
            Self::SignalTimedOut { .. } => "signal_timed_out",
            Self::SignalEmitted { .. } => "signal_emitted",
            Self::KillSwitchTriggered { .. } => "kill_switch_triggered",
            Self::TicketOpened { .. } => "ticket_opened",
            Self::TicketResolved { .. } => "ticket_resolved",
            Self::DecisionRecorded { .. } => "decision_recorded",
            Self::SagaEnded { .. } => "saga_ended",
        }
    }
}
