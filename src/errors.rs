//! Error taxonomy for saga execution

use serde::{Deserialize, Serialize};

/// Failure raised inside a single step.
///
/// The classification decides the recovery path: a `Veto` fails the saga
/// immediately and never reaches a human queue, everything else goes
/// through the human-in-the-loop recovery protocol.
#[derive(Clone, Debug, Serialize, Deserialize, thiserror::Error)]
pub enum StepFailure {
    /// Compliance hard-stop (blacklist hit, policy block). Non-retriable.
    #[error("veto: {reason}")]
    Veto {
        /// Why the step vetoed the saga
        reason: Box<str>,
    },
    /// Any other step error. Recoverable via an operator decision.
    #[error("step failed: {reason}")]
    Recoverable {
        /// Error description
        reason: Box<str>,
    },
}

impl StepFailure {
    /// Compliance hard-stop with the given reason
    pub fn veto(reason: impl Into<Box<str>>) -> Self {
        Self::Veto {
            reason: reason.into(),
        }
    }

    /// Recoverable failure with the given reason
    pub fn recoverable(reason: impl Into<Box<str>>) -> Self {
        Self::Recoverable {
            reason: reason.into(),
        }
    }

    /// Check if this failure may enter human recovery
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable { .. })
    }

    /// The failure reason
    pub fn reason(&self) -> &str {
        match self {
            Self::Veto { reason } | Self::Recoverable { reason } => reason,
        }
    }
}

/// Terminal status a saga can end in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// All stages ran to completion
    Completed,
    /// Veto, policy block, kill switch, or operator cancellation
    Failed,
    /// A signal wait exceeded its deadline
    Timeout,
}

/// Structured terminal result `{status, stage, reason}` surfaced verbatim
/// to operators. Produced exactly once per saga.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TerminalOutcome {
    /// How the saga ended
    pub status: TerminalStatus,
    /// Stage the saga was in when it ended
    pub stage: u8,
    /// Human-readable reason
    pub reason: Box<str>,
}

impl TerminalOutcome {
    /// Successful completion at the given stage
    pub fn completed(stage: u8) -> Self {
        Self {
            status: TerminalStatus::Completed,
            stage,
            reason: "onboarding completed".into(),
        }
    }

    /// Failure at the given stage
    pub fn failed(stage: u8, reason: impl Into<Box<str>>) -> Self {
        Self {
            status: TerminalStatus::Failed,
            stage,
            reason: reason.into(),
        }
    }

    /// Timed-out wait at the given stage
    pub fn timed_out(stage: u8, reason: impl Into<Box<str>>) -> Self {
        Self {
            status: TerminalStatus::Timeout,
            stage,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for TerminalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} at stage {}: {}", self.status, self.stage, self.reason)
    }
}

/// Errors surfaced by the saga runtime itself (journal access, malformed
/// memoized outputs, illegal state transitions).
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// Journal backend failure
    #[error(transparent)]
    Journal(#[from] crate::journal::JournalError),
    /// A memoized step output could not be decoded
    #[error("corrupt memoized output for step '{step_id}': {source}")]
    CorruptStepOutput {
        /// Step whose cached output failed to decode
        step_id: Box<str>,
        /// Decode error
        #[source]
        source: serde_json::Error,
    },
    /// A stage attempted an illegal instance transition
    #[error("illegal transition: {0}")]
    IllegalTransition(Box<str>),
}
