//! Saga identity and correlation types

use serde::{Deserialize, Serialize};

/// Unique identifier for one onboarding saga instance.
///
/// Doubles as the correlation key: every external signal carries the
/// `SagaId` it is addressed to, and a wait only ever resolves against
/// its own id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SagaId(pub u64);

impl SagaId {
    /// Create a new saga ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Debug for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SagaId({})", self.0)
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the applicant (commercial client) being onboarded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApplicantId(pub u64);

impl std::fmt::Debug for ApplicantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApplicantId({})", self.0)
    }
}

impl std::fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation context threaded through every step of a saga.
#[derive(Clone, Serialize, Deserialize)]
pub struct SagaContext {
    /// Unique saga execution identifier (also the correlation key)
    pub saga_id: SagaId,
    /// Applicant this saga onboards
    pub applicant_id: ApplicantId,
    /// Applicant contact address used for outbound links
    pub applicant_email: Box<str>,
    /// Facility amount requested with the initial applicant details
    pub requested_facility: u64,
    /// Current stage number (1-based, monotonically non-decreasing)
    pub stage: u8,
    /// Retry attempt number for the current step (0 = first attempt)
    pub attempt: u32,
    /// When the saga started (millis since UNIX epoch)
    pub saga_started_at_millis: u64,
}

impl SagaContext {
    /// Get current time in milliseconds since UNIX epoch
    pub fn now_millis() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Create a context for a fresh saga starting now
    pub fn new(
        saga_id: SagaId,
        applicant_id: ApplicantId,
        applicant_email: &str,
        requested_facility: u64,
    ) -> Self {
        Self {
            saga_id,
            applicant_id,
            applicant_email: applicant_email.into(),
            requested_facility,
            stage: 1,
            attempt: 0,
            saga_started_at_millis: Self::now_millis(),
        }
    }

    /// Create a context for the given stage
    pub fn at_stage(&self, stage: u8) -> Self {
        Self {
            stage,
            attempt: 0,
            ..self.clone()
        }
    }

    /// Create a context for a retry attempt of the current step
    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    /// Elapsed time since the saga started
    pub fn elapsed_millis(&self) -> u64 {
        Self::now_millis().saturating_sub(self.saga_started_at_millis)
    }
}

impl std::fmt::Debug for SagaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaContext")
            .field("saga_id", &self.saga_id)
            .field("applicant_id", &self.applicant_id)
            .field("stage", &self.stage)
            .field("attempt", &self.attempt)
            .finish()
    }
}
