//! External collaborators, specified at their interface boundary
//!
//! The concrete bodies of these calls (email delivery, the check scorers,
//! the downstream client system) live outside this crate. Steps call them
//! through these traits; tests use the recording implementations.

use crate::risk::{FinancialRiskOutcome, SanctionsOutcome, ValidationOutcome};
use crate::{ApplicantId, SagaContext, SagaId, StepFailure};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Kind of applicant-facing form a link points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormKind {
    /// Quote review and signature
    QuoteSignature,
    /// Facility application form
    FacilityApplication,
    /// Mandate / FICA document upload
    MandateDocuments,
}

/// Kind of internal notification raised against a saga
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A failed step needs an operator decision
    RecoveryRequired,
    /// The analysis verdict needs a human reviewer
    ReviewRequired,
    /// A signal wait expired
    Timeout,
    /// The saga was terminated
    Terminated,
}

/// Outbound notifications and applicant mail
pub trait Notifier: Send + Sync + 'static {
    /// Raise a notification against the saga. `actionable` notifications
    /// carry operator quick actions (approve / reject / resolve).
    fn create_notification(
        &self,
        saga_id: SagaId,
        kind: NotificationKind,
        title: &str,
        message: &str,
        actionable: bool,
    );

    /// Send the applicant a link to a form
    fn send_applicant_link(&self, email: &str, form: FormKind, url: &str);

    /// Alert the internal operations channel
    fn send_internal_alert(&self, title: &str, message: &str, saga_id: SagaId);
}

/// Output of the ITC (credit bureau) check run during quoting
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItcOutcome {
    /// Bureau score 0-100
    pub score: u8,
    /// The applicant is on the blacklist (compliance hard-stop)
    pub blacklisted: bool,
}

/// The black-box check scorers
pub trait CheckRunner: Send + Sync + 'static {
    /// Credit bureau check, run before quoting
    fn itc_check(&self, applicant: ApplicantId) -> Result<ItcOutcome, StepFailure>;

    /// Document validation over the submitted mandate/FICA documents
    fn validate_documents(&self, ctx: &SagaContext) -> Result<ValidationOutcome, StepFailure>;

    /// Financial risk scoring over bank statements
    fn financial_risk(&self, ctx: &SagaContext) -> Result<FinancialRiskOutcome, StepFailure>;

    /// Sanctions / PEP / adverse media screening
    fn sanctions_screening(&self, ctx: &SagaContext) -> Result<SanctionsOutcome, StepFailure>;
}

/// Quote produced during stage 1
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Quote {
    /// Quote reference shared with the applicant
    pub reference: Box<str>,
    /// Facility amount quoted
    pub facility_amount: u64,
    /// Discount rate in basis points
    pub rate_bps: u32,
}

/// Mandate details handed to the downstream client system on activation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MandateInfo {
    /// Business type determined from the facility form
    pub business_type: Box<str>,
    /// Facility amount from the signed quote
    pub facility_amount: u64,
    /// Executed contract reference
    pub contract_reference: Box<str>,
}

/// Downstream systems the saga writes into
pub trait DownstreamSystem: Send + Sync + 'static {
    /// Price a facility for the applicant. `itc` is absent when an operator
    /// skipped the bureau check; pricing without bureau data is the pricing
    /// system's call.
    fn generate_quote(
        &self,
        ctx: &SagaContext,
        itc: Option<&ItcOutcome>,
        facility_amount: u64,
    ) -> Result<Quote, StepFailure>;

    /// Create the client record in the downstream system, returning its
    /// reference
    fn create_client(&self, saga_id: SagaId, mandate: &MandateInfo)
        -> Result<Box<str>, StepFailure>;
}

/// Bundle of collaborators injected into a saga runner
#[derive(Clone)]
pub struct Effects {
    /// Notifications and applicant mail
    pub notifier: Arc<dyn Notifier>,
    /// Check scorers
    pub checks: Arc<dyn CheckRunner>,
    /// Downstream systems
    pub downstream: Arc<dyn DownstreamSystem>,
}

// === Recording implementations for tests ===

/// One recorded notification
#[derive(Clone, Debug)]
pub struct RecordedNotification {
    /// Saga it was raised against
    pub saga_id: SagaId,
    /// Notification kind
    pub kind: NotificationKind,
    /// Title shown to the operator
    pub title: Box<str>,
    /// Whether it carried quick actions
    pub actionable: bool,
}

/// Notifier that records every call, for tests
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<RecordedNotification>>,
    links: Mutex<Vec<(Box<str>, FormKind)>>,
    alerts: Mutex<Vec<Box<str>>>,
}

impl RecordingNotifier {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications recorded so far
    pub fn notifications(&self) -> Vec<RecordedNotification> {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Applicant links sent so far
    pub fn links(&self) -> Vec<(Box<str>, FormKind)> {
        self.links.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Internal alerts raised so far
    pub fn alerts(&self) -> Vec<Box<str>> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn create_notification(
        &self,
        saga_id: SagaId,
        kind: NotificationKind,
        title: &str,
        _message: &str,
        actionable: bool,
    ) {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedNotification {
                saga_id,
                kind,
                title: title.into(),
                actionable,
            });
    }

    fn send_applicant_link(&self, email: &str, form: FormKind, _url: &str) {
        self.links
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((email.into(), form));
    }

    fn send_internal_alert(&self, title: &str, _message: &str, _saga_id: SagaId) {
        self.alerts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(title.into());
    }
}

/// Check runner returning pre-configured outcomes, for tests
pub struct StaticChecks {
    /// ITC outcome to return
    pub itc: ItcOutcome,
    /// Validation outcome to return
    pub validation: ValidationOutcome,
    /// Financial risk outcome to return
    pub risk: FinancialRiskOutcome,
    /// Sanctions outcome to return
    pub sanctions: SanctionsOutcome,
}

impl StaticChecks {
    /// Outcomes that sail through every stage
    pub fn all_clear() -> Self {
        Self {
            itc: ItcOutcome {
                score: 82,
                blacklisted: false,
            },
            validation: ValidationOutcome {
                score: 95,
                summary: crate::risk::ValidationSummary::Proceed,
                failed_documents: 0,
            },
            risk: FinancialRiskOutcome {
                score: 88,
                recommendation: crate::risk::RiskRecommendation::Approve,
                bounced_transactions: false,
                gambling_indicators: false,
                conditions: Vec::new(),
            },
            sanctions: SanctionsOutcome {
                risk_level: crate::risk::SanctionsRiskLevel::Clear,
                recommendation: crate::risk::SanctionsRecommendation::Proceed,
                list_match: false,
                pep: false,
                adverse_media_alerts: 0,
                review_required: false,
            },
        }
    }
}

impl CheckRunner for StaticChecks {
    fn itc_check(&self, _applicant: ApplicantId) -> Result<ItcOutcome, StepFailure> {
        Ok(self.itc.clone())
    }

    fn validate_documents(&self, _ctx: &SagaContext) -> Result<ValidationOutcome, StepFailure> {
        Ok(self.validation.clone())
    }

    fn financial_risk(&self, _ctx: &SagaContext) -> Result<FinancialRiskOutcome, StepFailure> {
        Ok(self.risk.clone())
    }

    fn sanctions_screening(&self, _ctx: &SagaContext) -> Result<SanctionsOutcome, StepFailure> {
        Ok(self.sanctions.clone())
    }
}

/// Downstream system that records calls and succeeds, for tests
#[derive(Default)]
pub struct RecordingDownstream {
    clients: Mutex<Vec<(SagaId, MandateInfo)>>,
    /// When set, `create_client` fails this many times before succeeding
    fail_creates: Mutex<u32>,
}

impl RecordingDownstream {
    /// Create a recorder that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` `create_client` calls fail
    pub fn fail_next_creates(&self, n: u32) {
        *self.fail_creates.lock().unwrap_or_else(|e| e.into_inner()) = n;
    }

    /// Clients created so far
    pub fn clients(&self) -> Vec<(SagaId, MandateInfo)> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl DownstreamSystem for RecordingDownstream {
    fn generate_quote(
        &self,
        ctx: &SagaContext,
        _itc: Option<&ItcOutcome>,
        facility_amount: u64,
    ) -> Result<Quote, StepFailure> {
        Ok(Quote {
            reference: format!("Q-{}", ctx.saga_id).into(),
            facility_amount,
            rate_bps: 250,
        })
    }

    fn create_client(
        &self,
        saga_id: SagaId,
        mandate: &MandateInfo,
    ) -> Result<Box<str>, StepFailure> {
        {
            let mut remaining = self.fail_creates.lock().unwrap_or_else(|e| e.into_inner());
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StepFailure::recoverable("downstream system unavailable"));
            }
        }
        self.clients
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((saga_id, mandate.clone()));
        Ok(format!("CLI-{}", saga_id).into())
    }
}
