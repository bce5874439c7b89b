//! Risk aggregation engine
//!
//! Combines the three independent check outputs (document validation,
//! financial risk, sanctions/PEP screening) into one decision. The engine is
//! pure: same inputs, same [`AggregatedDecision`], no I/O, no clock.

use serde::{Deserialize, Serialize};

/// Weight of the validation score in the aggregate
const VALIDATION_WEIGHT: f64 = 0.25;
/// Weight of the financial-risk score in the aggregate
const RISK_WEIGHT: f64 = 0.45;
/// Weight of the sanctions score in the aggregate
const SANCTIONS_WEIGHT: f64 = 0.30;

/// Summary verdict of the document-validation check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationSummary {
    /// Documents are in order
    Proceed,
    /// A reviewer must look at the documents
    ReviewRequired,
}

/// Output of the document-validation check (black-box scorer)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Score 0-100
    pub score: u8,
    /// Summary verdict
    pub summary: ValidationSummary,
    /// Number of documents that failed validation
    pub failed_documents: u32,
}

/// Recommendation of the financial-risk check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRecommendation {
    /// Approve the facility
    Approve,
    /// Route to a human reviewer
    ManualReview,
    /// Decline the facility
    Decline,
}

/// Output of the financial-risk check (black-box scorer)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinancialRiskOutcome {
    /// Score 0-100
    pub score: u8,
    /// Recommendation
    pub recommendation: RiskRecommendation,
    /// Bounced transactions were observed in the bank statements
    pub bounced_transactions: bool,
    /// Gambling indicators were observed
    pub gambling_indicators: bool,
    /// Conditions to attach if the facility proceeds
    pub conditions: Vec<Box<str>>,
}

/// Sanctions screening risk level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SanctionsRiskLevel {
    /// Confirmed sanctions hit
    Blocked,
    /// High risk
    High,
    /// Medium risk
    Medium,
    /// Low risk
    Low,
    /// No findings
    Clear,
}

impl SanctionsRiskLevel {
    /// Map the risk level to its score band
    pub fn score_band(&self) -> u8 {
        match self {
            Self::Blocked => 0,
            Self::High => 30,
            Self::Medium => 60,
            Self::Low => 80,
            Self::Clear => 100,
        }
    }
}

/// Recommendation of the sanctions screening
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SanctionsRecommendation {
    /// Nothing stands in the way
    Proceed,
    /// A compliance reviewer must look
    Review,
    /// Hard stop
    Block,
}

/// Output of the sanctions/PEP screening (black-box scorer)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanctionsOutcome {
    /// Risk level, mapped to a score band for aggregation
    pub risk_level: SanctionsRiskLevel,
    /// Recommendation
    pub recommendation: SanctionsRecommendation,
    /// An unambiguous sanctions-list match exists
    pub list_match: bool,
    /// The applicant is a politically exposed person
    pub pep: bool,
    /// Number of adverse-media alerts
    pub adverse_media_alerts: u32,
    /// Screening flagged the case for review
    pub review_required: bool,
}

/// Final recommendation of the aggregation policy
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    /// No human involvement needed
    AutoApprove,
    /// Proceed, carrying the risk check's conditions
    ProceedWithConditions,
    /// Route to the review stage
    ManualReview,
    /// Compliance hard stop; never overridable by score
    Block,
}

/// Immutable output of the risk engine, stored against the saga.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedDecision {
    /// Validation score used (100 when no documents were presented)
    pub validation_score: u8,
    /// Financial-risk score used
    pub risk_score: u8,
    /// Sanctions score band used
    pub sanctions_score: u8,
    /// Weighted aggregate, rounded
    pub aggregated_score: u8,
    /// Policy verdict
    pub recommendation: Recommendation,
    /// Human-readable reasons, collected independently of the verdict so a
    /// reviewer always sees why
    pub flags: Vec<Box<str>>,
    /// Conditions carried forward from the risk check
    pub conditions: Vec<Box<str>>,
}

/// Combine the three check outputs into one decision.
///
/// Validation is optional: some stages have no documents to validate yet,
/// in which case the validation score is 100 and validation counts as clean.
/// The policy is evaluated in strict order, first match wins.
pub fn aggregate(
    validation: Option<&ValidationOutcome>,
    risk: &FinancialRiskOutcome,
    sanctions: &SanctionsOutcome,
) -> AggregatedDecision {
    let validation_score = validation.map_or(100, |v| v.score);
    let risk_score = risk.score;
    let sanctions_score = sanctions.risk_level.score_band();

    let aggregated_score = (f64::from(validation_score) * VALIDATION_WEIGHT
        + f64::from(risk_score) * RISK_WEIGHT
        + f64::from(sanctions_score) * SANCTIONS_WEIGHT)
        .round() as u8;

    let flags = collect_flags(validation, risk, sanctions);

    let sanctions_blocked =
        sanctions.risk_level == SanctionsRiskLevel::Blocked || sanctions.list_match;

    let all_clean = validation.map_or(true, |v| v.summary == ValidationSummary::Proceed)
        && risk.recommendation == RiskRecommendation::Approve
        && sanctions.recommendation == SanctionsRecommendation::Proceed
        && !sanctions.pep
        && sanctions.adverse_media_alerts == 0;

    let review_flagged = matches!(
        risk.recommendation,
        RiskRecommendation::ManualReview | RiskRecommendation::Decline
    ) || risk.bounced_transactions
        || risk.gambling_indicators
        || sanctions.review_required
        || validation.is_some_and(|v| v.summary == ValidationSummary::ReviewRequired);

    let recommendation = if sanctions_blocked {
        Recommendation::Block
    } else if all_clean {
        Recommendation::AutoApprove
    } else if review_flagged {
        Recommendation::ManualReview
    } else {
        Recommendation::ProceedWithConditions
    };

    let conditions = if recommendation == Recommendation::ProceedWithConditions {
        risk.conditions.clone()
    } else {
        Vec::new()
    };

    AggregatedDecision {
        validation_score,
        risk_score,
        sanctions_score,
        aggregated_score,
        recommendation,
        flags,
        conditions,
    }
}

fn collect_flags(
    validation: Option<&ValidationOutcome>,
    risk: &FinancialRiskOutcome,
    sanctions: &SanctionsOutcome,
) -> Vec<Box<str>> {
    let mut flags = Vec::new();
    if risk.bounced_transactions {
        flags.push("bounced transactions observed".into());
    }
    if risk.gambling_indicators {
        flags.push("gambling indicators observed".into());
    }
    if sanctions.pep {
        flags.push("applicant is a politically exposed person".into());
    }
    if sanctions.list_match {
        flags.push("unambiguous sanctions-list match".into());
    }
    if sanctions.adverse_media_alerts > 0 {
        flags.push(
            format!(
                "{} adverse-media alert(s)",
                sanctions.adverse_media_alerts
            )
            .into(),
        );
    }
    if let Some(v) = validation {
        if v.failed_documents > 0 {
            flags.push(format!("{} document(s) failed validation", v.failed_documents).into());
        }
    }
    flags
}
