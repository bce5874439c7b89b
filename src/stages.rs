//! The six onboarding stages
//!
//! Each stage body is a straight-line procedure over the stage context:
//! guarded steps for side effects, signal waits for the humans, parallel
//! joins where the work is independent. A body returns [`StageFlow`] to
//! hand control back to the sequencer, or a terminal outcome to end the
//! saga.

use crate::branch::{join, Branch, BranchOutcome, JoinReport};
use crate::effects::{FormKind, MandateInfo, NotificationKind, Quote};
use crate::events::{EmittedSignal, SagaEvent, SignalPayload};
use crate::risk::{
    aggregate, FinancialRiskOutcome, Recommendation, RiskRecommendation, SanctionsOutcome,
    ValidationOutcome, ValidationSummary,
};
use crate::sequencer::{StageCtx, StageFlow};
use crate::{SagaError, StepFailure, TerminalOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// Step ids read back by later stages
const STEP_QUOTE: &str = "stage1:generate-quote";
const STEP_BUSINESS_TYPE: &str = "stage2:determine-business-type";
const STEP_CONTRACT: &str = "stage3:record-contract";
const STEP_VALIDATION: &str = "stage4:validate-documents";
const STEP_FINANCIAL_RISK: &str = "stage4:financial-risk";
const STEP_SANCTIONS: &str = "stage4:sanctions-screening";

/// Run one stage of the fixed graph.
pub(crate) async fn run_stage(
    ctx: &Arc<StageCtx>,
    stage: u8,
) -> Result<StageFlow, TerminalOutcome> {
    match stage {
        1 => quoting(ctx).await,
        2 => facility_application(ctx).await,
        3 => contract_and_mandate(ctx).await,
        4 => analysis(ctx).await,
        5 => review(ctx).await,
        6 => activation(ctx).await,
        other => Err(TerminalOutcome::failed(
            other,
            format!("no such stage: {other}"),
        )),
    }
}

/// Business profile derived from the facility application form.
///
/// The declared business type is normalized here once; everything after
/// stage 2 reads this profile from the journal rather than re-parsing the
/// form payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct BusinessProfile {
    /// Normalized business type
    pub business_type: Box<str>,
    /// Facility amount from the form
    pub facility_amount: u64,
}

impl BusinessProfile {
    fn classify(declared: &str, facility_amount: u64) -> Self {
        Self {
            business_type: declared.trim().to_ascii_lowercase().into(),
            facility_amount,
        }
    }

    /// Document sets the mandate pack must contain for this business type
    fn document_sets(&self) -> Vec<Box<str>> {
        let mut sets: Vec<Box<str>> = vec!["mandate".into(), "fica".into()];
        if self.business_type.contains("pty") || self.business_type.contains("ltd") {
            sets.push("company-registration".into());
        }
        sets
    }
}

fn infra(error: SagaError) -> StepFailure {
    StepFailure::recoverable(error.to_string())
}

fn unexpected_payload(ctx: &StageCtx, payload: &SignalPayload) -> TerminalOutcome {
    TerminalOutcome::failed(
        ctx.current_stage(),
        format!("unexpected payload under '{}'", payload.signal_name()),
    )
}

/// Fail the stage if the join was cut short by the kill switch or a
/// terminating branch; otherwise hand the report back.
fn conclude(ctx: &StageCtx, report: JoinReport) -> Result<JoinReport, TerminalOutcome> {
    if report.kill_switch_triggered {
        return Err(ctx.kill_outcome());
    }
    if let Some(outcome) = report.first_terminal() {
        return Err(outcome);
    }
    Ok(report)
}

// === Stage 1: quoting ===
//
// ITC check (veto on blacklist), quote generation, applicant signature.

async fn quoting(ctx: &Arc<StageCtx>) -> Result<StageFlow, TerminalOutcome> {
    let checks = Arc::clone(&ctx.effects.checks);
    let applicant = ctx.context.applicant_id;
    let itc = ctx
        .guard("itc-check", || {
            let checks = Arc::clone(&checks);
            async move {
                let outcome = checks.itc_check(applicant)?;
                if outcome.blacklisted {
                    return Err(StepFailure::veto("applicant is on the ITC blacklist"));
                }
                Ok(outcome)
            }
        })
        .await?;

    let downstream = Arc::clone(&ctx.effects.downstream);
    let context = ctx.context.clone();
    let quote = ctx
        .guard("generate-quote", || {
            let downstream = Arc::clone(&downstream);
            let context = context.clone();
            let itc = itc.clone();
            async move {
                downstream.generate_quote(&context, itc.as_ref(), context.requested_facility)
            }
        })
        .await?;

    if let Some(quote) = &quote {
        let notifier = Arc::clone(&ctx.effects.notifier);
        let email = ctx.context.applicant_email.clone();
        let url: Box<str> = format!("/onboarding/quotes/{}", quote.reference).into();
        let _ = ctx
            .guard("send-quote-link", || {
                let notifier = Arc::clone(&notifier);
                let email = email.clone();
                let url = url.clone();
                async move {
                    notifier.send_applicant_link(&email, FormKind::QuoteSignature, &url);
                    Ok(())
                }
            })
            .await?;
    }

    ctx.await_signal("quote.approved", ctx.config.quote_approval())
        .await?;
    ctx.await_signal("quote.signed", ctx.config.quote_signature())
        .await?;

    Ok(StageFlow::Next(2))
}

// === Stage 2: facility application ===

async fn facility_application(ctx: &Arc<StageCtx>) -> Result<StageFlow, TerminalOutcome> {
    let notifier = Arc::clone(&ctx.effects.notifier);
    let email = ctx.context.applicant_email.clone();
    let _ = ctx
        .guard("send-facility-form-link", || {
            let notifier = Arc::clone(&notifier);
            let email = email.clone();
            async move {
                notifier.send_applicant_link(
                    &email,
                    FormKind::FacilityApplication,
                    "/onboarding/forms/facility",
                );
                Ok(())
            }
        })
        .await?;

    let payload = ctx
        .await_signal("facility-form.submitted", ctx.config.facility_form())
        .await?;
    let (business_type, facility_amount) = match payload {
        SignalPayload::FacilityFormSubmitted {
            business_type,
            facility_amount,
        } => (business_type, facility_amount),
        other => return Err(unexpected_payload(ctx, &other)),
    };

    let substrate = Arc::clone(&ctx.substrate);
    let saga_id = ctx.saga_id();
    let _ = ctx
        .guard("determine-business-type", || {
            let substrate = Arc::clone(&substrate);
            let business_type = business_type.clone();
            async move {
                let profile = BusinessProfile::classify(&business_type, facility_amount);
                substrate.emit_signal(
                    saga_id,
                    EmittedSignal::BusinessTypeDetermined {
                        business_type: profile.business_type.clone(),
                    },
                );
                Ok(profile)
            }
        })
        .await?;

    Ok(StageFlow::Next(3))
}

// === Stage 3: contract & mandate (parallel) ===

async fn contract_and_mandate(ctx: &Arc<StageCtx>) -> Result<StageFlow, TerminalOutcome> {
    ctx.check_kill()?;

    let contract = {
        let ctx = Arc::clone(ctx);
        Branch::new("contract", async move {
            let result = contract_branch(&ctx).await;
            BranchOutcome::from_result(&ctx.kill, result)
        })
    };
    let documents = {
        let ctx = Arc::clone(ctx);
        Branch::new("documents", async move {
            let result = documents_branch(&ctx).await;
            BranchOutcome::from_result(&ctx.kill, result)
        })
    };

    conclude(ctx, join(&ctx.kill, vec![contract, documents]).await)?;
    Ok(StageFlow::Next(4))
}

async fn contract_branch(ctx: &Arc<StageCtx>) -> Result<BranchOutcome, TerminalOutcome> {
    let payload = ctx
        .await_signal("contract.signed", ctx.config.contract_signature())
        .await?;
    let reference = match payload {
        SignalPayload::ContractSigned { contract_reference } => contract_reference,
        other => return Err(unexpected_payload(ctx, &other)),
    };

    // Memoize the reference so activation can read it behind the join
    let _ = ctx
        .guard("record-contract", || {
            let reference = reference.clone();
            async move { Ok(reference) }
        })
        .await?;

    Ok(BranchOutcome::Cleared)
}

async fn documents_branch(ctx: &Arc<StageCtx>) -> Result<BranchOutcome, TerminalOutcome> {
    let substrate = Arc::clone(&ctx.substrate);
    let notifier = Arc::clone(&ctx.effects.notifier);
    let email = ctx.context.applicant_email.clone();
    let saga_id = ctx.saga_id();
    let _ = ctx
        .guard("request-documents", || {
            let substrate = Arc::clone(&substrate);
            let notifier = Arc::clone(&notifier);
            let email = email.clone();
            async move {
                let profile: Option<BusinessProfile> = substrate
                    .step_output(saga_id, STEP_BUSINESS_TYPE)
                    .map_err(infra)?;
                let document_sets = profile
                    .map(|p| p.document_sets())
                    .unwrap_or_else(|| vec!["mandate".into(), "fica".into()]);
                notifier.send_applicant_link(
                    &email,
                    FormKind::MandateDocuments,
                    "/onboarding/forms/mandate-documents",
                );
                substrate.emit_signal(saga_id, EmittedSignal::DocumentsRequested { document_sets });
                Ok(())
            }
        })
        .await?;

    ctx.await_signal("mandate-documents.submitted", ctx.config.document_collection())
        .await?;
    ctx.await_signal("fica-documents.received", ctx.config.document_collection())
        .await?;

    Ok(BranchOutcome::Cleared)
}

// === Stage 4: analysis (parallel checks + aggregation) ===

async fn analysis(ctx: &Arc<StageCtx>) -> Result<StageFlow, TerminalOutcome> {
    ctx.check_kill()?;

    let validation = {
        let ctx = Arc::clone(ctx);
        Branch::new("validation", async move {
            let result = validation_branch(&ctx).await;
            BranchOutcome::from_result(&ctx.kill, result)
        })
    };
    let financial = {
        let ctx = Arc::clone(ctx);
        Branch::new("financial-risk", async move {
            let result = financial_risk_branch(&ctx).await;
            BranchOutcome::from_result(&ctx.kill, result)
        })
    };
    let sanctions = {
        let ctx = Arc::clone(ctx);
        Branch::new("sanctions", async move {
            let result = sanctions_branch(&ctx).await;
            BranchOutcome::from_result(&ctx.kill, result)
        })
    };

    let report = conclude(
        ctx,
        join(&ctx.kill, vec![validation, financial, sanctions]).await,
    )?;

    let substrate = Arc::clone(&ctx.substrate);
    let saga_id = ctx.saga_id();
    let decision = ctx
        .guard("aggregate-checks", || {
            let substrate = Arc::clone(&substrate);
            async move {
                let validation: Option<ValidationOutcome> = substrate
                    .step_output(saga_id, STEP_VALIDATION)
                    .map_err(infra)?;
                let risk: Option<FinancialRiskOutcome> = substrate
                    .step_output(saga_id, STEP_FINANCIAL_RISK)
                    .map_err(infra)?;
                let sanctions: Option<SanctionsOutcome> = substrate
                    .step_output(saga_id, STEP_SANCTIONS)
                    .map_err(infra)?;

                let decision = match (risk, sanctions) {
                    (Some(risk), Some(sanctions)) => {
                        let decision = aggregate(validation.as_ref(), &risk, &sanctions);
                        substrate.record_event(
                            saga_id,
                            SagaEvent::DecisionRecorded {
                                decision: decision.clone(),
                            },
                        );
                        substrate.emit_signal(
                            saga_id,
                            EmittedSignal::AnalysisCompleted {
                                recommendation: decision.recommendation,
                            },
                        );
                        Some(decision)
                    }
                    // A skipped check leaves no score to aggregate
                    _ => None,
                };
                Ok(decision)
            }
        })
        .await?;

    match decision.flatten() {
        Some(decision) => match decision.recommendation {
            Recommendation::Block => {
                ctx.effects.notifier.send_internal_alert(
                    "Onboarding blocked by compliance policy",
                    &format!(
                        "Saga {} blocked: {}",
                        ctx.saga_id(),
                        decision.flags.join(", ")
                    ),
                    ctx.saga_id(),
                );
                Err(ctx.trigger_kill("COMPLIANCE_VIOLATION", "risk-policy"))
            }
            Recommendation::AutoApprove if !report.requires_review() => {
                // Straight to activation, nobody needs to look at this one
                Ok(StageFlow::Next(6))
            }
            _ => {
                let message = format!(
                    "Saga {} scored {} ({:?}). Flags: {}",
                    ctx.saga_id(),
                    decision.aggregated_score,
                    decision.recommendation,
                    if decision.flags.is_empty() {
                        "none".to_string()
                    } else {
                        decision.flags.join(", ")
                    }
                );
                request_review(ctx, message).await?;
                Ok(StageFlow::Next(5))
            }
        },
        None => {
            let message = format!(
                "Saga {}: one or more automated checks were skipped by an operator; \
                 review the case by hand.",
                ctx.saga_id()
            );
            request_review(ctx, message).await?;
            Ok(StageFlow::Next(5))
        }
    }
}

async fn request_review(ctx: &Arc<StageCtx>, message: String) -> Result<(), TerminalOutcome> {
    let notifier = Arc::clone(&ctx.effects.notifier);
    let saga_id = ctx.saga_id();
    let _ = ctx
        .guard("request-manual-review", || {
            let notifier = Arc::clone(&notifier);
            let message = message.clone();
            async move {
                notifier.create_notification(
                    saga_id,
                    NotificationKind::ReviewRequired,
                    "Onboarding requires manual review",
                    &message,
                    true,
                );
                Ok(())
            }
        })
        .await?;
    Ok(())
}

async fn validation_branch(ctx: &Arc<StageCtx>) -> Result<BranchOutcome, TerminalOutcome> {
    let checks = Arc::clone(&ctx.effects.checks);
    let context = ctx.context.clone();
    let outcome = ctx
        .guard("validate-documents", || {
            let checks = Arc::clone(&checks);
            let context = context.clone();
            async move { checks.validate_documents(&context) }
        })
        .await?;

    Ok(match outcome {
        Some(v) if v.summary == ValidationSummary::ReviewRequired => BranchOutcome::RequiresReview,
        _ => BranchOutcome::Cleared,
    })
}

async fn financial_risk_branch(ctx: &Arc<StageCtx>) -> Result<BranchOutcome, TerminalOutcome> {
    let checks = Arc::clone(&ctx.effects.checks);
    let context = ctx.context.clone();
    let outcome = ctx
        .guard("financial-risk", || {
            let checks = Arc::clone(&checks);
            let context = context.clone();
            async move { checks.financial_risk(&context) }
        })
        .await?;

    Ok(match outcome {
        Some(r)
            if r.recommendation != RiskRecommendation::Approve
                || r.bounced_transactions
                || r.gambling_indicators =>
        {
            BranchOutcome::RequiresReview
        }
        _ => BranchOutcome::Cleared,
    })
}

async fn sanctions_branch(ctx: &Arc<StageCtx>) -> Result<BranchOutcome, TerminalOutcome> {
    let checks = Arc::clone(&ctx.effects.checks);
    let context = ctx.context.clone();
    let outcome = ctx
        .guard("sanctions-screening", || {
            let checks = Arc::clone(&checks);
            let context = context.clone();
            async move { checks.sanctions_screening(&context) }
        })
        .await?;

    Ok(match outcome {
        Some(s) if s.review_required || s.pep => BranchOutcome::RequiresReview,
        _ => BranchOutcome::Cleared,
    })
}

// === Stage 5: review (parallel decisions, then final approval) ===

async fn review(ctx: &Arc<StageCtx>) -> Result<StageFlow, TerminalOutcome> {
    ctx.check_kill()?;

    let risk = {
        let ctx = Arc::clone(ctx);
        Branch::new("risk-decision", async move {
            let result = decision_branch(&ctx, "risk-decision.received", "risk manager").await;
            BranchOutcome::from_result(&ctx.kill, result)
        })
    };
    let procurement = {
        let ctx = Arc::clone(ctx);
        Branch::new("procurement-decision", async move {
            let result =
                decision_branch(&ctx, "procurement-decision.received", "procurement").await;
            BranchOutcome::from_result(&ctx.kill, result)
        })
    };

    conclude(ctx, join(&ctx.kill, vec![risk, procurement]).await)?;

    let payload = ctx
        .await_signal("final-approval.received", ctx.config.final_approval())
        .await?;
    match payload {
        SignalPayload::FinalApprovalReceived { approved: true, .. } => Ok(StageFlow::Next(6)),
        SignalPayload::FinalApprovalReceived {
            approved: false,
            decided_by,
        } => Err(TerminalOutcome::failed(
            ctx.current_stage(),
            format!("final approval rejected by {decided_by}"),
        )),
        other => Err(unexpected_payload(ctx, &other)),
    }
}

/// One reviewer's verdict. A rejection terminates the stage immediately,
/// abandoning the sibling wait.
async fn decision_branch(
    ctx: &Arc<StageCtx>,
    signal_name: &'static str,
    reviewer: &'static str,
) -> Result<BranchOutcome, TerminalOutcome> {
    let payload = ctx
        .await_signal(signal_name, ctx.config.review_decision())
        .await?;
    let approved = match payload {
        SignalPayload::RiskDecisionReceived { approved, .. }
        | SignalPayload::ProcurementDecisionReceived { approved, .. } => approved,
        other => return Err(unexpected_payload(ctx, &other)),
    };

    if approved {
        Ok(BranchOutcome::Cleared)
    } else {
        Err(TerminalOutcome::failed(
            ctx.current_stage(),
            format!("rejected by {reviewer}"),
        ))
    }
}

// === Stage 6: activation ===

async fn activation(ctx: &Arc<StageCtx>) -> Result<StageFlow, TerminalOutcome> {
    let substrate = Arc::clone(&ctx.substrate);
    let downstream = Arc::clone(&ctx.effects.downstream);
    let saga_id = ctx.saga_id();
    let requested = ctx.context.requested_facility;

    let reference = ctx
        .guard("create-client", || {
            let substrate = Arc::clone(&substrate);
            let downstream = Arc::clone(&downstream);
            async move {
                let profile: Option<BusinessProfile> = substrate
                    .step_output(saga_id, STEP_BUSINESS_TYPE)
                    .map_err(infra)?;
                let quote: Option<Quote> =
                    substrate.step_output(saga_id, STEP_QUOTE).map_err(infra)?;
                let contract: Option<Box<str>> = substrate
                    .step_output(saga_id, STEP_CONTRACT)
                    .map_err(infra)?;

                let facility_amount = profile
                    .as_ref()
                    .map(|p| p.facility_amount)
                    .or_else(|| quote.as_ref().map(|q| q.facility_amount))
                    .unwrap_or(requested);
                let mandate = MandateInfo {
                    business_type: profile
                        .map(|p| p.business_type)
                        .unwrap_or_else(|| "unspecified".into()),
                    facility_amount,
                    contract_reference: contract.unwrap_or_else(|| "on-file".into()),
                };
                downstream.create_client(saga_id, &mandate)
            }
        })
        .await?;

    let notifier = Arc::clone(&ctx.effects.notifier);
    let _ = ctx
        .guard("announce-activation", || {
            let notifier = Arc::clone(&notifier);
            let reference = reference.clone();
            async move {
                let message = match &reference {
                    Some(reference) => format!("Saga {saga_id}: client {reference} is active"),
                    None => format!(
                        "Saga {saga_id}: client creation was skipped by an operator; \
                         activate the client by hand"
                    ),
                };
                notifier.send_internal_alert("Onboarding complete", &message, saga_id);
                Ok(())
            }
        })
        .await?;

    Ok(StageFlow::Done)
}
