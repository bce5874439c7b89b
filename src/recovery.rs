//! Human-in-the-loop recovery
//!
//! Wraps any side-effecting step. On failure the saga pauses, raises one
//! actionable notification, opens a recovery ticket and waits for the
//! operator's `recovery-decision.received` signal. The ticket state machine
//! (`pending -> retry | cancel | continue`) replaces exception-driven
//! retry: a retry re-enters the failed step by id, the outer saga frame
//! replays cleanly from the journal.
//!
//! This is the saga's only sanctioned path for a human to unblock an
//! automatically-failed step without restarting the whole saga.

use crate::events::{RecoveryAction, SagaEvent, SignalPayload};
use crate::instance::SagaStatus;
use crate::sequencer::StageCtx;
use crate::signal::SignalWaiter;
use crate::substrate::WaitOutcome;
use crate::{StepFailure, TerminalOutcome};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Run a step under the recovery protocol.
///
/// - success: the step's result, untouched;
/// - veto: immediate terminal failure, never enters the human queue;
/// - recoverable failure: pause, ticket, operator decision:
///   - `retry` re-invokes the step from scratch (its failed attempt left no
///     memoized success, so it actually executes again),
///   - `cancel` or a 30-day decision timeout fails the saga,
///   - `continue` returns `Ok(None)`: the step was intentionally skipped
///     and its result is absent. Callers must not treat `None` as an error.
pub(crate) async fn guard<T, F, Fut>(
    ctx: &StageCtx,
    step_name: &str,
    action: F,
) -> Result<Option<T>, TerminalOutcome>
where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StepFailure>>,
{
    let saga_id = ctx.saga_id();
    let step_id = ctx.step_id(step_name);
    let mut attempt = 0u32;

    loop {
        // Side-effecting steps consult the switch immediately before running
        ctx.check_kill()?;

        ctx.observer.on_step_started(&ctx.context, &step_id);
        let started = crate::SagaContext::now_millis();

        match ctx
            .substrate
            .run_step(saga_id, &step_id, attempt, || action())
            .await
        {
            Ok(output) => {
                ctx.observer.on_step_completed(
                    &ctx.context,
                    &step_id,
                    crate::SagaContext::now_millis().saturating_sub(started),
                );
                return Ok(Some(output));
            }
            Err(StepFailure::Veto { reason }) => {
                // Fail fast and loud; a veto never reaches the human queue
                ctx.observer.on_step_failed(&ctx.context, &step_id, &reason);
                ctx.effects.notifier.send_internal_alert(
                    "Onboarding vetoed",
                    &format!("Saga {saga_id} step {step_id}: {reason}"),
                    saga_id,
                );
                return Err(TerminalOutcome::failed(ctx.current_stage(), reason));
            }
            Err(StepFailure::Recoverable { reason }) => {
                ctx.observer.on_step_failed(&ctx.context, &step_id, &reason);

                let ticket_id = ctx.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
                let stage = ctx.current_stage();
                ctx.substrate.record_event(
                    saga_id,
                    SagaEvent::TicketOpened {
                        ticket_id,
                        step_id: step_id.as_str().into(),
                        stage,
                        error: reason.clone(),
                    },
                );
                ctx.substrate
                    .stats()
                    .tickets_opened
                    .fetch_add(1, Ordering::Relaxed);
                ctx.observer
                    .on_recovery_opened(&ctx.context, ticket_id, &step_id);
                ctx.set_status(SagaStatus::Paused);

                // Exactly one actionable notification per ticket
                ctx.effects.notifier.create_notification(
                    saga_id,
                    crate::effects::NotificationKind::RecoveryRequired,
                    "Onboarding step failed",
                    &format!(
                        "Saga {saga_id} stage {stage}, step '{step_id}' failed: {reason}. Resolve with retry, cancel or continue (ticket {ticket_id})."
                    ),
                    true,
                );

                match wait_for_decision(ctx, ticket_id).await? {
                    Some(RecoveryAction::Retry) => {
                        resolve(ctx, ticket_id, RecoveryAction::Retry);
                        ctx.set_status(SagaStatus::Processing);
                        attempt += 1;
                        continue;
                    }
                    Some(RecoveryAction::Continue) => {
                        resolve(ctx, ticket_id, RecoveryAction::Continue);
                        ctx.substrate.record_event(
                            saga_id,
                            SagaEvent::StepSkipped {
                                step_id: step_id.as_str().into(),
                                ticket_id,
                            },
                        );
                        ctx.substrate
                            .stats()
                            .steps_skipped
                            .fetch_add(1, Ordering::Relaxed);
                        ctx.set_status(SagaStatus::Processing);
                        return Ok(None);
                    }
                    Some(RecoveryAction::Cancel) => {
                        resolve(ctx, ticket_id, RecoveryAction::Cancel);
                        return Err(TerminalOutcome::failed(
                            stage,
                            format!("cancelled by operator (ticket {ticket_id})"),
                        ));
                    }
                    None => {
                        // No resolution within the window counts as cancel
                        resolve(ctx, ticket_id, RecoveryAction::Cancel);
                        return Err(TerminalOutcome::failed(
                            stage,
                            format!("no operator decision on ticket {ticket_id}"),
                        ));
                    }
                }
            }
        }
    }
}

/// Wait for the operator decision on `ticket_id`. Decisions addressed to
/// other (stale) tickets are ignored; `None` means the window elapsed.
async fn wait_for_decision(
    ctx: &StageCtx,
    ticket_id: u64,
) -> Result<Option<RecoveryAction>, TerminalOutcome> {
    let waiter = SignalWaiter::new(Arc::clone(&ctx.substrate), ctx.saga_id());
    let deadline = tokio::time::Instant::now() + ctx.config.recovery_decision();

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        let outcome = tokio::select! {
            biased;
            _ = ctx.kill.cancelled() => return Err(ctx.kill_outcome()),
            outcome = waiter.wait("recovery-decision.received", remaining) => outcome,
        };

        match outcome {
            WaitOutcome::Signal(SignalPayload::RecoveryDecisionReceived {
                ticket_id: decided,
                action,
                decided_by,
            }) => {
                if decided == ticket_id {
                    tracing::info!(
                        saga_id = %ctx.saga_id(),
                        ticket_id,
                        ?action,
                        decided_by = %decided_by,
                        "recovery decision received"
                    );
                    return Ok(Some(action));
                }
                tracing::warn!(
                    saga_id = %ctx.saga_id(),
                    expected = ticket_id,
                    received = decided,
                    "stale recovery decision ignored"
                );
            }
            WaitOutcome::Signal(_) => {}
            WaitOutcome::TimedOut => return Ok(None),
        }
    }
}

fn resolve(ctx: &StageCtx, ticket_id: u64, action: RecoveryAction) {
    ctx.substrate.record_event(
        ctx.saga_id(),
        SagaEvent::TicketResolved { ticket_id, action },
    );
}
