//! End-to-end saga flows over the in-memory journal: the happy path, the
//! review detour, operator recovery decisions, timeouts, the kill switch
//! and crash/resume.

use onboarding_saga::effects::{
    Effects, FormKind, NotificationKind, RecordingDownstream, RecordingNotifier, StaticChecks,
};
use onboarding_saga::events::{RecoveryAction, SagaEvent, SignalPayload};
use onboarding_saga::journal::{InMemoryJournal, SagaJournal};
use onboarding_saga::risk::RiskRecommendation;
use onboarding_saga::substrate::Substrate;
use onboarding_saga::{ApplicantId, SagaContext, SagaId, SagaRunner, TerminalStatus};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    runner: Arc<SagaRunner>,
    notifier: Arc<RecordingNotifier>,
    downstream: Arc<RecordingDownstream>,
}

fn harness_over(journal: Arc<InMemoryJournal>, checks: StaticChecks) -> Harness {
    let substrate = Arc::new(Substrate::new(journal));
    let notifier = Arc::new(RecordingNotifier::new());
    let downstream = Arc::new(RecordingDownstream::new());
    let effects = Effects {
        notifier: notifier.clone(),
        checks: Arc::new(checks),
        downstream: downstream.clone(),
    };
    Harness {
        runner: Arc::new(SagaRunner::new(substrate, effects)),
        notifier,
        downstream,
    }
}

fn harness(checks: StaticChecks) -> Harness {
    harness_over(Arc::new(InMemoryJournal::new()), checks)
}

fn context(saga: SagaId) -> SagaContext {
    SagaContext::new(saga, ApplicantId(501), "owner@acme.test", 250_000)
}

/// Queue every applicant-side signal up to the end of stage 3. Signals are
/// queued before the saga reaches the wait, which is the normal case for a
/// fast applicant and exercises the queue-then-take path.
fn drive_to_analysis(runner: &SagaRunner, saga: SagaId) {
    let signals = [
        SignalPayload::QuoteApproved {
            quote_reference: "Q-1".into(),
        },
        SignalPayload::QuoteSigned {
            quote_reference: "Q-1".into(),
        },
        SignalPayload::FacilityFormSubmitted {
            business_type: "Engineering Pty Ltd".into(),
            facility_amount: 300_000,
        },
        SignalPayload::ContractSigned {
            contract_reference: "CTR-9".into(),
        },
        SignalPayload::MandateDocumentsSubmitted { document_count: 3 },
        SignalPayload::FicaDocumentsReceived { document_count: 2 },
    ];
    for payload in signals {
        runner.signal(saga, payload).unwrap();
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within the polling window");
}

fn entered_stage(entries: &[onboarding_saga::journal::JournalEntry], wanted: u8) -> bool {
    entries
        .iter()
        .any(|e| matches!(e.event, SagaEvent::StageEntered { stage, .. } if stage == wanted))
}

fn step_completed(entries: &[onboarding_saga::journal::JournalEntry], wanted: &str) -> bool {
    entries.iter().any(
        |e| matches!(&e.event, SagaEvent::StepCompleted { step_id, .. } if step_id.as_ref() == wanted),
    )
}

#[tokio::test]
async fn happy_path_completes_and_activates_the_client() {
    let h = harness(StaticChecks::all_clear());
    let saga = SagaId::new(1);
    drive_to_analysis(&h.runner, saga);

    let outcome = h.runner.run(context(saga)).await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(outcome.stage, 6);

    let clients = h.downstream.clients();
    assert_eq!(clients.len(), 1);
    let (_, mandate) = &clients[0];
    assert_eq!(mandate.business_type.as_ref(), "engineering pty ltd");
    assert_eq!(mandate.facility_amount, 300_000);
    assert_eq!(mandate.contract_reference.as_ref(), "CTR-9");

    // All checks were clean: review stage never entered
    let entries = h.runner.substrate().journal().read(saga).unwrap();
    assert!(!entered_stage(&entries, 5));

    let forms: Vec<FormKind> = h.notifier.links().into_iter().map(|(_, form)| form).collect();
    assert!(forms.contains(&FormKind::QuoteSignature));
    assert!(forms.contains(&FormKind::FacilityApplication));
    assert!(forms.contains(&FormKind::MandateDocuments));

    assert_eq!(h.runner.stats().sagas_completed, 1);
    assert_eq!(h.runner.stats().tickets_opened, 0);
}

#[tokio::test]
async fn flagged_checks_route_through_manual_review() {
    let mut checks = StaticChecks::all_clear();
    checks.risk.recommendation = RiskRecommendation::ManualReview;

    let h = harness(checks);
    let saga = SagaId::new(2);
    drive_to_analysis(&h.runner, saga);
    h.runner
        .signal(
            saga,
            SignalPayload::RiskDecisionReceived {
                approved: true,
                notes: "acceptable with monitoring".into(),
            },
        )
        .unwrap();
    h.runner
        .signal(
            saga,
            SignalPayload::ProcurementDecisionReceived {
                approved: true,
                notes: "ok".into(),
            },
        )
        .unwrap();
    h.runner
        .signal(
            saga,
            SignalPayload::FinalApprovalReceived {
                approved: true,
                decided_by: "coo".into(),
            },
        )
        .unwrap();

    let outcome = h.runner.run(context(saga)).await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Completed);

    let entries = h.runner.substrate().journal().read(saga).unwrap();
    assert!(entered_stage(&entries, 5));
    assert!(h
        .notifier
        .notifications()
        .iter()
        .any(|n| n.kind == NotificationKind::ReviewRequired && n.actionable));
}

#[tokio::test]
async fn reviewer_rejection_fails_the_saga_and_later_signals_are_dropped() {
    let mut checks = StaticChecks::all_clear();
    checks.risk.bounced_transactions = true;

    let h = harness(checks);
    let saga = SagaId::new(3);
    drive_to_analysis(&h.runner, saga);
    h.runner
        .signal(
            saga,
            SignalPayload::RiskDecisionReceived {
                approved: false,
                notes: "exposure too high".into(),
            },
        )
        .unwrap();

    let outcome = h.runner.run(context(saga)).await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert_eq!(outcome.stage, 5);
    assert!(outcome.reason.contains("rejected by risk manager"));

    // The sibling reviewer answering after the fact changes nothing
    h.runner
        .signal(
            saga,
            SignalPayload::ProcurementDecisionReceived {
                approved: true,
                notes: "late".into(),
            },
        )
        .unwrap();
    let entries = h.runner.substrate().journal().read(saga).unwrap();
    let late = entries.iter().any(|e| {
        matches!(
            &e.event,
            SagaEvent::SignalReceived {
                payload: SignalPayload::ProcurementDecisionReceived { .. },
                ..
            }
        )
    });
    assert!(!late);
}

#[tokio::test]
async fn sanctions_hit_pulls_the_kill_switch() {
    let mut checks = StaticChecks::all_clear();
    checks.sanctions.list_match = true;

    let h = harness(checks);
    let saga = SagaId::new(4);
    drive_to_analysis(&h.runner, saga);

    let outcome = h.runner.run(context(saga)).await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert!(outcome.reason.contains("COMPLIANCE_VIOLATION"));

    let entries = h.runner.substrate().journal().read(saga).unwrap();
    assert!(entries
        .iter()
        .any(|e| matches!(e.event, SagaEvent::KillSwitchTriggered { .. })));
    assert!(h
        .notifier
        .alerts()
        .iter()
        .any(|title| title.contains("blocked by compliance policy")));
    assert_eq!(h.runner.stats().kill_switch_terminations, 1);
    assert!(h.downstream.clients().is_empty());
}

#[tokio::test]
async fn failed_step_pauses_until_the_operator_retries() {
    let h = harness(StaticChecks::all_clear());
    let saga = SagaId::new(5);
    h.downstream.fail_next_creates(1);
    drive_to_analysis(&h.runner, saga);

    let task = {
        let runner = Arc::clone(&h.runner);
        let context = context(saga);
        tokio::spawn(async move { runner.run(context).await })
    };

    let notifier = Arc::clone(&h.notifier);
    wait_until(move || {
        notifier
            .notifications()
            .iter()
            .any(|n| n.kind == NotificationKind::RecoveryRequired && n.actionable)
    })
    .await;

    h.runner
        .resolve_error(saga, RecoveryAction::Retry, "ops")
        .unwrap();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert_eq!(h.downstream.clients().len(), 1);
    assert_eq!(h.runner.stats().tickets_opened, 1);

    let entries = h.runner.substrate().journal().read(saga).unwrap();
    assert!(entries.iter().any(|e| matches!(
        e.event,
        SagaEvent::TicketResolved {
            action: RecoveryAction::Retry,
            ..
        }
    )));
}

#[tokio::test]
async fn operator_cancel_fails_the_saga() {
    let h = harness(StaticChecks::all_clear());
    let saga = SagaId::new(6);
    h.downstream.fail_next_creates(1);
    drive_to_analysis(&h.runner, saga);

    let task = {
        let runner = Arc::clone(&h.runner);
        let context = context(saga);
        tokio::spawn(async move { runner.run(context).await })
    };

    let notifier = Arc::clone(&h.notifier);
    wait_until(move || {
        notifier
            .notifications()
            .iter()
            .any(|n| n.kind == NotificationKind::RecoveryRequired)
    })
    .await;

    h.runner
        .resolve_error(saga, RecoveryAction::Cancel, "ops")
        .unwrap();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert!(outcome.reason.contains("cancelled by operator"));
    assert!(h.downstream.clients().is_empty());
}

#[tokio::test]
async fn operator_continue_skips_the_failed_step() {
    let h = harness(StaticChecks::all_clear());
    let saga = SagaId::new(7);
    h.downstream.fail_next_creates(1);
    drive_to_analysis(&h.runner, saga);

    let task = {
        let runner = Arc::clone(&h.runner);
        let context = context(saga);
        tokio::spawn(async move { runner.run(context).await })
    };

    let notifier = Arc::clone(&h.notifier);
    wait_until(move || {
        notifier
            .notifications()
            .iter()
            .any(|n| n.kind == NotificationKind::RecoveryRequired)
    })
    .await;

    h.runner
        .resolve_error(saga, RecoveryAction::Continue, "ops")
        .unwrap();

    // Skipping client creation still completes the saga, with no client
    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.status, TerminalStatus::Completed);
    assert!(h.downstream.clients().is_empty());
    assert_eq!(h.runner.stats().steps_skipped, 1);
    assert!(h
        .notifier
        .alerts()
        .iter()
        .any(|title| title.contains("Onboarding complete")));
}

#[tokio::test(start_paused = true)]
async fn unanswered_quote_wait_times_out() {
    let h = harness(StaticChecks::all_clear());
    let saga = SagaId::new(8);

    let outcome = h.runner.run(context(saga)).await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Timeout);
    assert_eq!(outcome.stage, 1);
    assert!(outcome.reason.contains("quote.approved"));

    assert!(h
        .notifier
        .notifications()
        .iter()
        .any(|n| n.kind == NotificationKind::Timeout && n.actionable));
    assert_eq!(h.runner.stats().waits_timed_out, 1);
    assert_eq!(h.runner.stats().sagas_failed, 1);
}

#[tokio::test]
async fn kill_switch_mid_wait_stops_the_saga() {
    let h = harness(StaticChecks::all_clear());
    let saga = SagaId::new(9);

    let task = {
        let runner = Arc::clone(&h.runner);
        let context = context(saga);
        tokio::spawn(async move { runner.run(context).await })
    };

    let runner = Arc::clone(&h.runner);
    wait_until(move || runner.handle(saga).is_some()).await;
    h.runner.terminate(saga, "fraud suspected", "ops").unwrap();

    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome.status, TerminalStatus::Failed);
    assert!(outcome.reason.contains("fraud suspected"));

    // A signal arriving after termination never reaches the journal
    h.runner
        .signal(
            saga,
            SignalPayload::QuoteApproved {
                quote_reference: "Q-LATE".into(),
            },
        )
        .unwrap();
    let entries = h.runner.substrate().journal().read(saga).unwrap();
    assert!(entries
        .iter()
        .all(|e| !matches!(e.event, SagaEvent::SignalReceived { .. })));
}

#[tokio::test(start_paused = true)]
async fn journaled_signals_survive_a_restart() {
    let journal = Arc::new(InMemoryJournal::new());
    let saga = SagaId::new(11);

    // First process journals the approval, then dies before any wait ran
    let h1 = harness_over(journal.clone(), StaticChecks::all_clear());
    h1.runner
        .signal(
            saga,
            SignalPayload::QuoteApproved {
                quote_reference: "Q-11".into(),
            },
        )
        .unwrap();
    drop(h1);

    // Second process never sees the approval delivered again; it must come
    // back from the journal. Only the signature arrives here.
    let h2 = harness_over(journal, StaticChecks::all_clear());
    h2.runner
        .signal(
            saga,
            SignalPayload::QuoteSigned {
                quote_reference: "Q-11".into(),
            },
        )
        .unwrap();

    let outcome = h2.runner.run(context(saga)).await.unwrap();

    // Stage 1 resolved both waits; the saga got as far as the facility
    // form, which nobody ever submitted.
    assert_eq!(outcome.status, TerminalStatus::Timeout);
    assert_eq!(outcome.stage, 2);
    assert!(outcome.reason.contains("facility-form.submitted"));
}

#[tokio::test(start_paused = true)]
async fn abandoned_branch_timeout_raises_no_notification() {
    let mut checks = StaticChecks::all_clear();
    checks.risk.bounced_transactions = true;

    let h = harness(checks);
    let saga = SagaId::new(12);
    drive_to_analysis(&h.runner, saga);
    // Risk rejects; the procurement reviewer never answers
    h.runner
        .signal(
            saga,
            SignalPayload::RiskDecisionReceived {
                approved: false,
                notes: "exposure too high".into(),
            },
        )
        .unwrap();

    let outcome = h.runner.run(context(saga)).await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Failed);

    // Let the abandoned procurement wait run past its deadline
    tokio::time::sleep(Duration::from_secs(15 * 24 * 3600)).await;
    tokio::task::yield_now().await;

    assert!(h
        .notifier
        .notifications()
        .iter()
        .all(|n| n.kind != NotificationKind::Timeout));
}

#[tokio::test]
async fn saga_resumes_from_the_journal_after_a_crash() {
    let journal = Arc::new(InMemoryJournal::new());
    let saga = SagaId::new(10);

    // First process: runs through stage 2, then dies mid-stage-3
    let h1 = harness_over(journal.clone(), StaticChecks::all_clear());
    let task = {
        let runner = Arc::clone(&h1.runner);
        let context = SagaContext::new(saga, ApplicantId(700), "owner@acme.test", 250_000);
        tokio::spawn(async move { runner.run(context).await })
    };
    h1.runner
        .signal(
            saga,
            SignalPayload::QuoteApproved {
                quote_reference: "Q-10".into(),
            },
        )
        .unwrap();
    h1.runner
        .signal(
            saga,
            SignalPayload::QuoteSigned {
                quote_reference: "Q-10".into(),
            },
        )
        .unwrap();
    h1.runner
        .signal(
            saga,
            SignalPayload::FacilityFormSubmitted {
                business_type: "Acme Pty Ltd".into(),
                facility_amount: 500_000,
            },
        )
        .unwrap();

    {
        let journal = journal.clone();
        wait_until(move || {
            let entries = journal.read(saga).unwrap();
            entered_stage(&entries, 3) && step_completed(&entries, "stage3:request-documents")
        })
        .await;
    }
    task.abort();
    let _ = task.await;

    // Second process: same journal, fresh everything else
    let h2 = harness_over(journal, StaticChecks::all_clear());
    h2.runner
        .signal(
            saga,
            SignalPayload::ContractSigned {
                contract_reference: "CTR-10".into(),
            },
        )
        .unwrap();
    h2.runner
        .signal(saga, SignalPayload::MandateDocumentsSubmitted { document_count: 4 })
        .unwrap();
    h2.runner
        .signal(saga, SignalPayload::FicaDocumentsReceived { document_count: 2 })
        .unwrap();

    let outcome = h2.runner.resume(saga).await.unwrap();
    assert_eq!(outcome.status, TerminalStatus::Completed);

    // Stage 1-2 results came back from the journal, not from re-execution
    assert!(h2.runner.stats().steps_replayed > 0);
    assert!(h1.downstream.clients().is_empty());
    let clients = h2.downstream.clients();
    assert_eq!(clients.len(), 1);
    let (_, mandate) = &clients[0];
    assert_eq!(mandate.business_type.as_ref(), "acme pty ltd");
    assert_eq!(mandate.facility_amount, 500_000);
}
