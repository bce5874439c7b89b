//! Parallel branch join
//!
//! Runs independent sub-procedures of one stage concurrently and blocks
//! until every branch has produced a result. The join is a synchronization
//! barrier: branches run concurrently with each other but never with the
//! rest of the saga. Two things end a join early:
//!
//! - the kill switch fires: the join returns immediately with whatever
//!   results are available; branches that have not reached a step boundary
//!   are detached, never force-killed (cooperative cancellation only);
//! - a branch finishes with a terminating outcome (a hard reject, a
//!   timeout): the terminating branch wins and sibling waits are abandoned.
//!   Their eventual signals are no-ops against a terminated saga.

use crate::{KillSwitch, TerminalOutcome};
use std::future::Future;
use std::pin::Pin;
use tokio::task::JoinSet;

/// Outcome of one branch
#[derive(Clone, Debug)]
pub enum BranchOutcome {
    /// Branch completed with nothing to flag
    Cleared,
    /// Branch completed but a human must review its findings
    RequiresReview,
    /// Branch observed the kill switch at a step boundary
    KillSwitchTriggered,
    /// Branch ended the saga (reject, veto, timeout)
    Error(TerminalOutcome),
}

impl BranchOutcome {
    /// Outcomes that end the saga and abandon sibling branches
    pub fn is_terminating(&self) -> bool {
        matches!(self, Self::KillSwitchTriggered | Self::Error(_))
    }

    /// Map a stage-body result into a branch outcome. A failure caused by
    /// the kill switch reports as `KillSwitchTriggered` rather than an
    /// ordinary error so the caller skips all further work.
    pub fn from_result(kill: &KillSwitch, result: Result<BranchOutcome, TerminalOutcome>) -> Self {
        match result {
            Ok(outcome) => outcome,
            Err(_) if kill.is_triggered() => Self::KillSwitchTriggered,
            Err(outcome) => Self::Error(outcome),
        }
    }
}

/// Per-branch result inside a join
#[derive(Clone, Debug)]
pub struct BranchResult {
    /// Branch identifier, unique within the join
    pub branch_id: &'static str,
    /// What the branch produced
    pub outcome: BranchOutcome,
}

/// One branch of a parallel section
pub struct Branch {
    id: &'static str,
    future: Pin<Box<dyn Future<Output = BranchOutcome> + Send + 'static>>,
}

impl Branch {
    /// Name a branch procedure
    pub fn new(id: &'static str, future: impl Future<Output = BranchOutcome> + Send + 'static) -> Self {
        Self {
            id,
            future: Box::pin(future),
        }
    }
}

/// Result of a completed (or abandoned) join
#[derive(Clone, Debug)]
pub struct JoinReport {
    /// Results collected before the join ended
    pub results: Vec<BranchResult>,
    /// The kill switch was observed during the join
    pub kill_switch_triggered: bool,
}

impl JoinReport {
    /// The first terminating outcome, if any branch ended the saga
    pub fn first_terminal(&self) -> Option<TerminalOutcome> {
        self.results.iter().find_map(|r| match &r.outcome {
            BranchOutcome::Error(outcome) => Some(outcome.clone()),
            _ => None,
        })
    }

    /// Whether any branch flagged its findings for review
    pub fn requires_review(&self) -> bool {
        self.results
            .iter()
            .any(|r| matches!(r.outcome, BranchOutcome::RequiresReview))
    }
}

/// Run all branches concurrently and join them.
///
/// Completes when every branch has exactly one [`BranchResult`], or early
/// when the kill switch fires or a branch terminates the saga. If the
/// caller sees `kill_switch_triggered` or a terminating result it must not
/// schedule any subsequent branch or step.
pub async fn join(kill: &KillSwitch, branches: Vec<Branch>) -> JoinReport {
    let expected = branches.len();
    let mut results = Vec::with_capacity(expected);
    let mut kill_switch_triggered = kill.is_triggered();

    let mut set = JoinSet::new();
    if !kill_switch_triggered {
        for branch in branches {
            let id = branch.id;
            let future = branch.future;
            set.spawn(async move {
                BranchResult {
                    branch_id: id,
                    outcome: future.await,
                }
            });
        }

        loop {
            tokio::select! {
                biased;
                _ = kill.cancelled() => {
                    kill_switch_triggered = true;
                    break;
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(result)) => {
                        let terminating = result.outcome.is_terminating();
                        if matches!(result.outcome, BranchOutcome::KillSwitchTriggered) {
                            kill_switch_triggered = true;
                        }
                        results.push(result);
                        if terminating {
                            break;
                        }
                    }
                    Some(Err(join_error)) => {
                        tracing::error!(%join_error, "branch task failed");
                        results.push(BranchResult {
                            branch_id: "<panicked>",
                            outcome: BranchOutcome::Error(TerminalOutcome::failed(
                                0,
                                "branch task failed",
                            )),
                        });
                        break;
                    }
                }
            }
        }
    }

    // Abandoned branches keep running to their next step boundary, where
    // they observe the switch or find their signal queue orphaned.
    set.detach_all();

    JoinReport {
        results,
        kill_switch_triggered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn join_collects_one_result_per_branch() {
        let kill = KillSwitch::new();
        let report = join(
            &kill,
            vec![
                Branch::new("contract", async { BranchOutcome::Cleared }),
                Branch::new("documents", async { BranchOutcome::RequiresReview }),
                Branch::new("screening", async { BranchOutcome::Cleared }),
            ],
        )
        .await;

        assert_eq!(report.results.len(), 3);
        assert!(!report.kill_switch_triggered);
        assert!(report.requires_review());
        assert!(report.first_terminal().is_none());
    }

    #[tokio::test]
    async fn kill_switch_ends_the_join_with_partial_results() {
        let kill = KillSwitch::new();
        let trigger = kill.clone();

        let report = join(
            &kill,
            vec![
                Branch::new("fast", async { BranchOutcome::Cleared }),
                Branch::new("stuck", async move {
                    // Pull the switch once the fast branch has had a chance
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    trigger.trigger("operator terminate", "ops");
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    BranchOutcome::Cleared
                }),
            ],
        )
        .await;

        assert!(report.kill_switch_triggered);
        assert!(report.results.len() < 2);
    }

    #[tokio::test]
    async fn hard_reject_wins_over_a_waiting_sibling() {
        let kill = KillSwitch::new();
        let report = join(
            &kill,
            vec![
                Branch::new("review", async {
                    BranchOutcome::Error(TerminalOutcome::failed(5, "rejected by risk manager"))
                }),
                Branch::new("waiting", async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    BranchOutcome::Cleared
                }),
            ],
        )
        .await;

        let terminal = report.first_terminal().unwrap();
        assert_eq!(terminal.reason.as_ref(), "rejected by risk manager");
        assert!(!report.kill_switch_triggered);
    }

    #[tokio::test]
    async fn pre_triggered_switch_skips_all_branches() {
        let kill = KillSwitch::new();
        kill.trigger("already dead", "ops");

        let report = join(
            &kill,
            vec![Branch::new("never", async {
                panic!("branch must not start");
            })],
        )
        .await;

        assert!(report.kill_switch_triggered);
        assert!(report.results.is_empty());
    }
}
