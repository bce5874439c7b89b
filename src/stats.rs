//! Saga runner statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every saga a runner drives
pub struct RunnerStats {
    /// Steps that actually executed
    pub steps_executed: AtomicU64,
    /// Steps answered from the journal without re-running
    pub steps_replayed: AtomicU64,
    /// Step attempts that failed
    pub steps_failed: AtomicU64,
    /// Steps skipped by an operator `continue`
    pub steps_skipped: AtomicU64,
    /// Signals received
    pub signals_received: AtomicU64,
    /// Signal waits that timed out
    pub waits_timed_out: AtomicU64,
    /// Recovery tickets opened
    pub tickets_opened: AtomicU64,
    /// Sagas terminated by the kill switch
    pub kill_switch_terminations: AtomicU64,
    /// Sagas that reached `Completed`
    pub sagas_completed: AtomicU64,
    /// Sagas that reached `Failed` or `Timeout`
    pub sagas_failed: AtomicU64,
}

impl RunnerStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            steps_executed: AtomicU64::new(0),
            steps_replayed: AtomicU64::new(0),
            steps_failed: AtomicU64::new(0),
            steps_skipped: AtomicU64::new(0),
            signals_received: AtomicU64::new(0),
            waits_timed_out: AtomicU64::new(0),
            tickets_opened: AtomicU64::new(0),
            kill_switch_terminations: AtomicU64::new(0),
            sagas_completed: AtomicU64::new(0),
            sagas_failed: AtomicU64::new(0),
        }
    }

    /// Take a point-in-time snapshot
    pub fn snapshot(&self) -> RunnerStatsSnapshot {
        RunnerStatsSnapshot {
            steps_executed: self.steps_executed.load(Ordering::Relaxed),
            steps_replayed: self.steps_replayed.load(Ordering::Relaxed),
            steps_failed: self.steps_failed.load(Ordering::Relaxed),
            steps_skipped: self.steps_skipped.load(Ordering::Relaxed),
            signals_received: self.signals_received.load(Ordering::Relaxed),
            waits_timed_out: self.waits_timed_out.load(Ordering::Relaxed),
            tickets_opened: self.tickets_opened.load(Ordering::Relaxed),
            kill_switch_terminations: self.kill_switch_terminations.load(Ordering::Relaxed),
            sagas_completed: self.sagas_completed.load(Ordering::Relaxed),
            sagas_failed: self.sagas_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for RunnerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copyable snapshot of [`RunnerStats`]
#[derive(Clone, Debug)]
pub struct RunnerStatsSnapshot {
    /// Steps that actually executed
    pub steps_executed: u64,
    /// Steps answered from the journal
    pub steps_replayed: u64,
    /// Step attempts that failed
    pub steps_failed: u64,
    /// Steps skipped by an operator `continue`
    pub steps_skipped: u64,
    /// Signals received
    pub signals_received: u64,
    /// Signal waits that timed out
    pub waits_timed_out: u64,
    /// Recovery tickets opened
    pub tickets_opened: u64,
    /// Sagas terminated by the kill switch
    pub kill_switch_terminations: u64,
    /// Sagas that completed
    pub sagas_completed: u64,
    /// Sagas that failed or timed out
    pub sagas_failed: u64,
}
