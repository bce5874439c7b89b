//! Saga observer trait

use crate::{SagaContext, TerminalOutcome};

/// Observer trait for external observability
pub trait SagaObserver: Send + Sync + 'static {
    /// A saga started
    fn on_saga_started(&self, context: &SagaContext);
    /// The sequencer entered a stage
    fn on_stage_entered(&self, context: &SagaContext, stage: u8);
    /// A step began executing
    fn on_step_started(&self, context: &SagaContext, step: &str);
    /// A step completed
    fn on_step_completed(&self, context: &SagaContext, step: &str, duration_millis: u64);
    /// A step failed
    fn on_step_failed(&self, context: &SagaContext, step: &str, error: &str);
    /// The saga paused on a recovery ticket
    fn on_recovery_opened(&self, context: &SagaContext, ticket_id: u64, step: &str);
    /// A signal wait timed out
    fn on_wait_timed_out(&self, context: &SagaContext, signal_name: &str);
    /// The kill switch was pulled
    fn on_kill_switch(&self, context: &SagaContext, reason: &str);
    /// The saga ended
    fn on_saga_ended(&self, context: &SagaContext, outcome: &TerminalOutcome);
}

/// No-op observer
pub struct NoOpObserver;

impl SagaObserver for NoOpObserver {
    fn on_saga_started(&self, _context: &SagaContext) {}
    fn on_stage_entered(&self, _context: &SagaContext, _stage: u8) {}
    fn on_step_started(&self, _context: &SagaContext, _step: &str) {}
    fn on_step_completed(&self, _context: &SagaContext, _step: &str, _duration_millis: u64) {}
    fn on_step_failed(&self, _context: &SagaContext, _step: &str, _error: &str) {}
    fn on_recovery_opened(&self, _context: &SagaContext, _ticket_id: u64, _step: &str) {}
    fn on_wait_timed_out(&self, _context: &SagaContext, _signal_name: &str) {}
    fn on_kill_switch(&self, _context: &SagaContext, _reason: &str) {}
    fn on_saga_ended(&self, _context: &SagaContext, _outcome: &TerminalOutcome) {}
}

/// Tracing-based observer
pub struct TracingObserver;

impl SagaObserver for TracingObserver {
    fn on_saga_started(&self, context: &SagaContext) {
        tracing::info!(saga_id = %context.saga_id.0, applicant = %context.applicant_id, "Saga started");
    }

    fn on_stage_entered(&self, context: &SagaContext, stage: u8) {
        tracing::info!(saga_id = %context.saga_id.0, stage, "Stage entered");
    }

    fn on_step_started(&self, context: &SagaContext, step: &str) {
        tracing::info!(saga_id = %context.saga_id.0, step = %step, "Step started");
    }

    fn on_step_completed(&self, context: &SagaContext, step: &str, duration_millis: u64) {
        tracing::info!(saga_id = %context.saga_id.0, step = %step, duration_ms = duration_millis, "Step completed");
    }

    fn on_step_failed(&self, context: &SagaContext, step: &str, error: &str) {
        tracing::warn!(saga_id = %context.saga_id.0, step = %step, error = %error, "Step failed");
    }

    fn on_recovery_opened(&self, context: &SagaContext, ticket_id: u64, step: &str) {
        tracing::warn!(saga_id = %context.saga_id.0, ticket_id, step = %step, "Saga paused for operator decision");
    }

    fn on_wait_timed_out(&self, context: &SagaContext, signal_name: &str) {
        tracing::error!(saga_id = %context.saga_id.0, signal = %signal_name, "Signal wait timed out");
    }

    fn on_kill_switch(&self, context: &SagaContext, reason: &str) {
        tracing::error!(saga_id = %context.saga_id.0, reason = %reason, "Kill switch triggered");
    }

    fn on_saga_ended(&self, context: &SagaContext, outcome: &TerminalOutcome) {
        tracing::info!(saga_id = %context.saga_id.0, status = ?outcome.status, stage = outcome.stage, reason = %outcome.reason, "Saga ended");
    }
}
