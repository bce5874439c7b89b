//! Signal waits with saga-scoped timeouts
//!
//! Thin wrapper over the substrate's `wait_for_signal` that applies the
//! saga's timeout table and the uniform "timed out means terminal" contract:
//! a wait that expires resolves to a `{status: timeout, stage, reason}`
//! outcome, the saga never retries a wait on its own, and a human restarts
//! it out-of-band if the process should continue.

use crate::events::SignalPayload;
use crate::substrate::{Substrate, WaitOutcome};
use crate::{SagaId, TerminalOutcome};
use std::sync::Arc;
use std::time::Duration;

/// Waits for external signals addressed to one saga.
#[derive(Clone)]
pub struct SignalWaiter {
    substrate: Arc<Substrate>,
    saga_id: SagaId,
}

impl SignalWaiter {
    /// Waiter bound to the given saga's correlation key
    pub fn new(substrate: Arc<Substrate>, saga_id: SagaId) -> Self {
        Self { substrate, saga_id }
    }

    /// Wait for a signal, resolving to exactly one of {payload, timed out}
    pub async fn wait(&self, signal_name: &'static str, timeout: Duration) -> WaitOutcome {
        self.substrate
            .wait_for_signal(self.saga_id, signal_name, timeout)
            .await
    }

    /// Wait for a signal the stage cannot proceed without. A timeout
    /// becomes the stage's terminal `Timeout` outcome.
    pub async fn expect(
        &self,
        signal_name: &'static str,
        timeout: Duration,
        stage: u8,
    ) -> Result<SignalPayload, TerminalOutcome> {
        match self.wait(signal_name, timeout).await {
            WaitOutcome::Signal(payload) => Ok(payload),
            WaitOutcome::TimedOut => Err(TerminalOutcome::timed_out(
                stage,
                format!("signal '{signal_name}' not received in time"),
            )),
        }
    }
}
