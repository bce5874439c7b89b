//! Saga timeout configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DAY_SECS: u64 = 24 * 60 * 60;

/// Per-wait timeout table for one saga.
///
/// Timeouts are per-wait, not per-saga: the overall lifetime is built from
/// many short deadlines, each of which independently resolves to a terminal
/// `timeout` for its stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// Waiting for `quote.approved`
    pub quote_approval_secs: u64,
    /// Waiting for `quote.signed`
    pub quote_signature_secs: u64,
    /// Waiting for `facility-form.submitted`
    pub facility_form_secs: u64,
    /// Waiting for `contract.signed`
    pub contract_signature_secs: u64,
    /// Waiting for `mandate-documents.submitted` / `fica-documents.received`
    pub document_collection_secs: u64,
    /// Waiting for `risk-decision.received` / `procurement-decision.received`
    pub review_decision_secs: u64,
    /// Waiting for `final-approval.received`
    pub final_approval_secs: u64,
    /// Waiting for `recovery-decision.received` on an open ticket
    pub recovery_decision_secs: u64,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            quote_approval_secs: 14 * DAY_SECS,
            quote_signature_secs: 14 * DAY_SECS,
            facility_form_secs: 14 * DAY_SECS,
            contract_signature_secs: 14 * DAY_SECS,
            document_collection_secs: 14 * DAY_SECS,
            review_decision_secs: 14 * DAY_SECS,
            final_approval_secs: 14 * DAY_SECS,
            recovery_decision_secs: 30 * DAY_SECS,
        }
    }
}

impl SagaConfig {
    /// Timeout for waiting on `quote.approved`
    pub fn quote_approval(&self) -> Duration {
        Duration::from_secs(self.quote_approval_secs)
    }

    /// Timeout for waiting on `quote.signed`
    pub fn quote_signature(&self) -> Duration {
        Duration::from_secs(self.quote_signature_secs)
    }

    /// Timeout for waiting on `facility-form.submitted`
    pub fn facility_form(&self) -> Duration {
        Duration::from_secs(self.facility_form_secs)
    }

    /// Timeout for waiting on `contract.signed`
    pub fn contract_signature(&self) -> Duration {
        Duration::from_secs(self.contract_signature_secs)
    }

    /// Timeout for document collection waits
    pub fn document_collection(&self) -> Duration {
        Duration::from_secs(self.document_collection_secs)
    }

    /// Timeout for review decision waits
    pub fn review_decision(&self) -> Duration {
        Duration::from_secs(self.review_decision_secs)
    }

    /// Timeout for the final approval wait
    pub fn final_approval(&self) -> Duration {
        Duration::from_secs(self.final_approval_secs)
    }

    /// Timeout for an operator's recovery decision
    pub fn recovery_decision(&self) -> Duration {
        Duration::from_secs(self.recovery_decision_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operational_policy() {
        let config = SagaConfig::default();
        assert_eq!(config.quote_approval(), Duration::from_secs(14 * DAY_SECS));
        assert_eq!(
            config.recovery_decision(),
            Duration::from_secs(30 * DAY_SECS)
        );
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: SagaConfig =
            serde_json::from_str(r#"{"quote_approval_secs": 3600}"#).unwrap();
        assert_eq!(config.quote_approval(), Duration::from_secs(3600));
        assert_eq!(
            config.recovery_decision(),
            Duration::from_secs(30 * DAY_SECS)
        );
    }
}
