//! Cooperative kill switch
//!
//! One token per saga instance, threaded explicitly through the stage and
//! branch APIs. Triggering is idempotent and permanent: the first record
//! wins, nothing ever unsets it. Cancellation is cooperative — steps check
//! the switch at boundaries, a step already mid-execution always finishes.

use crate::instance::KillSwitchRecord;
use crate::SagaContext;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Cancellation token for one saga instance.
#[derive(Clone)]
pub struct KillSwitch {
    inner: Arc<Inner>,
}

struct Inner {
    record: Mutex<Option<KillSwitchRecord>>,
    notify: Notify,
}

impl KillSwitch {
    /// Create an untriggered switch
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                record: Mutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Restore a switch from a replayed record
    pub fn from_record(record: Option<KillSwitchRecord>) -> Self {
        Self {
            inner: Arc::new(Inner {
                record: Mutex::new(record),
                notify: Notify::new(),
            }),
        }
    }

    /// Pull the switch. Returns the record if this call triggered it, or
    /// `None` if the switch was already pulled (a no-op, not an error).
    pub fn trigger(&self, reason: &str, decided_by: &str) -> Option<KillSwitchRecord> {
        let mut slot = self.inner.record.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return None;
        }
        let record = KillSwitchRecord {
            reason: reason.into(),
            decided_by: decided_by.into(),
            triggered_at_millis: SagaContext::now_millis(),
        };
        *slot = Some(record.clone());
        drop(slot);
        self.inner.notify.notify_waiters();
        Some(record)
    }

    /// Check whether the switch has been pulled
    pub fn is_triggered(&self) -> bool {
        self.inner
            .record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// The record, if the switch has been pulled
    pub fn triggered(&self) -> Option<KillSwitchRecord> {
        self.inner
            .record
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Wait until the switch is pulled. Resolves immediately if it already
    /// was. Used inside parallel joins to return early with partial results.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

impl Default for KillSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_trigger_is_a_noop() {
        let switch = KillSwitch::new();
        assert!(switch.trigger("fraud suspected", "ops").is_some());
        assert!(switch.trigger("changed my mind", "ops2").is_none());

        let record = switch.triggered().unwrap();
        assert_eq!(record.reason.as_ref(), "fraud suspected");
        assert_eq!(record.decided_by.as_ref(), "ops");
    }

    #[tokio::test]
    async fn cancelled_resolves_for_waiters_and_late_joiners() {
        let switch = KillSwitch::new();
        let waiter = {
            let switch = switch.clone();
            tokio::spawn(async move {
                switch.cancelled().await;
            })
        };

        // Give the waiter a chance to register
        tokio::task::yield_now().await;
        switch.trigger("terminate", "ops");
        waiter.await.unwrap();

        // Already-triggered switch resolves immediately
        switch.cancelled().await;
    }
}
