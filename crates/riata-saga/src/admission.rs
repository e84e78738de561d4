//! Event admission.
//!
//! [`AdmissionService`] is the single front door for participant-reported
//! events. It applies two gates before appending to the event log:
//!
//! - a `TxStartedEvent` for a global transaction that already aborted is
//!   persisted for audit but reported as rejected, so the participant stops
//!   forward work and waits for compensation
//! - a `SagaEndedEvent` carrying a finite expiry, arriving while a timeout
//!   watch for the same global transaction is still open, is dropped
//!   entirely; the reconciliation engine owns closing that saga. Reports
//!   with the infinite-expiry sentinel never requested a timeout and pass
//!   straight through
//!
//! Everything else is appended as-is. Admission never mutates commands or
//! watches; those belong to the reconciliation engine.

use std::sync::Arc;

use tracing::{debug, info, Instrument};

use riata_core::observability::saga_span;

use crate::error::Result;
use crate::event::{EventType, TxEvent};
use crate::metrics::SagaMetrics;
use crate::store::{EventStore, TimeoutStore};

/// Outcome of admitting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The event was appended and the participant may proceed.
    Accepted,
    /// The event was appended for audit, but the participant must stop
    /// forward work: its global transaction already aborted.
    RejectedAbortedGlobal,
    /// The event was dropped without persisting: a timeout watch still owns
    /// the closure of this saga.
    RejectedStaleSagaEnded,
}

impl Admission {
    /// Returns true when the participant may continue forward work.
    #[must_use]
    pub const fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// The front door for participant-reported events.
pub struct AdmissionService<S> {
    store: Arc<S>,
    metrics: SagaMetrics,
}

impl<S> AdmissionService<S>
where
    S: EventStore + TimeoutStore,
{
    /// Creates an admission service over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            metrics: SagaMetrics::new(),
        }
    }

    /// Admits one event, returning whether the participant may proceed.
    ///
    /// # Errors
    ///
    /// Returns an error when the store fails. Gate rejections are not
    /// errors; they are reported through the [`Admission`] outcome.
    pub async fn handle(&self, event: TxEvent) -> Result<Admission> {
        let span = saga_span("admit", &event.global_tx_id, &event.service_name);
        self.admit(event).instrument(span).await
    }

    async fn admit(&self, event: TxEvent) -> Result<Admission> {
        if event.event_type == EventType::TxStartedEvent
            && self.is_global_aborted(&event.global_tx_id).await?
        {
            info!(
                global_tx_id = %event.global_tx_id,
                local_tx_id = %event.local_tx_id,
                "rejecting start event for aborted global transaction"
            );
            self.metrics
                .record_rejected(event.event_type, "aborted_global");
            self.store.save(event).await?;
            return Ok(Admission::RejectedAbortedGlobal);
        }

        if event.event_type == EventType::SagaEndedEvent
            && event.has_finite_expiry()
            && self.store.contains_active_global(&event.global_tx_id).await?
        {
            info!(
                global_tx_id = %event.global_tx_id,
                "dropping saga-ended report while a timeout watch is open"
            );
            self.metrics
                .record_rejected(event.event_type, "stale_saga_ended");
            return Ok(Admission::RejectedStaleSagaEnded);
        }

        let saved = self.store.save(event).await?;
        debug!(
            global_tx_id = %saved.global_tx_id,
            local_tx_id = %saved.local_tx_id,
            event_type = %saved.event_type,
            id = saved.id,
            "event admitted"
        );
        self.metrics.record_admitted(saved.event_type);
        Ok(Admission::Accepted)
    }

    async fn is_global_aborted(&self, global_tx_id: &str) -> Result<bool> {
        let aborts = self
            .store
            .find_transactions(global_tx_id, EventType::TxAbortedEvent)
            .await?;
        Ok(!aborts.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemorySagaStore, TimeoutStore};
    use crate::timeout::TxTimeout;
    use chrono::{Duration, Utc};

    fn event(global: &str, local: &str, event_type: EventType) -> TxEvent {
        TxEvent::new(
            "order-service",
            "order-1",
            global,
            local,
            Some(global.to_string()),
            event_type,
            "cancelOrder",
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn plain_events_are_accepted_and_persisted() -> Result<()> {
        let store = Arc::new(MemorySagaStore::new());
        let admission = AdmissionService::new(Arc::clone(&store));

        let outcome = admission
            .handle(event("g1", "g1", EventType::SagaStartedEvent))
            .await?;
        assert!(outcome.is_accepted());
        assert_eq!(store.all_events()?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn start_in_aborted_global_is_persisted_but_rejected() -> Result<()> {
        let store = Arc::new(MemorySagaStore::new());
        let admission = AdmissionService::new(Arc::clone(&store));

        admission
            .handle(event("g1", "g1", EventType::SagaStartedEvent))
            .await?;
        admission
            .handle(event("g1", "l1", EventType::TxAbortedEvent))
            .await?;

        let outcome = admission
            .handle(event("g1", "l2", EventType::TxStartedEvent))
            .await?;
        assert_eq!(outcome, Admission::RejectedAbortedGlobal);

        // The rejected start is still on the log for audit.
        assert_eq!(store.all_events()?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn saga_ended_is_dropped_while_a_watch_is_open() -> Result<()> {
        let store = Arc::new(MemorySagaStore::new());
        let admission = AdmissionService::new(Arc::clone(&store));

        let mut started = event("g1", "l1", EventType::TxStartedEvent);
        started.expiry_time = Utc::now() - Duration::seconds(1);
        let started = store.save(started).await?;
        store.save_timeout(TxTimeout::watch(&started)?).await?;

        let outcome = admission
            .handle(event("g1", "g1", EventType::SagaEndedEvent).with_timeout(Duration::seconds(30)))
            .await?;
        assert_eq!(outcome, Admission::RejectedStaleSagaEnded);

        // Dropped entirely: only the start event is on the log.
        assert_eq!(store.all_events()?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn infinite_expiry_saga_ended_bypasses_the_watch_gate() -> Result<()> {
        let store = Arc::new(MemorySagaStore::new());
        let admission = AdmissionService::new(Arc::clone(&store));

        let mut started = event("g1", "l1", EventType::TxStartedEvent);
        started.expiry_time = Utc::now() - Duration::seconds(1);
        let started = store.save(started).await?;
        store.save_timeout(TxTimeout::watch(&started)?).await?;

        // No timeout was ever requested for this report, so the open watch
        // does not gate it.
        let outcome = admission
            .handle(event("g1", "g1", EventType::SagaEndedEvent))
            .await?;
        assert!(outcome.is_accepted());
        assert_eq!(store.all_events()?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn saga_ended_is_accepted_once_the_watch_is_done() -> Result<()> {
        let store = Arc::new(MemorySagaStore::new());
        let admission = AdmissionService::new(Arc::clone(&store));

        let mut started = event("g1", "l1", EventType::TxStartedEvent);
        started.expiry_time = Utc::now() - Duration::seconds(1);
        let started = store.save(started).await?;
        let watch = TxTimeout::watch(&started)?;
        store.save_timeout(watch.clone()).await?;
        store.mark_timeout_done(watch.event_id).await?;

        let outcome = admission
            .handle(event("g1", "g1", EventType::SagaEndedEvent).with_timeout(Duration::seconds(30)))
            .await?;
        assert!(outcome.is_accepted());
        Ok(())
    }
}
