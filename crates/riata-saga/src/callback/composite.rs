//! Instance-aware dispatch with failover.
//!
//! [`CompositeCallback`] resolves a live channel for the command's service
//! from the registry and sends through it. A failed send removes the dead
//! channel and tries the next live instance of the same service, so one
//! crashed participant does not strand its compensations while a healthy
//! peer is connected.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::registry::CallbackRegistry;
use super::SagaCallback;
use crate::command::Command;
use crate::error::Result;
use crate::metrics::SagaMetrics;

/// Failover dispatch over the callback registry.
#[derive(Debug)]
pub struct CompositeCallback {
    registry: Arc<CallbackRegistry>,
    metrics: SagaMetrics,
}

impl CompositeCallback {
    /// Creates a composite dispatcher over `registry`.
    #[must_use]
    pub fn new(registry: Arc<CallbackRegistry>) -> Self {
        Self {
            registry,
            metrics: SagaMetrics::new(),
        }
    }
}

#[async_trait]
impl SagaCallback for CompositeCallback {
    /// Sends `command`, preferring the instance that ran the original work.
    ///
    /// Each failed send deregisters the dead instance before retrying, so
    /// the loop shrinks the candidate set and terminates. The terminal
    /// failure is [`Error::NoCallbackFound`](crate::error::Error::NoCallbackFound)
    /// once no instance of the service is left.
    async fn compensate(&self, command: &Command) -> Result<()> {
        loop {
            let (instance_id, callback) = self
                .registry
                .resolve(&command.service_name, &command.instance_id)
                .map_err(|err| {
                    self.metrics.record_dispatch("no_callback");
                    err
                })?;

            match callback.compensate(command).await {
                Ok(()) => {
                    self.metrics.record_dispatch("sent");
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        service_name = %command.service_name,
                        instance_id = %instance_id,
                        command = %command.key(),
                        error = %err,
                        "callback send failed, dropping instance and failing over"
                    );
                    self.metrics.record_dispatch("failed");
                    self.registry.deregister(&command.service_name, &instance_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyCallback {
        sends: AtomicUsize,
        healthy: bool,
    }

    impl FlakyCallback {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                sends: AtomicUsize::new(0),
                healthy,
            })
        }
    }

    #[async_trait]
    impl SagaCallback for FlakyCallback {
        async fn compensate(&self, command: &Command) -> Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(())
            } else {
                Err(Error::CallbackSend {
                    service_name: command.service_name.clone(),
                    instance_id: command.instance_id.clone(),
                    message: "stream reset".into(),
                })
            }
        }
    }

    fn command() -> Command {
        Command {
            global_tx_id: "g1".into(),
            local_tx_id: "l1".into(),
            parent_tx_id: None,
            service_name: "order-service".into(),
            instance_id: "order-1".into(),
            compensation_method: "cancelOrder".into(),
            payload: Vec::new(),
            status: CommandStatus::Pending,
        }
    }

    #[tokio::test]
    async fn failed_send_fails_over_to_a_healthy_peer() -> Result<()> {
        let registry = Arc::new(CallbackRegistry::new());
        let dead = FlakyCallback::new(false);
        let live = FlakyCallback::new(true);
        registry.register("order-service", "order-1", dead.clone());
        registry.register("order-service", "order-2", live.clone());

        let composite = CompositeCallback::new(Arc::clone(&registry));
        composite.compensate(&command()).await?;

        assert_eq!(dead.sends.load(Ordering::SeqCst), 1);
        assert_eq!(live.sends.load(Ordering::SeqCst), 1);
        // The dead instance was evicted.
        assert_eq!(registry.instance_count("order-service"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn exhausting_all_instances_reports_no_callback() {
        let registry = Arc::new(CallbackRegistry::new());
        registry.register("order-service", "order-1", FlakyCallback::new(false));

        let composite = CompositeCallback::new(Arc::clone(&registry));
        let err = composite.compensate(&command()).await.unwrap_err();
        assert!(matches!(err, Error::NoCallbackFound { .. }));
        assert_eq!(registry.instance_count("order-service"), 0);
    }

    #[tokio::test]
    async fn unknown_service_reports_no_callback_without_sending() {
        let registry = Arc::new(CallbackRegistry::new());
        let composite = CompositeCallback::new(registry);

        let err = composite.compensate(&command()).await.unwrap_err();
        assert!(matches!(err, Error::NoCallbackFound { .. }));
    }
}
