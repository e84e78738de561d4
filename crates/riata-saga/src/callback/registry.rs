//! Live callback channels, keyed by service and instance.
//!
//! Registration happens when a participant connects; the registry hands out
//! a [`Registration`] guard that removes the channel again when the
//! connection goes away. Dispatch resolves a channel by service name,
//! preferring the instance that ran the original work.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use super::SagaCallback;
use crate::error::{Error, Result};

/// Live participant channels.
///
/// Two-level map: service name to instance id to channel. Cheap to share;
/// all operations take `&self`.
#[derive(Default)]
pub struct CallbackRegistry {
    services: DashMap<String, DashMap<String, Arc<dyn SagaCallback>>>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a channel for one participant instance, replacing any
    /// previous channel for the same instance.
    pub fn register(
        &self,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        callback: Arc<dyn SagaCallback>,
    ) {
        let service_name = service_name.into();
        let instance_id = instance_id.into();
        info!(service_name, instance_id, "participant callback registered");
        self.services
            .entry(service_name)
            .or_default()
            .insert(instance_id, callback);
    }

    /// Registers a channel and returns a guard that deregisters it when the
    /// participant connection goes away.
    #[must_use]
    pub fn register_self_cleaning(
        self: &Arc<Self>,
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        callback: Arc<dyn SagaCallback>,
    ) -> Registration {
        let service_name = service_name.into();
        let instance_id = instance_id.into();
        self.register(service_name.clone(), instance_id.clone(), callback);
        Registration {
            registry: Arc::clone(self),
            service_name,
            instance_id,
        }
    }

    /// Removes one instance's channel. Returns true when it was present.
    pub fn deregister(&self, service_name: &str, instance_id: &str) -> bool {
        let Some(instances) = self.services.get(service_name) else {
            return false;
        };
        let removed = instances.remove(instance_id).is_some();
        drop(instances);
        if removed {
            debug!(service_name, instance_id, "participant callback removed");
        }
        removed
    }

    /// Resolves a channel for `service_name`, preferring
    /// `preferred_instance` and falling back to any live instance of the
    /// same service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCallbackFound`] when the service has no live
    /// channel at all.
    pub fn resolve(
        &self,
        service_name: &str,
        preferred_instance: &str,
    ) -> Result<(String, Arc<dyn SagaCallback>)> {
        let instances = self
            .services
            .get(service_name)
            .filter(|instances| !instances.is_empty())
            .ok_or_else(|| Error::NoCallbackFound {
                service_name: service_name.to_string(),
            })?;

        if let Some(exact) = instances.get(preferred_instance) {
            return Ok((preferred_instance.to_string(), Arc::clone(exact.value())));
        }

        let fallback = instances
            .iter()
            .next()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())));
        drop(instances);

        fallback.ok_or_else(|| Error::NoCallbackFound {
            service_name: service_name.to_string(),
        })
    }

    /// Number of live channels for one service.
    #[must_use]
    pub fn instance_count(&self, service_name: &str) -> usize {
        self.services
            .get(service_name)
            .map_or(0, |instances| instances.len())
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Deregisters a participant channel when dropped.
///
/// Holds the participant's place in the registry for as long as its
/// connection is alive.
pub struct Registration {
    registry: Arc<CallbackRegistry>,
    service_name: String,
    instance_id: String,
}

impl Registration {
    /// The registered service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The registered instance id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(&self.service_name, &self.instance_id);
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("service_name", &self.service_name)
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCallback {
        sends: AtomicUsize,
    }

    impl CountingCallback {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sends: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SagaCallback for CountingCallback {
        async fn compensate(&self, _command: &Command) -> Result<()> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(())
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
    async fn resolve_prefers_the_exact_instance() -> Result<()> {
        let registry = CallbackRegistry::new();
        let preferred = CountingCallback::new();
        let other = CountingCallback::new();
        registry.register("order-service", "order-1", preferred.clone());
        registry.register("order-service", "order-2", other.clone());

        let (instance, callback) = registry.resolve("order-service", "order-1")?;
        assert_eq!(instance, "order-1");
        callback.compensate(&command()).await?;
        assert_eq!(preferred.sends.load(Ordering::SeqCst), 1);
        assert_eq!(other.sends.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn resolve_fails_over_to_any_live_instance() -> Result<()> {
        let registry = CallbackRegistry::new();
        registry.register("order-service", "order-2", CountingCallback::new());

        let (instance, _) = registry.resolve("order-service", "order-1")?;
        assert_eq!(instance, "order-2");
        Ok(())
    }

    #[test]
    fn resolve_reports_missing_services() {
        let registry = CallbackRegistry::new();
        let Err(err) = registry.resolve("payment-service", "payment-1") else {
            panic!("resolve should fail for an unknown service");
        };
        assert!(matches!(err, Error::NoCallbackFound { service_name } if service_name == "payment-service"));
    }

    #[test]
    fn deregister_removes_only_the_named_instance() {
        let registry = CallbackRegistry::new();
        registry.register("order-service", "order-1", CountingCallback::new());
        registry.register("order-service", "order-2", CountingCallback::new());

        assert!(registry.deregister("order-service", "order-1"));
        assert!(!registry.deregister("order-service", "order-1"));
        assert_eq!(registry.instance_count("order-service"), 1);
    }

    #[test]
    fn registration_guard_cleans_up_on_drop() {
        let registry = Arc::new(CallbackRegistry::new());

        let guard = registry.register_self_cleaning(
            "order-service",
            "order-1",
            CountingCallback::new(),
        );
        assert_eq!(guard.service_name(), "order-service");
        assert_eq!(registry.instance_count("order-service"), 1);

        drop(guard);
        assert_eq!(registry.instance_count("order-service"), 0);
    }
}
