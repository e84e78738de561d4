//! Cluster behavior: participant instance failover and leadership handoff
//! around the reconciliation engine.

use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::watch;

use riata_saga::admission::AdmissionService;
use riata_saga::callback::{CallbackRegistry, CompositeCallback, SagaCallback};
use riata_saga::command::Command;
use riata_saga::config::SagaConfig;
use riata_saga::error::{Error, Result};
use riata_saga::event::{EventType, TxEvent};
use riata_saga::leader::{ClusterLeadership, MemoryLeaseStore, Role};
use riata_saga::scanner::EventScanner;
use riata_saga::store::MemorySagaStore;

/// A participant channel that can be told to fail every send.
struct Participant {
    received: Mutex<Vec<Command>>,
    healthy: bool,
}

impl Participant {
    fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
            healthy,
        })
    }

    fn received(&self) -> Vec<Command> {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl SagaCallback for Participant {
    async fn compensate(&self, command: &Command) -> Result<()> {
        if !self.healthy {
            return Err(Error::CallbackSend {
                service_name: command.service_name.clone(),
                instance_id: command.instance_id.clone(),
                message: "connection reset".into(),
            });
        }
        self.received.lock().unwrap().push(command.clone());
        Ok(())
    }
}

fn event(global: &str, local: &str, event_type: EventType) -> TxEvent {
    TxEvent::new(
        "order-service",
        "order-1",
        global,
        local,
        Some(global.to_string()),
        event_type,
        "cancelOrder",
        b"order payload".to_vec(),
    )
}

async fn seed_aborted_saga(admission: &AdmissionService<MemorySagaStore>) -> Result<()> {
    admission.handle(event("g1", "g1", EventType::SagaStartedEvent)).await?;
    admission.handle(event("g1", "l1", EventType::TxStartedEvent)).await?;
    admission.handle(event("g1", "l1", EventType::TxEndedEvent)).await?;
    admission.handle(event("g1", "l2", EventType::TxAbortedEvent)).await?;
    Ok(())
}

#[tokio::test]
async fn compensation_fails_over_to_a_peer_of_the_original_instance() -> Result<()> {
    let store = Arc::new(MemorySagaStore::new());
    let admission = AdmissionService::new(Arc::clone(&store));
    seed_aborted_saga(&admission).await?;

    // order-1 ran the original work but its channel is dead; order-2 of the
    // same service is healthy.
    let registry = Arc::new(CallbackRegistry::new());
    let dead = Participant::new(false);
    let peer = Participant::new(true);
    registry.register("order-service", "order-1", dead.clone());
    registry.register("order-service", "order-2", peer.clone());

    let composite = Arc::new(CompositeCallback::new(Arc::clone(&registry)));
    let mut scanner = EventScanner::new(Arc::clone(&store), composite);
    scanner.run_cycle(Utc::now()).await;

    let received = peer.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].local_tx_id, "l1");
    assert!(dead.received().is_empty());
    // The dead channel was evicted along the way.
    assert_eq!(registry.instance_count("order-service"), 1);
    Ok(())
}

#[tokio::test]
async fn disconnected_instance_is_skipped_entirely() -> Result<()> {
    let store = Arc::new(MemorySagaStore::new());
    let admission = AdmissionService::new(Arc::clone(&store));
    seed_aborted_saga(&admission).await?;

    let registry = Arc::new(CallbackRegistry::new());
    let peer = Participant::new(true);
    let guard = registry.register_self_cleaning(
        "order-service",
        "order-1",
        Participant::new(true) as Arc<dyn SagaCallback>,
    );
    registry.register("order-service", "order-2", peer.clone());

    // The original instance disconnects before dispatch.
    drop(guard);

    let composite = Arc::new(CompositeCallback::new(Arc::clone(&registry)));
    let mut scanner = EventScanner::new(Arc::clone(&store), composite);
    scanner.run_cycle(Utc::now()).await;

    assert_eq!(peer.received().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn scanner_loop_reconciles_as_master_and_stops_on_shutdown() -> Result<()> {
    let store = Arc::new(MemorySagaStore::new());
    let admission = AdmissionService::new(Arc::clone(&store));
    seed_aborted_saga(&admission).await?;

    let registry = Arc::new(CallbackRegistry::new());
    let participant = Participant::new(true);
    registry.register("order-service", "order-1", participant.clone());
    let composite = Arc::new(CompositeCallback::new(registry));

    let config = SagaConfig {
        event_polling_interval: StdDuration::from_millis(50),
        ..SagaConfig::default()
    };
    let lease_store = Arc::new(MemoryLeaseStore::new());
    let leadership = ClusterLeadership::new(
        Arc::clone(&lease_store),
        config.service_name.clone(),
        "node-1",
        Duration::seconds(5),
    );

    let scanner = EventScanner::new(Arc::clone(&store), composite);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = {
        let config = config.clone();
        tokio::spawn(async move { scanner.run(&config, Some(leadership), shutdown_rx).await })
    };

    // Let a few cycles run under paused time.
    while participant.received().is_empty() {
        tokio::time::sleep(StdDuration::from_millis(25)).await;
    }

    shutdown_tx.send(true).expect("engine still listening");
    engine.await.expect("engine task panicked");

    // The lease was released on shutdown; a standby acquires immediately.
    let mut standby = ClusterLeadership::new(
        lease_store,
        config.service_name,
        "node-2",
        Duration::seconds(5),
    );
    assert_eq!(standby.tick(Utc::now()).await, Role::Master);
    Ok(())
}

#[tokio::test]
async fn slave_does_not_reconcile_until_the_lease_lapses() -> Result<()> {
    let lease_store = Arc::new(MemoryLeaseStore::new());
    let mut master = ClusterLeadership::new(
        Arc::clone(&lease_store),
        "riata",
        "node-1",
        Duration::seconds(5),
    );
    let mut standby = ClusterLeadership::new(
        Arc::clone(&lease_store),
        "riata",
        "node-2",
        Duration::seconds(5),
    );

    let now = Utc::now();
    assert_eq!(master.tick(now).await, Role::Master);
    assert_eq!(standby.tick(now).await, Role::Slave);

    // While it is slave, the standby must not run a cycle at all; the
    // engine loop enforces this by checking the role before each cycle.
    assert!(!standby.is_master());

    // The master crashes without releasing; the standby takes over only
    // after expiry.
    let before_expiry = now + Duration::seconds(4);
    assert_eq!(standby.tick(before_expiry).await, Role::Slave);
    let after_expiry = now + Duration::seconds(6);
    assert_eq!(standby.tick(after_expiry).await, Role::Master);
    Ok(())
}
