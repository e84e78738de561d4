//! The reconciliation engine.
//!
//! [`EventScanner`] is a single repeating task that reconciles the event
//! log into compensations and saga closures. Every cycle runs the same
//! eight steps in order, each independently fallible and each logged
//! rather than fatal, so a store hiccup in one step never blocks the
//! others:
//!
//! 1. retire timeout watches whose event pair has resolved
//! 2. turn newly expired start events into timeout watches
//! 3. claim one due watch, emit its abort, and dispatch compensation for
//!    a timed-out local transaction directly
//! 4. derive compensation commands for one aborted global transaction
//! 5. claim one command group and dispatch it
//! 6. retire the command behind one compensated event, closing the saga
//!    when none remain
//! 7. close one aborted global transaction with nothing to compensate
//! 8. delete duplicate saga-ended rows
//!
//! Cycles never overlap: the next tick waits for the previous cycle to
//! finish. Cursor state lives in process memory and rewinds to the
//! store's true position on restart; every step tolerates reprocessing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn, Instrument};

use riata_core::observability::scanner_span;

use crate::callback::SagaCallback;
use crate::command::Command;
use crate::config::SagaConfig;
use crate::error::Result;
use crate::event::{EventType, TxEvent};
use crate::leader::{ClusterLeadership, LeaseStore};
use crate::metrics::{time_scan_cycle, SagaMetrics};
use crate::store::SagaStore;
use crate::timeout::TxTimeout;

/// In-memory scan positions, advanced monotonically within one process.
///
/// Cursors throttle steps 4 and 6 to one unit of work per cycle and keep
/// repeat queries cheap. They are deliberately not persisted: a restart
/// rewinds to zero and reprocesses work that every step tolerates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCursors {
    /// Surrogate id of the last ended event handled by command derivation.
    pub next_ended_event_id: i64,
    /// Surrogate id of the last compensated event handled by retirement.
    pub next_compensated_event_id: i64,
}

/// The periodic scan-and-react reconciliation task.
pub struct EventScanner<S> {
    store: Arc<S>,
    callback: Arc<dyn SagaCallback>,
    cursors: ScanCursors,
    metrics: SagaMetrics,
}

impl<S: SagaStore> EventScanner<S> {
    /// Creates a scanner over `store`, dispatching compensations through
    /// `callback`.
    pub fn new(store: Arc<S>, callback: Arc<dyn SagaCallback>) -> Self {
        Self {
            store,
            callback,
            cursors: ScanCursors::default(),
            metrics: SagaMetrics::new(),
        }
    }

    /// The current scan positions.
    #[must_use]
    pub const fn cursors(&self) -> ScanCursors {
        self.cursors
    }

    /// Runs reconciliation cycles until `shutdown` flips to true.
    ///
    /// Returns immediately when `config.event_scanner_enabled` is false:
    /// such an instance admits events but never reconciles.
    ///
    /// When `leadership` is provided, each tick first advances the lease
    /// and skips the cycle unless this instance is master. The lease is
    /// relinquished on the way out so a peer can take over immediately.
    pub async fn run<L: LeaseStore>(
        mut self,
        config: &SagaConfig,
        mut leadership: Option<ClusterLeadership<L>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if !config.event_scanner_enabled {
            info!("reconciliation engine disabled by configuration");
            return;
        }

        let mut ticker = tokio::time::interval(config.event_polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            polling_interval = ?config.event_polling_interval,
            clustered = leadership.is_some(),
            "reconciliation engine started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = Utc::now();
                    if let Some(leadership) = leadership.as_mut() {
                        if !leadership.tick(now).await.is_master() {
                            continue;
                        }
                    }
                    self.run_cycle(now).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(mut leadership) = leadership {
            if let Err(err) = leadership.relinquish().await {
                warn!(error = %err, "failed to release leadership lease on shutdown");
            }
        }
        info!("reconciliation engine stopped");
    }

    /// Runs one full reconciliation cycle at `now`.
    ///
    /// Step failures are logged and skipped; every step is retried from
    /// scratch on the next cycle.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) {
        let _timer = time_scan_cycle();

        if let Err(err) = self
            .retire_resolved_watches()
            .instrument(scanner_span("retire_resolved_watches"))
            .await
        {
            warn!(step = "retire_resolved_watches", error = %err, "reconciliation step failed");
        }
        if let Err(err) = self
            .detect_new_timeouts(now)
            .instrument(scanner_span("detect_new_timeouts"))
            .await
        {
            warn!(step = "detect_new_timeouts", error = %err, "reconciliation step failed");
        }
        if let Err(err) = self
            .abort_due_watch(now)
            .instrument(scanner_span("abort_due_watch"))
            .await
        {
            warn!(step = "abort_due_watch", error = %err, "reconciliation step failed");
        }
        if let Err(err) = self
            .derive_commands()
            .instrument(scanner_span("derive_commands"))
            .await
        {
            warn!(step = "derive_commands", error = %err, "reconciliation step failed");
        }
        if let Err(err) = self
            .dispatch_commands()
            .instrument(scanner_span("dispatch_commands"))
            .await
        {
            warn!(step = "dispatch_commands", error = %err, "reconciliation step failed");
        }
        if let Err(err) = self
            .retire_compensated_command()
            .instrument(scanner_span("retire_compensated_command"))
            .await
        {
            warn!(step = "retire_compensated_command", error = %err, "reconciliation step failed");
        }
        if let Err(err) = self
            .close_aborted_global()
            .instrument(scanner_span("close_aborted_global"))
            .await
        {
            warn!(step = "close_aborted_global", error = %err, "reconciliation step failed");
        }
        if let Err(err) = self
            .purge_duplicate_saga_ended()
            .instrument(scanner_span("purge_duplicate_saga_ended"))
            .await
        {
            warn!(step = "purge_duplicate_saga_ended", error = %err, "reconciliation step failed");
        }
    }

    /// Step 1: retire watches whose event pair resolved by any means.
    async fn retire_resolved_watches(&self) -> Result<()> {
        for watch in self.store.find_active().await? {
            let resolved = self
                .store
                .has_resolution(
                    &watch.global_tx_id,
                    &watch.local_tx_id,
                    watch.event_type,
                    watch.event_id,
                )
                .await?;
            if resolved {
                debug!(
                    global_tx_id = %watch.global_tx_id,
                    local_tx_id = %watch.local_tx_id,
                    "timeout watch resolved"
                );
                self.store.mark_timeout_done(watch.event_id).await?;
            }
        }
        Ok(())
    }

    /// Step 2: turn expired start events into `New` watches. Best-effort;
    /// a duplicate insert means another cycle got here first.
    async fn detect_new_timeouts(&self, now: DateTime<Utc>) -> Result<()> {
        for event in self.store.find_timeout_events(now).await? {
            let watch = TxTimeout::watch(&event)?;
            match self.store.save_timeout(watch).await {
                Ok(()) => {
                    info!(
                        global_tx_id = %event.global_tx_id,
                        local_tx_id = %event.local_tx_id,
                        event_type = %event.event_type,
                        "start event timed out"
                    );
                    self.metrics.record_timeout_detected();
                }
                Err(err) if err.is_duplicate() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Step 3: claim the due watch with the earliest expiry and abort it.
    ///
    /// A timed-out `TxStartedEvent` gets its compensation dispatched here
    /// directly: there is no ended event to pair against, so the command
    /// pipeline never sees it.
    async fn abort_due_watch(&self, now: DateTime<Utc>) -> Result<()> {
        let Some(watch) = self.store.claim_first_new(now).await? else {
            return Ok(());
        };

        info!(
            global_tx_id = %watch.global_tx_id,
            local_tx_id = %watch.local_tx_id,
            "aborting timed-out transaction"
        );
        self.store.save(TxEvent::aborted_from_timeout(&watch)).await?;

        if watch.event_type == EventType::TxStartedEvent {
            let started = self
                .store
                .find_tx_started_event(&watch.global_tx_id, &watch.local_tx_id)
                .await?;
            if let Some(started) = started {
                let command = Command::from_started_event(&started)?;
                if let Err(err) = self.callback.compensate(&command).await {
                    warn!(
                        command = %command.key(),
                        error = %err,
                        "compensation dispatch for timed-out transaction failed"
                    );
                }
            }
        }
        Ok(())
    }

    /// Step 4: derive commands for one aborted global transaction, keyed
    /// off the next unseen uncompensated ended event.
    async fn derive_commands(&mut self) -> Result<()> {
        let Some(ended) = self
            .store
            .find_first_uncompensated_ended_event(self.cursors.next_ended_event_id)
            .await?
        else {
            return Ok(());
        };
        self.cursors.next_ended_event_id = ended.require_id()?;

        for started in self
            .store
            .find_started_not_compensated(&ended.global_tx_id)
            .await?
        {
            if self
                .store
                .exists(&started.global_tx_id, &started.local_tx_id)
                .await?
            {
                continue;
            }
            let command = Command::from_started_event(&started)?;
            match self.store.save_command(command).await {
                Ok(()) => debug!(
                    global_tx_id = %started.global_tx_id,
                    local_tx_id = %started.local_tx_id,
                    "compensation command created"
                ),
                Err(err) if err.is_duplicate() => {}
                Err(err) => warn!(
                    global_tx_id = %started.global_tx_id,
                    local_tx_id = %started.local_tx_id,
                    error = %err,
                    "failed to create compensation command"
                ),
            }
        }
        Ok(())
    }

    /// Step 5: claim one command group and dispatch every command in it.
    ///
    /// Send failures are only logged; the push-back layer owns retry, and
    /// `Pending` commands are re-claimed after a crash anyway.
    async fn dispatch_commands(&self) -> Result<()> {
        for command in self.store.claim_next_group().await? {
            debug!(command = %command.key(), "dispatching compensation");
            if let Err(err) = self.callback.compensate(&command).await {
                warn!(
                    command = %command.key(),
                    service_name = %command.service_name,
                    error = %err,
                    "compensation dispatch failed"
                );
            }
        }
        Ok(())
    }

    /// Step 6: retire the command behind the next unseen compensated
    /// event; close the saga once no commands remain open.
    async fn retire_compensated_command(&mut self) -> Result<()> {
        let Some(compensated) = self
            .store
            .find_first_compensated_event(self.cursors.next_compensated_event_id)
            .await?
        else {
            return Ok(());
        };
        self.cursors.next_compensated_event_id = compensated.require_id()?;

        self.store
            .mark_command_done(&compensated.global_tx_id, &compensated.local_tx_id)
            .await?;

        let open = self
            .store
            .find_uncompleted(&compensated.global_tx_id)
            .await?;
        if open.is_empty() {
            info!(global_tx_id = %compensated.global_tx_id, "all compensations done, closing saga");
            self.store.save(TxEvent::saga_ended_for(&compensated)).await?;
        }
        Ok(())
    }

    /// Step 7: close one aborted global transaction that has nothing to
    /// compensate.
    async fn close_aborted_global(&self) -> Result<()> {
        let Some(abort) = self.store.find_first_aborted_global_tx().await? else {
            return Ok(());
        };
        info!(global_tx_id = %abort.global_tx_id, "closing aborted saga");
        self.store.save(TxEvent::saga_ended_for(&abort)).await?;
        Ok(())
    }

    /// Step 8: housekeeping; keep only the latest saga-ended row per
    /// global transaction.
    async fn purge_duplicate_saga_ended(&self) -> Result<()> {
        let duplicates = self
            .store
            .find_duplicate_events(EventType::SagaEndedEvent)
            .await?;
        if duplicates.is_empty() {
            return Ok(());
        }

        let ids: Vec<i64> = duplicates.iter().filter_map(|e| e.id).collect();
        debug!(count = ids.len(), "deleting duplicate saga-ended rows");
        self.store.delete_events(&ids).await?;
        Ok(())
    }
}

impl<S> std::fmt::Debug for EventScanner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScanner")
            .field("cursors", &self.cursors)
            .finish()
    }
}
