//! Storage contracts for the coordinator.
//!
//! This module defines the repository traits the reconciliation engine and
//! admission service are written against:
//!
//! - [`EventStore`]: the append-only transaction event log
//! - [`CommandStore`]: derived compensation jobs
//! - [`TimeoutStore`]: timeout watch entries
//!
//! ## Design Principles
//!
//! - **Backend agnostic**: the same predicates work over SQL tables or the
//!   in-memory backend used by tests
//! - **Store-level atomicity**: claim operations flip status and return the
//!   claimed rows in one step; callers never lock around them
//! - **Duplicate-tolerant**: duplicate inserts surface as
//!   [`Error::DuplicateRow`](crate::error::Error::DuplicateRow) so
//!   best-effort steps can log and move on

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::command::{Command, CommandStatus};
use crate::error::Result;
use crate::event::{EventType, TxEvent};
use crate::timeout::TxTimeout;

pub use memory::MemorySagaStore;

/// The append-only transaction event log.
///
/// Events are keyed by a store-assigned, strictly increasing surrogate id
/// that defines arrival order. All predicates treat
/// `(global_tx_id, local_tx_id, event_type)` as non-unique.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends an event and returns it with its surrogate id assigned.
    async fn save(&self, event: TxEvent) -> Result<TxEvent>;

    /// Finds all events of `event_type` within `global_tx_id`.
    async fn find_transactions(
        &self,
        global_tx_id: &str,
        event_type: EventType,
    ) -> Result<Vec<TxEvent>>;

    /// Finds one aborted global transaction ready for direct closure.
    ///
    /// The match is a `TxAbortedEvent` whose global transaction has no
    /// `TxEndedEvent` or `SagaEndedEvent`, no later event for the same
    /// local transaction (a forward retry still in flight), and whose start
    /// events report no remaining retries — unless the abort is the root
    /// transaction itself.
    async fn find_first_aborted_global_tx(&self) -> Result<Option<TxEvent>>;

    /// Finds start-type events whose expiry passed before `now` with no
    /// event of a different type recorded for the same
    /// `(global_tx_id, local_tx_id)` pair.
    async fn find_timeout_events(&self, now: DateTime<Utc>) -> Result<Vec<TxEvent>>;

    /// Finds the `TxStartedEvent` for one local transaction.
    async fn find_tx_started_event(
        &self,
        global_tx_id: &str,
        local_tx_id: &str,
    ) -> Result<Option<TxEvent>>;

    /// Finds the first `TxEndedEvent` with surrogate id greater than
    /// `after_id` whose global transaction aborted (with no forward retry
    /// recorded after the abort and no remaining start retries) and whose
    /// local transaction has no `TxCompensatedEvent` yet.
    async fn find_first_uncompensated_ended_event(
        &self,
        after_id: i64,
    ) -> Result<Option<TxEvent>>;

    /// Finds, within one global transaction, the start events of local
    /// transactions that ended normally but have not been compensated —
    /// one per distinct local transaction, in surrogate-id order.
    async fn find_started_not_compensated(&self, global_tx_id: &str) -> Result<Vec<TxEvent>>;

    /// Finds the first `TxCompensatedEvent` with surrogate id greater than
    /// `after_id`.
    async fn find_first_compensated_event(&self, after_id: i64) -> Result<Option<TxEvent>>;

    /// Returns true when any event with a type other than `watched_type`
    /// and a surrogate id greater than `after_id` exists for the pair —
    /// i.e. the watched start event has resolved.
    async fn has_resolution(
        &self,
        global_tx_id: &str,
        local_tx_id: &str,
        watched_type: EventType,
        after_id: i64,
    ) -> Result<bool>;

    /// Finds events of `event_type` that have a later duplicate with the
    /// same `(global_tx_id, local_tx_id)`. The latest copy is never
    /// returned.
    async fn find_duplicate_events(&self, event_type: EventType) -> Result<Vec<TxEvent>>;

    /// Deletes events by surrogate id. Missing ids are ignored.
    async fn delete_events(&self, ids: &[i64]) -> Result<()>;
}

/// Derived compensation jobs, keyed by `(global_tx_id, local_tx_id)`.
#[async_trait]
pub trait CommandStore: Send + Sync {
    /// Inserts a command.
    ///
    /// # Errors
    ///
    /// Returns a duplicate-row error when a command for the same
    /// `(global_tx_id, local_tx_id)` already exists, in any status.
    async fn save_command(&self, command: Command) -> Result<()>;

    /// Returns true when a command exists for the pair, in any status.
    async fn exists(&self, global_tx_id: &str, local_tx_id: &str) -> Result<bool>;

    /// Atomically claims the most recent global transaction that has `New`
    /// commands and none already `Pending`: flips its `New` commands to
    /// `Pending` and returns them.
    ///
    /// Returns an empty vec when nothing is claimable.
    async fn claim_next_group(&self) -> Result<Vec<Command>>;

    /// Marks the command for the pair as `Done`.
    async fn mark_command_done(&self, global_tx_id: &str, local_tx_id: &str) -> Result<()>;

    /// Finds commands of one global transaction in the given status.
    async fn find_by_status(
        &self,
        global_tx_id: &str,
        status: CommandStatus,
    ) -> Result<Vec<Command>>;

    /// Finds commands of one global transaction that are not yet `Done`.
    async fn find_uncompleted(&self, global_tx_id: &str) -> Result<Vec<Command>>;
}

/// Timeout watch entries, keyed by the watched event's surrogate id.
#[async_trait]
pub trait TimeoutStore: Send + Sync {
    /// Inserts a watch.
    ///
    /// # Errors
    ///
    /// Returns a duplicate-row error when a watch for the same event id
    /// already exists.
    async fn save_timeout(&self, timeout: TxTimeout) -> Result<()>;

    /// Atomically claims the `New` watch with the earliest expiry not after
    /// `now`: flips it to `Pending`, bumps its version, and returns it.
    async fn claim_first_new(&self, now: DateTime<Utc>) -> Result<Option<TxTimeout>>;

    /// Finds all watches that are not yet `Done`.
    async fn find_active(&self) -> Result<Vec<TxTimeout>>;

    /// Returns true when any non-`Done` watch exists for the global
    /// transaction. This is the admission gate for late saga-ended reports.
    async fn contains_active_global(&self, global_tx_id: &str) -> Result<bool>;

    /// Marks the watch for `event_id` as `Done`.
    async fn mark_timeout_done(&self, event_id: i64) -> Result<()>;
}

/// The full storage surface the coordinator needs, for use as a single
/// generic bound.
pub trait SagaStore: EventStore + CommandStore + TimeoutStore {}

impl<T: EventStore + CommandStore + TimeoutStore> SagaStore for T {}
