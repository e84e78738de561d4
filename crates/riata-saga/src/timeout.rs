//! Timeout watch entries.
//!
//! A [`TxTimeout`] is a scheduled check on a start-type event whose expiry
//! passed with no terminal counterpart. Watches are claimed and aborted by
//! the reconciliation engine, and retired once the underlying pair resolves
//! by any means — normal end, compensation, or an abort the engine did not
//! perform itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::event::{EventType, TxEvent};

/// Lifecycle of a timeout watch. Transitions are monotonic:
/// `New → Pending → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeoutStatus {
    /// Watch created, abort not yet claimed.
    New,
    /// Claimed by a scan cycle; the abort event is being emitted.
    Pending,
    /// The underlying event pair resolved; the watch is retired.
    Done,
}

/// One timeout watch over a start-type event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxTimeout {
    /// Surrogate id of the watched start event.
    pub event_id: i64,
    /// Service that reported the watched event.
    pub service_name: String,
    /// Instance that reported the watched event.
    pub instance_id: String,
    /// The saga of the watched event.
    pub global_tx_id: String,
    /// The local transaction of the watched event.
    pub local_tx_id: String,
    /// The parent local transaction, if any.
    pub parent_tx_id: Option<String>,
    /// The watched start type (`SagaStartedEvent` or `TxStartedEvent`).
    pub event_type: EventType,
    /// When the watched event expired.
    pub expiry_time: DateTime<Utc>,
    /// Current watch status.
    pub status: TimeoutStatus,
    /// Optimistic concurrency version, bumped on every claim. Defense in
    /// depth against a brief dual-leader window.
    pub version: u64,
}

impl TxTimeout {
    /// Builds a `New` watch over a persisted, expired start-type event.
    ///
    /// # Errors
    ///
    /// Returns an error when `event` has no store-assigned surrogate id.
    pub fn watch(event: &TxEvent) -> Result<Self> {
        Ok(Self {
            event_id: event.require_id()?,
            service_name: event.service_name.clone(),
            instance_id: event.instance_id.clone(),
            global_tx_id: event.global_tx_id.clone(),
            local_tx_id: event.local_tx_id.clone(),
            parent_tx_id: event.parent_tx_id.clone(),
            event_type: event.event_type,
            expiry_time: event.expiry_time,
            status: TimeoutStatus::New,
            version: 0,
        })
    }

    /// Returns true while the watch has not been retired.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self.status, TimeoutStatus::Done)
    }
}
