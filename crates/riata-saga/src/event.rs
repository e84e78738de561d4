//! The transaction event model.
//!
//! A [`TxEvent`] is an immutable fact reported by a participant (or derived
//! by the reconciliation engine) about one local transaction within a saga.
//! Events are append-only; the store assigns a surrogate id that defines
//! arrival order. `(global_tx_id, local_tx_id, event_type)` is **not**
//! unique — duplicates can arrive over the wire and every consumer must
//! tolerate them.
//!
//! ## Wire conventions
//!
//! Events serialize with camelCase field names. A missing parent transaction
//! is carried as the empty string on the wire and as `None` in memory.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::timeout::TxTimeout;

/// The expiry sentinel for events with no requested timeout.
///
/// An event whose `expiry_time` equals this value never times out.
#[must_use]
pub const fn infinite_expiry() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

/// The lifecycle stage an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A new global transaction (saga) began.
    SagaStartedEvent,
    /// A participant began a local transaction.
    TxStartedEvent,
    /// A participant completed a local transaction normally.
    TxEndedEvent,
    /// A local transaction failed, dooming its global transaction.
    TxAbortedEvent,
    /// A participant finished executing a compensating method.
    TxCompensatedEvent,
    /// The global transaction is closed; no further work remains.
    SagaEndedEvent,
}

impl EventType {
    /// Returns the wire string form of this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SagaStartedEvent => "SagaStartedEvent",
            Self::TxStartedEvent => "TxStartedEvent",
            Self::TxEndedEvent => "TxEndedEvent",
            Self::TxAbortedEvent => "TxAbortedEvent",
            Self::TxCompensatedEvent => "TxCompensatedEvent",
            Self::SagaEndedEvent => "SagaEndedEvent",
        }
    }

    /// Returns true for the two start-type events that can be watched for
    /// timeout.
    #[must_use]
    pub const fn is_start_type(self) -> bool {
        matches!(self, Self::SagaStartedEvent | Self::TxStartedEvent)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SagaStartedEvent" => Ok(Self::SagaStartedEvent),
            "TxStartedEvent" => Ok(Self::TxStartedEvent),
            "TxEndedEvent" => Ok(Self::TxEndedEvent),
            "TxAbortedEvent" => Ok(Self::TxAbortedEvent),
            "TxCompensatedEvent" => Ok(Self::TxCompensatedEvent),
            "SagaEndedEvent" => Ok(Self::SagaEndedEvent),
            other => Err(Error::InvalidEvent {
                message: format!("unknown event type '{other}'"),
            }),
        }
    }
}

/// One immutable transaction lifecycle fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxEvent {
    /// Store-assigned surrogate id; `None` until the event is persisted.
    ///
    /// Surrogate ids are strictly increasing and define arrival order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// The participant service that reported the event.
    pub service_name: String,
    /// The specific participant instance that reported the event.
    pub instance_id: String,
    /// When the event was created at the reporting side.
    pub creation_time: DateTime<Utc>,
    /// The saga this event belongs to.
    pub global_tx_id: String,
    /// The local transaction this event describes.
    pub local_tx_id: String,
    /// The parent local transaction, if any. Empty string on the wire.
    #[serde(with = "wire_parent")]
    pub parent_tx_id: Option<String>,
    /// The lifecycle stage being reported.
    pub event_type: EventType,
    /// The compensating method to invoke if this work must be undone.
    pub compensation_method: String,
    /// Opaque participant payload, replayed verbatim on compensation.
    pub payload: Vec<u8>,
    /// `creation_time + timeout`, or [`infinite_expiry`] when no timeout
    /// was requested.
    pub expiry_time: DateTime<Utc>,
    /// The forward-retry method, when the participant retries instead of
    /// compensating.
    pub retry_method: String,
    /// Remaining forward-retry attempts at emission time. A start event
    /// with `retries > 0` is not final: more attempts may still follow.
    pub retries: i32,
}

impl TxEvent {
    /// Creates a new unpersisted event with no timeout and no retries.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        global_tx_id: impl Into<String>,
        local_tx_id: impl Into<String>,
        parent_tx_id: Option<String>,
        event_type: EventType,
        compensation_method: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: None,
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            creation_time: Utc::now(),
            global_tx_id: global_tx_id.into(),
            local_tx_id: local_tx_id.into(),
            parent_tx_id,
            event_type,
            compensation_method: compensation_method.into(),
            payload,
            expiry_time: infinite_expiry(),
            retry_method: String::new(),
            retries: 0,
        }
    }

    /// Sets the expiry to `creation_time + timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.expiry_time = self
            .creation_time
            .checked_add_signed(timeout)
            .unwrap_or_else(infinite_expiry);
        self
    }

    /// Sets the forward-retry method and remaining attempt count.
    #[must_use]
    pub fn with_retries(mut self, retry_method: impl Into<String>, retries: i32) -> Self {
        self.retry_method = retry_method.into();
        self.retries = retries;
        self
    }

    /// Returns true when a timeout was requested for this event.
    #[must_use]
    pub fn has_finite_expiry(&self) -> bool {
        self.expiry_time != infinite_expiry()
    }

    /// Returns true when the event's expiry has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry_time < now
    }

    /// Builds the abort event emitted when a timeout watch fires.
    #[must_use]
    pub fn aborted_from_timeout(watch: &TxTimeout) -> Self {
        Self::new(
            watch.service_name.clone(),
            watch.instance_id.clone(),
            watch.global_tx_id.clone(),
            watch.local_tx_id.clone(),
            watch.parent_tx_id.clone(),
            EventType::TxAbortedEvent,
            "",
            b"Transaction timeout".to_vec(),
        )
    }

    /// Builds the closing event for the global transaction `event` belongs
    /// to.
    ///
    /// The saga-ended event uses the global tx id for both ids and carries
    /// no parent and no payload.
    #[must_use]
    pub fn saga_ended_for(event: &Self) -> Self {
        Self::new(
            event.service_name.clone(),
            event.instance_id.clone(),
            event.global_tx_id.clone(),
            event.global_tx_id.clone(),
            None,
            EventType::SagaEndedEvent,
            "",
            Vec::new(),
        )
    }

    /// Synthesizes the start-shaped compensation request dispatched to a
    /// participant for one claimed [`Command`].
    #[must_use]
    pub fn compensation_request(command: &Command) -> Self {
        Self::new(
            command.service_name.clone(),
            command.instance_id.clone(),
            command.global_tx_id.clone(),
            command.local_tx_id.clone(),
            command.parent_tx_id.clone(),
            EventType::TxStartedEvent,
            command.compensation_method.clone(),
            command.payload.clone(),
        )
    }

    /// Returns the surrogate id, failing when the event was never persisted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] when the store has not assigned an id.
    pub fn require_id(&self) -> Result<i64> {
        self.id.ok_or_else(|| Error::InvalidEvent {
            message: format!(
                "event {}/{} ({}) has no surrogate id",
                self.global_tx_id, self.local_tx_id, self.event_type
            ),
        })
    }
}

/// Serde adapter for the empty-string-means-absent parent convention.
mod wire_parent {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value.as_deref().unwrap_or(""))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() { Ok(None) } else { Ok(Some(raw)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandStatus;
    use crate::timeout::TimeoutStatus;

    fn started_event() -> TxEvent {
        TxEvent::new(
            "order-service",
            "order-1",
            "g1",
            "l1",
            Some("g1".to_string()),
            EventType::TxStartedEvent,
            "cancelOrder",
            b"order payload".to_vec(),
        )
    }

    #[test]
    fn event_type_round_trips_through_wire_strings() {
        for event_type in [
            EventType::SagaStartedEvent,
            EventType::TxStartedEvent,
            EventType::TxEndedEvent,
            EventType::TxAbortedEvent,
            EventType::TxCompensatedEvent,
            EventType::SagaEndedEvent,
        ] {
            let parsed: EventType = event_type.as_str().parse().unwrap();
            assert_eq!(parsed, event_type);
        }

        assert!("NotAnEvent".parse::<EventType>().is_err());
    }

    #[test]
    fn start_types_are_watchable() {
        assert!(EventType::SagaStartedEvent.is_start_type());
        assert!(EventType::TxStartedEvent.is_start_type());
        assert!(!EventType::TxEndedEvent.is_start_type());
        assert!(!EventType::SagaEndedEvent.is_start_type());
    }

    #[test]
    fn timeout_sets_finite_expiry() {
        let event = started_event();
        assert!(!event.has_finite_expiry());

        let event = event.with_timeout(Duration::seconds(5));
        assert!(event.has_finite_expiry());
        assert_eq!(event.expiry_time, event.creation_time + Duration::seconds(5));
        assert!(!event.is_expired_at(event.creation_time));
        assert!(event.is_expired_at(event.creation_time + Duration::seconds(6)));
    }

    #[test]
    fn infinite_expiry_never_passes() {
        let event = started_event();
        assert!(!event.is_expired_at(Utc::now() + Duration::days(365_000)));
    }

    #[test]
    fn parent_serializes_as_empty_string() {
        let mut event = started_event();
        event.parent_tx_id = None;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["parentTxId"], "");

        let round: TxEvent = serde_json::from_value(json).unwrap();
        assert_eq!(round.parent_tx_id, None);
    }

    #[test]
    fn parent_round_trips_when_present() {
        let event = started_event();
        let json = serde_json::to_string(&event).unwrap();
        let round: TxEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(round.parent_tx_id.as_deref(), Some("g1"));
    }

    #[test]
    fn abort_from_timeout_carries_watch_identity() {
        let watch = TxTimeout {
            event_id: 7,
            service_name: "order-service".into(),
            instance_id: "order-1".into(),
            global_tx_id: "g1".into(),
            local_tx_id: "l1".into(),
            parent_tx_id: None,
            event_type: EventType::TxStartedEvent,
            expiry_time: Utc::now(),
            status: TimeoutStatus::Pending,
            version: 1,
        };

        let abort = TxEvent::aborted_from_timeout(&watch);
        assert_eq!(abort.event_type, EventType::TxAbortedEvent);
        assert_eq!(abort.global_tx_id, "g1");
        assert_eq!(abort.local_tx_id, "l1");
        assert_eq!(abort.payload, b"Transaction timeout");
    }

    #[test]
    fn saga_ended_uses_global_id_for_both_ids() {
        let ended = TxEvent::saga_ended_for(&started_event());
        assert_eq!(ended.event_type, EventType::SagaEndedEvent);
        assert_eq!(ended.global_tx_id, "g1");
        assert_eq!(ended.local_tx_id, "g1");
        assert_eq!(ended.parent_tx_id, None);
        assert!(ended.payload.is_empty());
    }

    #[test]
    fn compensation_request_mirrors_command() {
        let command = Command {
            global_tx_id: "g1".into(),
            local_tx_id: "l1".into(),
            parent_tx_id: Some("g1".into()),
            service_name: "order-service".into(),
            instance_id: "order-1".into(),
            compensation_method: "cancelOrder".into(),
            payload: b"order payload".to_vec(),
            status: CommandStatus::Pending,
        };

        let request = TxEvent::compensation_request(&command);
        assert_eq!(request.event_type, EventType::TxStartedEvent);
        assert_eq!(request.compensation_method, "cancelOrder");
        assert_eq!(request.payload, b"order payload");
        assert_eq!(request.service_name, "order-service");
    }

    #[test]
    fn require_id_rejects_unpersisted_events() {
        let event = started_event();
        assert!(event.require_id().is_err());

        let mut persisted = started_event();
        persisted.id = Some(3);
        assert_eq!(persisted.require_id().unwrap(), 3);
    }
}
