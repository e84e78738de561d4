//! Derived compensation jobs.
//!
//! A [`Command`] exists for every local transaction that started and ended
//! normally inside a global transaction that later aborted. Commands are the
//! only mutable artifact the reconciliation engine produces on the forward
//! path: they are claimed for dispatch and retired when the matching
//! compensated event arrives.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{EventType, TxEvent};

/// Lifecycle of a compensation job.
///
/// Transitions are monotonic: `New → Pending → Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    /// Created, not yet claimed for dispatch.
    New,
    /// Claimed by a scan cycle; a compensation request is in flight
    /// (possibly more than once across crash-recovery).
    Pending,
    /// The matching `TxCompensatedEvent` was observed.
    Done,
}

/// One dispatchable compensation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// The saga the compensated work belongs to.
    pub global_tx_id: String,
    /// The local transaction to compensate.
    pub local_tx_id: String,
    /// The parent local transaction, if any.
    pub parent_tx_id: Option<String>,
    /// The service that must execute the compensating method.
    pub service_name: String,
    /// The instance that ran the original work. Dispatch prefers it but
    /// fails over to any live instance of the same service.
    pub instance_id: String,
    /// The compensating method to invoke.
    pub compensation_method: String,
    /// The original payload, replayed to the compensating method.
    pub payload: Vec<u8>,
    /// Current job status.
    pub status: CommandStatus,
}

impl Command {
    /// Builds a `New` command from the start event of a completed local
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] when `event` is not a
    /// `TxStartedEvent`.
    pub fn from_started_event(event: &TxEvent) -> Result<Self> {
        if event.event_type != EventType::TxStartedEvent {
            return Err(Error::InvalidEvent {
                message: format!(
                    "cannot derive a command from a {} event",
                    event.event_type
                ),
            });
        }

        Ok(Self {
            global_tx_id: event.global_tx_id.clone(),
            local_tx_id: event.local_tx_id.clone(),
            parent_tx_id: event.parent_tx_id.clone(),
            service_name: event.service_name.clone(),
            instance_id: event.instance_id.clone(),
            compensation_method: event.compensation_method.clone(),
            payload: event.payload.clone(),
            status: CommandStatus::New,
        })
    }

    /// The `(global_tx_id, local_tx_id)` key, rendered for logging.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.global_tx_id, self.local_tx_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_derives_from_start_event() {
        let event = TxEvent::new(
            "order-service",
            "order-1",
            "g1",
            "l1",
            Some("g1".to_string()),
            EventType::TxStartedEvent,
            "cancelOrder",
            b"payload".to_vec(),
        );

        let command = Command::from_started_event(&event).unwrap();
        assert_eq!(command.status, CommandStatus::New);
        assert_eq!(command.compensation_method, "cancelOrder");
        assert_eq!(command.key(), "g1/l1");
    }

    #[test]
    fn command_rejects_non_start_events() {
        let event = TxEvent::new(
            "order-service",
            "order-1",
            "g1",
            "l1",
            None,
            EventType::TxEndedEvent,
            "",
            Vec::new(),
        );

        assert!(Command::from_started_event(&event).is_err());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&CommandStatus::Pending).unwrap();
        assert_eq!(json, "\"PENDING\"");
    }
}
