//! In-memory store implementation.
//!
//! [`MemorySagaStore`] implements all three storage contracts over plain
//! vectors guarded by `RwLock`s. It is the test backend and the reference
//! semantics for durable backends.
//!
//! ## Limitations
//!
//! - **Single-process only**: state is not shared across processes
//! - **No persistence**: everything is lost when the process exits

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CommandStore, EventStore, TimeoutStore};
use crate::command::{Command, CommandStatus};
use crate::error::{Error, Result};
use crate::event::{EventType, TxEvent};
use crate::timeout::{TimeoutStatus, TxTimeout};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory implementation of the event, command, and timeout stores.
#[derive(Debug, Default)]
pub struct MemorySagaStore {
    events: RwLock<Vec<TxEvent>>,
    commands: RwLock<Vec<Command>>,
    timeouts: RwLock<Vec<TxTimeout>>,
}

impl MemorySagaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every event, in arrival order. Test helper.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the lock is poisoned.
    pub fn all_events(&self) -> Result<Vec<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.clone())
    }

    /// Returns a snapshot of every command. Test helper.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the lock is poisoned.
    pub fn all_commands(&self) -> Result<Vec<Command>> {
        let commands = self.commands.read().map_err(poison_err)?;
        Ok(commands.clone())
    }

    /// Returns a snapshot of every timeout watch. Test helper.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the lock is poisoned.
    pub fn all_timeouts(&self) -> Result<Vec<TxTimeout>> {
        let timeouts = self.timeouts.read().map_err(poison_err)?;
        Ok(timeouts.clone())
    }
}

/// Minimum remaining retries across the start events of one local
/// transaction. Pairs with no start event count as zero.
fn min_start_retries(events: &[TxEvent], global_tx_id: &str, local_tx_id: &str) -> i32 {
    events
        .iter()
        .filter(|e| {
            e.global_tx_id == global_tx_id
                && e.local_tx_id == local_tx_id
                && e.event_type.is_start_type()
        })
        .map(|e| e.retries)
        .min()
        .unwrap_or(0)
}

/// True when a forward retry of the aborted local transaction was recorded
/// after the abort itself — the abort is not final yet.
fn has_later_retry(events: &[TxEvent], abort: &TxEvent) -> bool {
    events.iter().any(|e| {
        e.global_tx_id == abort.global_tx_id
            && e.local_tx_id == abort.local_tx_id
            && e.id != abort.id
            && e.creation_time > abort.creation_time
    })
}

fn contains_type(events: &[TxEvent], global_tx_id: &str, event_type: EventType) -> bool {
    events
        .iter()
        .any(|e| e.global_tx_id == global_tx_id && e.event_type == event_type)
}

fn contains_pair_type(
    events: &[TxEvent],
    global_tx_id: &str,
    local_tx_id: &str,
    event_type: EventType,
) -> bool {
    events.iter().any(|e| {
        e.global_tx_id == global_tx_id
            && e.local_tx_id == local_tx_id
            && e.event_type == event_type
    })
}

#[async_trait]
impl EventStore for MemorySagaStore {
    async fn save(&self, mut event: TxEvent) -> Result<TxEvent> {
        let mut events = self.events.write().map_err(poison_err)?;
        let next_id = i64::try_from(events.len())
            .map_err(|_| Error::storage("event log overflow"))?
            + 1;
        event.id = Some(next_id);
        events.push(event.clone());
        drop(events);

        Ok(event)
    }

    async fn find_transactions(
        &self,
        global_tx_id: &str,
        event_type: EventType,
    ) -> Result<Vec<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .filter(|e| e.global_tx_id == global_tx_id && e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn find_first_aborted_global_tx(&self) -> Result<Option<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .filter(|e| e.event_type == EventType::TxAbortedEvent)
            .filter(|e| !contains_type(&events, &e.global_tx_id, EventType::TxEndedEvent))
            .filter(|e| !contains_type(&events, &e.global_tx_id, EventType::SagaEndedEvent))
            .filter(|e| !has_later_retry(&events, e))
            .filter(|e| {
                e.global_tx_id == e.local_tx_id
                    || min_start_retries(&events, &e.global_tx_id, &e.local_tx_id) == 0
            })
            .min_by_key(|e| e.id)
            .cloned())
    }

    async fn find_timeout_events(&self, now: DateTime<Utc>) -> Result<Vec<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .filter(|e| e.event_type.is_start_type() && e.is_expired_at(now))
            .filter(|e| {
                !events.iter().any(|other| {
                    other.global_tx_id == e.global_tx_id
                        && other.local_tx_id == e.local_tx_id
                        && other.event_type != e.event_type
                })
            })
            .cloned()
            .collect())
    }

    async fn find_tx_started_event(
        &self,
        global_tx_id: &str,
        local_tx_id: &str,
    ) -> Result<Option<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .find(|e| {
                e.global_tx_id == global_tx_id
                    && e.local_tx_id == local_tx_id
                    && e.event_type == EventType::TxStartedEvent
            })
            .cloned())
    }

    async fn find_first_uncompensated_ended_event(
        &self,
        after_id: i64,
    ) -> Result<Option<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .filter(|e| e.event_type == EventType::TxEndedEvent && e.id > Some(after_id))
            .filter(|e| {
                events.iter().any(|abort| {
                    abort.global_tx_id == e.global_tx_id
                        && abort.event_type == EventType::TxAbortedEvent
                        && !has_later_retry(&events, abort)
                })
            })
            .filter(|e| {
                !contains_pair_type(
                    &events,
                    &e.global_tx_id,
                    &e.local_tx_id,
                    EventType::TxCompensatedEvent,
                )
            })
            .filter(|e| min_start_retries(&events, &e.global_tx_id, &e.local_tx_id) == 0)
            .min_by_key(|e| e.id)
            .cloned())
    }

    async fn find_started_not_compensated(&self, global_tx_id: &str) -> Result<Vec<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        let mut started: Vec<TxEvent> = events
            .iter()
            .filter(|e| {
                e.global_tx_id == global_tx_id && e.event_type == EventType::TxStartedEvent
            })
            .filter(|e| {
                contains_pair_type(&events, global_tx_id, &e.local_tx_id, EventType::TxEndedEvent)
            })
            .filter(|e| {
                !contains_pair_type(
                    &events,
                    global_tx_id,
                    &e.local_tx_id,
                    EventType::TxCompensatedEvent,
                )
            })
            .cloned()
            .collect();
        drop(events);

        started.sort_by_key(|e| e.id);
        // Duplicate start reports collapse to one logical start per local tx.
        started.dedup_by(|a, b| a.local_tx_id == b.local_tx_id);
        Ok(started)
    }

    async fn find_first_compensated_event(&self, after_id: i64) -> Result<Option<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .filter(|e| e.event_type == EventType::TxCompensatedEvent && e.id > Some(after_id))
            .min_by_key(|e| e.id)
            .cloned())
    }

    async fn has_resolution(
        &self,
        global_tx_id: &str,
        local_tx_id: &str,
        watched_type: EventType,
        after_id: i64,
    ) -> Result<bool> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events.iter().any(|e| {
            e.global_tx_id == global_tx_id
                && e.local_tx_id == local_tx_id
                && e.event_type != watched_type
                && e.id > Some(after_id)
        }))
    }

    async fn find_duplicate_events(&self, event_type: EventType) -> Result<Vec<TxEvent>> {
        let events = self.events.read().map_err(poison_err)?;
        Ok(events
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter(|e| {
                events.iter().any(|other| {
                    other.event_type == event_type
                        && other.global_tx_id == e.global_tx_id
                        && other.local_tx_id == e.local_tx_id
                        && other.id > e.id
                })
            })
            .cloned()
            .collect())
    }

    async fn delete_events(&self, ids: &[i64]) -> Result<()> {
        let mut events = self.events.write().map_err(poison_err)?;
        events.retain(|e| e.id.is_none_or(|id| !ids.contains(&id)));
        drop(events);

        Ok(())
    }
}

#[async_trait]
impl CommandStore for MemorySagaStore {
    async fn save_command(&self, command: Command) -> Result<()> {
        let mut commands = self.commands.write().map_err(poison_err)?;
        if commands.iter().any(|c| {
            c.global_tx_id == command.global_tx_id && c.local_tx_id == command.local_tx_id
        }) {
            return Err(Error::duplicate_row("command", command.key()));
        }
        commands.push(command);
        drop(commands);

        Ok(())
    }

    async fn exists(&self, global_tx_id: &str, local_tx_id: &str) -> Result<bool> {
        let commands = self.commands.read().map_err(poison_err)?;
        Ok(commands
            .iter()
            .any(|c| c.global_tx_id == global_tx_id && c.local_tx_id == local_tx_id))
    }

    async fn claim_next_group(&self) -> Result<Vec<Command>> {
        let mut commands = self.commands.write().map_err(poison_err)?;

        // Most recently inserted claimable global first.
        let claimable = commands
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, c)| c.status == CommandStatus::New)
            .find(|(_, candidate)| {
                !commands.iter().any(|c| {
                    c.global_tx_id == candidate.global_tx_id && c.status == CommandStatus::Pending
                })
            })
            .map(|(_, c)| c.global_tx_id.clone());

        let Some(global_tx_id) = claimable else {
            drop(commands);
            return Ok(Vec::new());
        };

        let mut claimed = Vec::new();
        for command in commands.iter_mut() {
            if command.global_tx_id == global_tx_id && command.status == CommandStatus::New {
                command.status = CommandStatus::Pending;
                claimed.push(command.clone());
            }
        }
        drop(commands);

        Ok(claimed)
    }

    async fn mark_command_done(&self, global_tx_id: &str, local_tx_id: &str) -> Result<()> {
        let mut commands = self.commands.write().map_err(poison_err)?;
        for command in commands.iter_mut() {
            if command.global_tx_id == global_tx_id && command.local_tx_id == local_tx_id {
                command.status = CommandStatus::Done;
            }
        }
        drop(commands);

        Ok(())
    }

    async fn find_by_status(
        &self,
        global_tx_id: &str,
        status: CommandStatus,
    ) -> Result<Vec<Command>> {
        let commands = self.commands.read().map_err(poison_err)?;
        Ok(commands
            .iter()
            .filter(|c| c.global_tx_id == global_tx_id && c.status == status)
            .cloned()
            .collect())
    }

    async fn find_uncompleted(&self, global_tx_id: &str) -> Result<Vec<Command>> {
        let commands = self.commands.read().map_err(poison_err)?;
        Ok(commands
            .iter()
            .filter(|c| c.global_tx_id == global_tx_id && c.status != CommandStatus::Done)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TimeoutStore for MemorySagaStore {
    async fn save_timeout(&self, timeout: TxTimeout) -> Result<()> {
        let mut timeouts = self.timeouts.write().map_err(poison_err)?;
        if timeouts.iter().any(|t| t.event_id == timeout.event_id) {
            return Err(Error::duplicate_row(
                "tx_timeout",
                timeout.event_id.to_string(),
            ));
        }
        timeouts.push(timeout);
        drop(timeouts);

        Ok(())
    }

    async fn claim_first_new(&self, now: DateTime<Utc>) -> Result<Option<TxTimeout>> {
        let mut timeouts = self.timeouts.write().map_err(poison_err)?;

        let claim_index = timeouts
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TimeoutStatus::New && t.expiry_time <= now)
            .min_by_key(|(_, t)| t.expiry_time)
            .map(|(index, _)| index);

        let claimed = claim_index.map(|index| {
            let watch = &mut timeouts[index];
            watch.status = TimeoutStatus::Pending;
            watch.version += 1;
            watch.clone()
        });
        drop(timeouts);

        Ok(claimed)
    }

    async fn find_active(&self) -> Result<Vec<TxTimeout>> {
        let timeouts = self.timeouts.read().map_err(poison_err)?;
        Ok(timeouts.iter().filter(|t| t.is_active()).cloned().collect())
    }

    async fn contains_active_global(&self, global_tx_id: &str) -> Result<bool> {
        let timeouts = self.timeouts.read().map_err(poison_err)?;
        Ok(timeouts
            .iter()
            .any(|t| t.global_tx_id == global_tx_id && t.is_active()))
    }

    async fn mark_timeout_done(&self, event_id: i64) -> Result<()> {
        let mut timeouts = self.timeouts.write().map_err(poison_err)?;
        for timeout in timeouts.iter_mut() {
            if timeout.event_id == event_id {
                timeout.status = TimeoutStatus::Done;
            }
        }
        drop(timeouts);

        Ok(())
    }
}
