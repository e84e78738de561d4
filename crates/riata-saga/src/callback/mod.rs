//! Participant callback channels.
//!
//! Compensation is executed by participants, not by the coordinator: the
//! coordinator sends a compensation request down a callback channel and the
//! participant reports a `TxCompensatedEvent` when the work is done. This
//! module provides the channel abstraction and the layered senders built on
//! top of it:
//!
//! - [`SagaCallback`]: one send path to one participant channel
//! - [`CallbackRegistry`]: live channels, keyed by service and instance
//! - [`CompositeCallback`]: instance-aware dispatch with failover across
//!   instances of the same service
//! - [`PushBackCallback`]: asynchronous retry of failed sends through a
//!   bounded queue
//!
//! The production stack composes them as
//! `PushBackCallback(CompositeCallback(CallbackRegistry))`: exact-instance
//! delivery when possible, any-instance failover when not, push-back retry
//! when nobody is reachable right now.

pub mod composite;
pub mod registry;
pub mod retry;

use async_trait::async_trait;

use crate::command::Command;
use crate::error::Result;

pub use composite::CompositeCallback;
pub use registry::{CallbackRegistry, Registration};
pub use retry::PushBackCallback;

/// One send path for compensation requests.
///
/// Implementations must be cheap to call concurrently; the reconciliation
/// engine dispatches whole command groups without serializing on the
/// callback.
#[async_trait]
pub trait SagaCallback: Send + Sync {
    /// Sends one compensation request to a participant.
    ///
    /// Success means the request was handed to the channel, not that the
    /// compensating method ran: completion is only ever observed through a
    /// `TxCompensatedEvent` arriving at admission.
    async fn compensate(&self, command: &Command) -> Result<()>;
}
