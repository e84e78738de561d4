//! # riata-saga
//!
//! Saga coordination engine for the Riata distributed transaction
//! coordinator.
//!
//! This crate implements the coordinator domain, providing:
//!
//! - **Event Admission**: A single front door for participant-reported
//!   transaction events, with rejection gates for doomed work
//! - **Reconciliation**: A periodic scan-and-react engine that derives
//!   compensations from the event log and closes finished sagas
//! - **Callback Dispatch**: Failover-aware delivery of compensation
//!   requests to participant instances, with asynchronous retry
//! - **Cluster Leadership**: A lease-based guarantee that at most one
//!   coordinator instance reconciles at a time
//!
//! ## Core Concepts
//!
//! - **Global transaction (saga)**: the overall multi-service business
//!   operation, identified by `global_tx_id`
//! - **Local transaction**: one participant's piece of work, identified
//!   by `(global_tx_id, local_tx_id)`
//! - **Compensation**: the participant-defined undo of a completed local
//!   transaction, triggered when its saga aborts
//!
//! ## Guarantees
//!
//! - **Append-only truth**: participant events are immutable facts; all
//!   coordination state is derived from them and re-derivable after a crash
//! - **At-least-once compensation**: a completed local transaction in an
//!   aborted saga gets exactly one `Command`, dispatched until a
//!   compensated event retires it
//! - **Single reconciler**: with clustering enabled, the lease holder is
//!   the only instance running the reconciliation engine
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use riata_saga::admission::AdmissionService;
//! use riata_saga::callback::{CallbackRegistry, CompositeCallback, PushBackCallback};
//! use riata_saga::config::SagaConfig;
//! use riata_saga::error::Result;
//! use riata_saga::scanner::EventScanner;
//! use riata_saga::store::MemorySagaStore;
//!
//! # async fn run() -> Result<()> {
//! let config = SagaConfig::from_env()?;
//! let store = Arc::new(MemorySagaStore::new());
//! let registry = Arc::new(CallbackRegistry::new());
//!
//! let composite = Arc::new(CompositeCallback::new(Arc::clone(&registry)));
//! let callback = Arc::new(PushBackCallback::new(
//!     composite,
//!     config.compensation_retry_capacity,
//!     config.compensation_retry_delay,
//! ));
//!
//! let admission = AdmissionService::new(Arc::clone(&store));
//! let scanner = EventScanner::new(store, callback);
//! # let _ = (admission, scanner);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod callback;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod leader;
pub mod metrics;
pub mod scanner;
pub mod store;
pub mod timeout;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::admission::{Admission, AdmissionService};
    pub use crate::callback::{
        CallbackRegistry, CompositeCallback, PushBackCallback, SagaCallback,
    };
    pub use crate::command::{Command, CommandStatus};
    pub use crate::config::SagaConfig;
    pub use crate::error::{Error, Result};
    pub use crate::event::{EventType, TxEvent};
    pub use crate::leader::{ClusterLeadership, LeaseStore, MasterLease, Role};
    pub use crate::metrics::SagaMetrics;
    pub use crate::scanner::{EventScanner, ScanCursors};
    pub use crate::store::{
        CommandStore, EventStore, MemorySagaStore, SagaStore, TimeoutStore,
    };
    pub use crate::timeout::{TimeoutStatus, TxTimeout};
}
