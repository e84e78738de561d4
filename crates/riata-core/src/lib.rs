//! # riata-core
//!
//! Core abstractions for the Riata saga transaction coordinator.
//!
//! This crate provides the foundational pieces shared by all Riata
//! components:
//!
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Structured logging initialization and span helpers
//!
//! ## Crate Boundary
//!
//! `riata-core` is the **only** crate allowed to define shared primitives.
//! The coordinator engine (`riata-saga`) builds its domain model on top of
//! these contracts and never redefines them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use riata_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::observability::{init_logging, saga_span, LogFormat};
}

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use observability::{init_logging, saga_span, scanner_span, LogFormat};
