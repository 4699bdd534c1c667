//! Identifier lifecycle state machine.
//!
//! The [`LifecycleManager`] is the only writer of transactions. It enforces
//! transition preconditions, runs the validator, calls the registration
//! authority and records each outcome in the transaction log.

mod error;
mod manager;

pub use error::LifecycleError;
pub use manager::{LifecycleManager, SubmitMode};
