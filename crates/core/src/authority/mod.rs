//! Registration authority abstraction.
//!
//! This module provides a `RegistrationAuthority` trait for reserving,
//! submitting and querying identifiers with an external authority, plus the
//! authority's JSON exchange document and an HTTP client implementation.

mod http;
mod record;
mod types;

pub use http::HttpRegistrationClient;
pub use record::AuthorityRecord;
pub use types::*;
