//! Metadata validation.
//!
//! Checks an identifier request against the authority's schema and the
//! domain rules before any external call. Two rule sets exist: `minimal`
//! (for drafts and reservations) and `full` (for registration).

mod probe;
mod rules;

pub use probe::{HttpLandingPageProbe, LandingPageProbe, ProbeError};
pub use rules::{RuleSet, Validator, Violation};
