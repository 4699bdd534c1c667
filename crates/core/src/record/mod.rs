//! Identifier records: lifecycle states, caller requests and the projected
//! record view built from the transaction log.

mod contributor;
mod node;
mod types;

pub use contributor::Contributor;
pub use node::{is_known_node, node_long_name, Node, NODES};
pub use types::*;
