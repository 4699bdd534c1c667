//! Discipline nodes allowed to submit identifier requests.

/// A submitting discipline node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Node {
    /// Short id used in requests (e.g., "eng").
    pub id: &'static str,
    /// Long name sent to the authority as the contributing organisation.
    pub long_name: &'static str,
}

pub const NODES: &[Node] = &[
    Node {
        id: "atm",
        long_name: "Planetary Data System: Atmospheres Node",
    },
    Node {
        id: "eng",
        long_name: "Planetary Data System: Engineering Node",
    },
    Node {
        id: "geo",
        long_name: "Planetary Data System: Geosciences Node",
    },
    Node {
        id: "img",
        long_name: "Planetary Data System: Cartography and Imaging Sciences Node",
    },
    Node {
        id: "naif",
        long_name: "Planetary Data System: Navigational and Ancillary Information Facility Node",
    },
    Node {
        id: "ppi",
        long_name: "Planetary Data System: Planetary Plasma Interactions Node",
    },
    Node {
        id: "rms",
        long_name: "Planetary Data System: Ring-Moon Systems Node",
    },
    Node {
        id: "sbn",
        long_name: "Planetary Data System: Small Bodies Node",
    },
];

/// Look up a node's long name. Ids are matched case-insensitively.
pub fn node_long_name(id: &str) -> Option<&'static str> {
    let id = id.trim();
    NODES
        .iter()
        .find(|n| n.id.eq_ignore_ascii_case(id))
        .map(|n| n.long_name)
}

pub fn is_known_node(id: &str) -> bool {
    node_long_name(id).is_some()
}
