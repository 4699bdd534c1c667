use serde::{Deserialize, Serialize};

/// A record contributor as sent to the authority.
///
/// The supplied name is always kept verbatim in `full_name`. First and last
/// names are only filled in when the name matches one of the recognised
/// personal-name shapes: "First Last", "F. Last" or "Last, First".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contributor {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl Contributor {
    pub fn parse(name: &str) -> Self {
        let full_name = name.trim().to_string();
        let (first_name, last_name) = match split_personal_name(&full_name) {
            Some((first, last)) => (Some(first), Some(last)),
            None => (None, None),
        };
        Self {
            full_name,
            first_name,
            last_name,
        }
    }

    /// Whether the name was recognised as a personal name.
    pub fn is_parsed(&self) -> bool {
        self.first_name.is_some() && self.last_name.is_some()
    }
}

fn split_personal_name(name: &str) -> Option<(String, String)> {
    if let Some((last, first)) = name.split_once(',') {
        let (last, first) = (last.trim(), first.trim());
        if is_name_token(last) && !first.is_empty() && first.split_whitespace().all(is_name_token)
        {
            return Some((first.to_string(), last.to_string()));
        }
        return None;
    }

    let tokens: Vec<&str> = name.split_whitespace().collect();
    match tokens.as_slice() {
        [first, last] if is_name_token(first) && is_name_token(last) => {
            Some((first.to_string(), last.to_string()))
        }
        _ => None,
    }
}

fn is_name_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() => {}
        _ => return false,
    }
    token
        .chars()
        .all(|c| c.is_alphabetic() || c == '.' || c == '-' || c == '\'')
}
