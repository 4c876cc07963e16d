//! Identifier generation
//!
//! Client order ids are sent to exchanges, most of which restrict them to
//! ASCII alphanumerics (sometimes plus `-`/`_`) and a maximum length of 32 or
//! 36 characters.

use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

const ALPHANUMERIC: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I',
    'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'a', 'b',
    'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u',
    'v', 'w', 'x', 'y', 'z',
];

/// Client-assigned order identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientOrderId(String);

impl ClientOrderId {
    /// `prefix` followed by random alphanumerics, 32 characters in total
    pub fn generate(prefix: &str) -> Self {
        let prefix: String = prefix.chars().filter(char::is_ascii_alphanumeric).take(12).collect();
        let random_len = 32 - prefix.len();
        Self(format!("{prefix}{}", nanoid!(random_len, &ALPHANUMERIC)))
    }

    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ClientOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short random id for correlating log lines and subscriptions
pub fn generate_id() -> String {
    nanoid!(12)
}
