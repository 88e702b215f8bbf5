// Identity Domain Model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Public identity of a holder or manager.
///
/// Only the public id crosses into the core; key material stays with the
/// identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub public_id: String,
}

impl Identity {
    pub fn new(public_id: impl Into<String>) -> Self {
        Self {
            public_id: public_id.into(),
        }
    }

    /// Shortened id for display and log fields
    pub fn short(&self) -> &str {
        let end = self
            .public_id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.public_id.len());
        &self.public_id[..end]
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.public_id)
    }
}
