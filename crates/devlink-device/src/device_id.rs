//! `DeviceId` newtype (spec.md §3 "Device identity").
//!
//! DUIDs are used both as map keys and passed across async task boundaries,
//! so a dedicated type earns its keep at those call sites even though
//! internal maps elsewhere in this crate key on bare `String`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(duid: impl Into<String>) -> Self {
        Self(duid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeviceId {
    fn from(duid: String) -> Self {
        Self(duid)
    }
}

impl From<&str> for DeviceId {
    fn from(duid: &str) -> Self {
        Self(duid.to_string())
    }
}
