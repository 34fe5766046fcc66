//! Protocol versioning for Switchboard.
//!
//! Clients announce the major protocol version in their `connect` frame;
//! the provider refuses majors it cannot speak. Minor bumps only add
//! optional fields, so they never break a session.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: Version = Version::new(1, 0);

/// A `major.minor` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether a peer announcing protocol `major` can hold a session with us.
    #[must_use]
    pub const fn accepts_major(&self, major: u8) -> bool {
        self.major == major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
