//! Wire protocol version and the greeting check.
//!
//! A TCP subscriber opens every connection with `Hello { version }`. The
//! publisher keeps the peer only if the major numbers agree; minor bumps
//! must stay readable by older peers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codec::ProtocolError;

/// Version spoken by this build.
pub const PROTOCOL_VERSION: Version = Version::new(1, 0);

/// `major.minor` protocol version carried in the `Hello` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether a peer greeting with `other` can be served.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Validate a peer's greeting against this version.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IncompatibleVersion`] carrying the peer's
    /// version when the majors differ.
    pub fn accept(&self, peer: Version) -> Result<(), ProtocolError> {
        if self.is_compatible_with(&peer) {
            Ok(())
        } else {
            Err(ProtocolError::IncompatibleVersion(peer))
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
