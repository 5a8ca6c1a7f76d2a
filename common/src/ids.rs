//! Identifiers for the data model described in §3.
//!
//! Nodes and pools are named by an operator-chosen string; replicas and
//! volumes (and therefore nexuses, which are identified by the volume's
//! uuid) are identified by a `Uuid`.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Serialize, Deserialize, Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd,
        )]
        pub struct $name(String);

        impl $name {
            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(NodeId, "Unique name of a storage node (agent).");
string_id!(PoolId, "Globally unique name of a pool.");

macro_rules! uuid_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
            /// The underlying uuid.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }
        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
        impl std::str::FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    VolumeId,
    "Uuid of a volume. Also the identifier of its nexus and of every one of \
     its replicas (a replica carries the uuid of the volume it belongs to, \
     not one of its own) and of its nexus, since a volume has at most one."
);

/// A replica is identified by the uuid of its volume plus the pool it lives
/// on, since a pool hosts at most one replica per volume (§3).
pub type ReplicaId = VolumeId;
