//! Strongly-typed identifiers for gatepassd

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a gatepass request
    GatepassId
);

uuid_id!(
    /// Single-use approval token value.
    ///
    /// The token is the only credential on the unauthenticated approval
    /// callback, so it is always generated from a random v4 UUID.
    TokenId
);

uuid_id!(
    /// Unique identifier for a registered student
    StudentId
);

uuid_id!(
    /// Unique identifier for a registered parent (guardian)
    ParentId
);

uuid_id!(
    /// Unique identifier for a connected IPC client
    ClientId
);

/// Opaque identity reference supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity used for transitions made by the service itself
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ActorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_id_equality() {
        let id1 = ActorId::new("warden");
        let id2 = ActorId::new("warden");
        let id3 = ActorId::new("security");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn token_id_uniqueness() {
        let t1 = TokenId::new();
        let t2 = TokenId::new();
        assert_ne!(t1, t2);
    }

    #[test]
    fn ids_parse_from_display() {
        let id = GatepassId::new();
        let parsed: GatepassId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        assert!("not-a-token".parse::<TokenId>().is_err());
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let token = TokenId::new();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, format!("\"{}\"", token));

        let actor = ActorId::new("student-7");
        let json = serde_json::to_string(&actor).unwrap();
        assert_eq!(json, "\"student-7\"");
    }
}
