//! Strongly-typed identifiers for stratus entities.
//!
//! All identifiers are UUID-backed newtypes so the compiler rejects mixing
//! an event ID up with an object ID. Lineage identifiers are additionally
//! wire-visible: they are written to the object store as tag values and must
//! round-trip through their canonical hyphenated form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident, $resource:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps a raw UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    Error::InvalidInput(format!("invalid {} '{s}': {e}", $resource))
                })
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

uuid_id!(
    /// Identifier of a single store event in the event log.
    EventId,
    "event ID"
);

uuid_id!(
    /// Synthetic identifier of an `object` row.
    ObjectId,
    "object ID"
);

uuid_id!(
    /// Synthetic identifier of a `historical_object` row.
    HistoricalObjectId,
    "historical object ID"
);

uuid_id!(
    /// Stable identifier that follows a logical object across copies and
    /// moves. Carried on the store side as an object tag value.
    LineageId,
    "lineage ID"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display() {
        let id = LineageId::generate();
        let parsed: LineageId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_uuid_is_rejected() {
        assert!("not-a-uuid".parse::<ObjectId>().is_err());
    }

    #[test]
    fn ids_are_distinct_types() {
        let uuid = Uuid::new_v4();
        let event = EventId::from_uuid(uuid);
        let object = ObjectId::from_uuid(uuid);
        assert_eq!(event.as_uuid(), object.as_uuid());
    }
}
