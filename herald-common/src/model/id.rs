use std::{fmt, str::FromStr};

use thiserror::Error;

/// A string could not be parsed as an identifier
#[derive(Debug, Error)]
#[error("Invalid {kind} identifier '{value}': {reason}")]
pub struct IdParseError {
    kind: &'static str,
    value: String,
    reason: ulid::DecodeError,
}

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        ///
        /// Backed by a ULID, so identifiers sort by creation time.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Generate a new unique identifier
            #[must_use]
            pub fn generate() -> Self {
                Self(ulid::Ulid::new())
            }

            /// Wrap an existing ULID
            #[must_use]
            pub const fn new(id: ulid::Ulid) -> Self {
                Self(id)
            }

            /// The underlying ULID
            #[must_use]
            pub const fn ulid(&self) -> ulid::Ulid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                ulid::Ulid::from_string(s.trim())
                    .map(Self)
                    .map_err(|reason| IdParseError {
                        kind: $kind,
                        value: s.to_string(),
                        reason,
                    })
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

ulid_id!(
    /// Identifier of an [`Email`](super::Email) job
    EmailId,
    "email"
);
ulid_id!(
    /// Identifier of an [`EmailBatch`](super::EmailBatch)
    BatchId,
    "batch"
);
ulid_id!(
    /// Identifier of an audit event
    AuditId,
    "audit"
);
