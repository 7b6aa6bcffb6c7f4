//! Shared primitives for the chatgate crates: snowflake ids, permission bits and the
//! channel model that the broker and the scheduler both speak.

mod channel;
mod permissions;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use channel::{Channel, Overwrite, OverwriteKind};
pub use permissions::{Permissions, UnknownPermission};

/// Raised when a string cannot be read as a snowflake id.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid snowflake id: {0}")]
pub struct InvalidId(pub String);

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = InvalidId;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                raw.trim()
                    .parse::<u64>()
                    .map($name)
                    .map_err(|_| InvalidId(raw.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        // The platform sends ids as decimal strings; numbers are accepted too.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                decode_u64(deserializer).map($name)
            }
        }
    };
}

snowflake_id!(
    /// Identifier of a channel-like resource.
    ChannelId
);
snowflake_id!(
    /// Identifier of the guild owning a channel. Doubles as the id of its default role.
    GuildId
);
snowflake_id!(
    /// A role or a member id, as referenced by an overwrite record.
    PrincipalId
);
snowflake_id!(MessageId);

impl From<GuildId> for PrincipalId {
    fn from(value: GuildId) -> Self {
        PrincipalId(value.0)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Text(String),
    Number(u64),
}

pub(crate) fn decode_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match RawNumber::deserialize(deserializer)? {
        RawNumber::Number(value) => Ok(value),
        RawNumber::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("expected an integer, got {text:?}"))),
    }
}
