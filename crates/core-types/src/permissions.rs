use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

bitflags! {
    /// Capability bits as the platform defines them. Bits above 31 are in use, so the mask
    /// is always carried as a `u64`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS = 1 << 1;
        const BAN_MEMBERS = 1 << 2;
        const ADMINISTRATOR = 1 << 3;
        const MANAGE_CHANNELS = 1 << 4;
        const MANAGE_GUILD = 1 << 5;
        const ADD_REACTIONS = 1 << 6;
        const VIEW_AUDIT_LOG = 1 << 7;
        const PRIORITY_SPEAKER = 1 << 8;
        const STREAM = 1 << 9;
        const VIEW_CHANNEL = 1 << 10;
        const SEND_MESSAGES = 1 << 11;
        const SEND_TTS_MESSAGES = 1 << 12;
        const MANAGE_MESSAGES = 1 << 13;
        const EMBED_LINKS = 1 << 14;
        const ATTACH_FILES = 1 << 15;
        const READ_MESSAGE_HISTORY = 1 << 16;
        const MENTION_EVERYONE = 1 << 17;
        const USE_EXTERNAL_EMOJIS = 1 << 18;
        const VIEW_GUILD_INSIGHTS = 1 << 19;
        const CONNECT = 1 << 20;
        const SPEAK = 1 << 21;
        const MUTE_MEMBERS = 1 << 22;
        const DEAFEN_MEMBERS = 1 << 23;
        const MOVE_MEMBERS = 1 << 24;
        const USE_VAD = 1 << 25;
        const CHANGE_NICKNAME = 1 << 26;
        const MANAGE_NICKNAMES = 1 << 27;
        const MANAGE_ROLES = 1 << 28;
        const MANAGE_WEBHOOKS = 1 << 29;
        const MANAGE_GUILD_EXPRESSIONS = 1 << 30;
        const USE_APPLICATION_COMMANDS = 1 << 31;
        const REQUEST_TO_SPEAK = 1 << 32;
        const MANAGE_EVENTS = 1 << 33;
        const MANAGE_THREADS = 1 << 34;
        const CREATE_PUBLIC_THREADS = 1 << 35;
        const CREATE_PRIVATE_THREADS = 1 << 36;
        const USE_EXTERNAL_STICKERS = 1 << 37;
        const SEND_MESSAGES_IN_THREADS = 1 << 38;
        const USE_EMBEDDED_ACTIVITIES = 1 << 39;
        const MODERATE_MEMBERS = 1 << 40;
    }
}

/// A permission name that does not correspond to any known bit.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown permission: {0}")]
pub struct UnknownPermission(pub String);

impl Permissions {
    /// OR-reduces a list of permission names into one mask.
    ///
    /// Names are matched case-insensitively against the constant names, so both
    /// `"MANAGE_CHANNELS"` and `"manage_channels"` resolve to the same bit.
    pub fn from_names<I, S>(names: I) -> Result<Self, UnknownPermission>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .try_fold(Permissions::empty(), |acc, name| {
                Self::parse_name(name.as_ref()).map(|bit| acc | bit)
            })
    }

    pub fn parse_name(name: &str) -> Result<Self, UnknownPermission> {
        let normalized = name.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Permissions::from_name(&normalized).ok_or_else(|| UnknownPermission(name.to_string()))
    }

    /// Names of the set bits, lowest bit first.
    pub fn names(&self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions::empty()
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        f.write_str(&self.names().join(" | "))
    }
}

// Masks travel as decimal strings on the wire so that 64-bit values survive JSON
// consumers limited to doubles.
impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.bits())
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::decode_u64(deserializer).map(Permissions::from_bits_retain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_aggregate_with_or() {
        let mask = Permissions::from_names(["MANAGE_CHANNELS", "manage_roles"]).unwrap();
        assert_eq!(mask, Permissions::MANAGE_CHANNELS | Permissions::MANAGE_ROLES);
        assert_eq!(mask.bits(), (1 << 4) | (1 << 28));
    }

    #[test]
    fn unknown_name_is_reported() {
        let err = Permissions::from_names(["VIEW_CHANNEL", "FLY"]).unwrap_err();
        assert_eq!(err, UnknownPermission("FLY".into()));
    }

    #[test]
    fn high_bits_survive_serialization() {
        let mask = Permissions::MODERATE_MEMBERS | Permissions::VIEW_CHANNEL;
        let encoded = serde_json::to_string(&mask).unwrap();
        assert_eq!(encoded, format!("\"{}\"", (1u64 << 40) | (1 << 10)));
        let decoded: Permissions = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, mask);
    }

    #[test]
    fn display_lists_names() {
        let mask = Permissions::SEND_MESSAGES | Permissions::VIEW_CHANNEL;
        assert_eq!(mask.to_string(), "VIEW_CHANNEL | SEND_MESSAGES");
        assert_eq!(Permissions::empty().to_string(), "(none)");
    }
}
