//! chatgate library
//!
//! Permission-gated channel mutations with client-side handling of the name/topic rate
//! limit. Exposes modules for the CLI and integration testing.

pub mod cache;
pub mod config;
pub mod editor;
pub mod errors;
pub mod model;
pub mod transport;

// Re-export commonly used types for external use
pub use cache::{InMemoryResourceCache, ResourceCache};
pub use chatgate_core_types::{
    Channel, ChannelId, GuildId, MessageId, Overwrite, OverwriteKind, Permissions, PrincipalId,
};
pub use config::{load_config, Config, ConfigError, LoadedConfig};
pub use editor::{ChannelEditor, ChannelEditorBuilder, DrainMode};
pub use errors::{GateError, GateResult};
pub use model::{ChannelEdit, EditOutcome, PendingChannelEdit};
pub use permissions_broker::{has_overwrite_permission, OverwritePolicy};
pub use transport::{LoopbackTransport, Method, Transport, TransportError};
