pub mod artifact_sync;
pub mod resilient_channel;
pub mod status_reporter;
pub mod task_registry;

pub use artifact_sync::{ArtifactSyncEngine, SyncSettings};
pub use resilient_channel::{ChannelSettings, InboundHandler, ResilientChannel, SendOutcome};
pub use status_reporter::StatusReporter;
pub use task_registry::{TaskRegistry, TransitionPolicy};
