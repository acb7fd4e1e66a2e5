pub mod collaborators;
pub mod components;

pub use collaborators::{
    ArtifactUploader, CallbackReporter, ChannelConnector, ChannelSink, ChannelSource,
    EnvironmentLookup, HttpArtifactUploader, HttpCallbackReporter, PidProcessControl,
    ProcessControl, WsConnector,
};
pub use components::{
    ArtifactSyncEngine, ChannelSettings, InboundHandler, ResilientChannel, SendOutcome,
    StatusReporter, SyncSettings, TaskRegistry, TransitionPolicy,
};
