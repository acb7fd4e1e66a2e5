//! Narrow contracts for everything outside the synchronization core, plus
//! the default adapters the worker binary wires in.

pub mod http_callback;
pub mod http_uploader;
pub mod process_control;
pub mod ws_connector;

use std::path::Path;

use async_trait::async_trait;
use trainsync_config::{AppConfig, EnvironmentConfig};
use trainsync_domain::TaskSummary;
use trainsync_errors::SyncResult;

pub use http_callback::HttpCallbackReporter;
pub use http_uploader::HttpArtifactUploader;
pub use process_control::PidProcessControl;
pub use ws_connector::WsConnector;

/// Best-effort stop of the external training process for a task.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    async fn stop(&self, task_id: &str) -> SyncResult<()>;
}

/// Ships a single local file and returns its remote path.
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    async fn upload_model(
        &self,
        environment: &str,
        file_name: &str,
        local_path: &Path,
        date_tag: &str,
    ) -> SyncResult<String>;

    async fn upload_sample_image(
        &self,
        environment: &str,
        file_name: &str,
        local_path: &Path,
    ) -> SyncResult<String>;
}

/// One-shot terminal result delivery to the control plane.
#[async_trait]
pub trait CallbackReporter: Send + Sync {
    async fn report_result(&self, environment: &str, summary: &TaskSummary) -> SyncResult<()>;
}

/// Opens a fresh duplex connection, already split into its write and read
/// halves.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> SyncResult<(Box<dyn ChannelSink>, Box<dyn ChannelSource>)>;
}

#[async_trait]
pub trait ChannelSink: Send {
    async fn send_text(&mut self, text: String) -> SyncResult<()>;
    async fn close(&mut self) -> SyncResult<()>;
}

#[async_trait]
pub trait ChannelSource: Send {
    /// `Ok(None)` means the peer closed the connection.
    async fn recv_text(&mut self) -> SyncResult<Option<String>>;
}

pub trait EnvironmentLookup: Send + Sync {
    fn environment(&self, name: &str) -> EnvironmentConfig;
}

impl EnvironmentLookup for AppConfig {
    fn environment(&self, name: &str) -> EnvironmentConfig {
        AppConfig::environment(self, name)
    }
}
