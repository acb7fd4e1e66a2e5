use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info};
use trainsync_domain::TaskSummary;
use trainsync_errors::{SyncError, SyncResult};

use super::{CallbackReporter, EnvironmentLookup};

pub struct HttpCallbackReporter {
    environments: Arc<dyn EnvironmentLookup>,
    http_client: reqwest::Client,
}

impl HttpCallbackReporter {
    pub fn new(environments: Arc<dyn EnvironmentLookup>, timeout: Duration) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            environments,
            http_client,
        })
    }
}

#[async_trait]
impl CallbackReporter for HttpCallbackReporter {
    async fn report_result(&self, environment: &str, summary: &TaskSummary) -> SyncResult<()> {
        let Some(control_plane) = self.environments.environment(environment).control_plane else {
            return Err(SyncError::config_error(format!(
                "environment {environment} has no control plane settings"
            )));
        };

        let url = format!(
            "{}/lora/train/callbackAfterTrainDone",
            control_plane.host.trim_end_matches('/')
        );

        match self.http_client.post(&url).json(summary).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!(
                        "Reported result of task {} (code={}) to control plane",
                        summary.task_id, summary.code
                    );
                    Ok(())
                } else {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    error!(
                        "Result callback for task {} rejected: {} - {}",
                        summary.task_id, status, body
                    );
                    Err(SyncError::Callback(format!("HTTP {status}: {body}")))
                }
            }
            Err(e) => {
                error!("Result callback for task {} failed: {}", summary.task_id, e);
                Err(SyncError::Network(e.to_string()))
            }
        }
    }
}
