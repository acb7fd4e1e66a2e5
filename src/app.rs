use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};
use trainsync_config::AppConfig;
use trainsync_worker::{
    ArtifactSyncEngine, ChannelSettings, EnvironmentLookup, HttpArtifactUploader,
    HttpCallbackReporter, PidProcessControl, ResilientChannel, StatusReporter, SyncSettings,
    TaskRegistry, WsConnector,
};

/// 训练结果同步 Worker
///
/// 负责把配置装配成各组件。任务的接入（注册、训练完成通知）由嵌入方通过
/// [`Application::registry`] 和 [`Application::engine`] 完成。
pub struct Application {
    config: AppConfig,
    process_control: Arc<PidProcessControl>,
    registry: Arc<TaskRegistry>,
    channel: Option<Arc<ResilientChannel>>,
    engine: Arc<ArtifactSyncEngine>,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        info!("初始化 Worker: {}", config.worker.worker_id);

        let environments: Arc<dyn EnvironmentLookup> = Arc::new(config.clone());
        let process_control = Arc::new(PidProcessControl::new());
        let registry = Arc::new(TaskRegistry::from_config(
            &config.registry,
            Arc::clone(&process_control) as _,
        ));

        let uploader = HttpArtifactUploader::new(
            Arc::clone(&environments),
            Duration::from_secs(config.sync.upload_timeout_seconds),
        )
        .context("创建上传客户端失败")?;
        let callback = HttpCallbackReporter::new(
            Arc::clone(&environments),
            Duration::from_secs(config.callback.timeout_seconds),
        )
        .context("创建回调客户端失败")?;

        let channel = config.channel.enabled.then(|| {
            let mut settings = ChannelSettings::from(&config.channel);
            settings.greeting = Some(
                json!({
                    "type": "register",
                    "worker_id": config.worker.worker_id,
                    "hostname": config.worker.hostname,
                })
                .to_string(),
            );
            Arc::new(ResilientChannel::new(
                Arc::new(
                    WsConnector::new(config.channel.url.clone())
                        .with_connect_timeout(settings.connect_timeout),
                ),
                settings,
            ))
        });

        let mut reporter = StatusReporter::new(config.worker.worker_id.clone(), Arc::new(callback));
        if let Some(ref channel) = channel {
            reporter = reporter.with_channel(Arc::clone(channel));
        }

        let engine = Arc::new(ArtifactSyncEngine::new(
            Arc::clone(&registry),
            Arc::new(uploader),
            Arc::new(reporter),
            SyncSettings::from(&config.sync),
        ));

        Ok(Self {
            config,
            process_control,
            registry,
            channel,
            engine,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<ArtifactSyncEngine> {
        &self.engine
    }

    /// 训练进程启动后登记其 PID，终止任务时使用
    pub fn process_control(&self) -> &Arc<PidProcessControl> {
        &self.process_control
    }

    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if let Some(ref channel) = self.channel {
            channel.start().await.context("启动控制面长连接失败")?;
        } else {
            info!("控制面长连接未启用");
        }

        info!(
            "Worker {} 已就绪，工作目录: {}",
            self.config.worker.worker_id, self.config.sync.workspace_root
        );

        let _ = shutdown_rx.recv().await;
        info!("停止 Worker {}", self.config.worker.worker_id);

        if let Some(ref channel) = self.channel {
            channel.stop().await;
        }
        if self.registry.has_active_tasks().await {
            warn!("仍有未结束的任务，进程退出后这些任务的结果不会再上报");
        }
        Ok(())
    }
}
