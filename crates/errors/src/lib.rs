use thiserror::Error;


#[derive(Debug, Error)]
pub enum SyncError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },
    #[error("任务配置无效: 任务 {task_id} - {message}")]
    InvalidTaskConfig { task_id: String, message: String },
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("上传失败: {0}")]
    Upload(String),
    #[error("结果回调失败: {0}")]
    Callback(String),
    #[error("通道错误: {0}")]
    Channel(String),
    #[error("通道未连接")]
    NotConnected,
    #[error("进程控制失败: {0}")]
    ProcessControl(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }
    pub fn invalid_task_config<S: Into<String>, M: Into<String>>(task_id: S, message: M) -> Self {
        Self::InvalidTaskConfig {
            task_id: task_id.into(),
            message: message.into(),
        }
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn channel<S: Into<String>>(msg: S) -> Self {
        Self::Channel(msg.into())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Internal(err.to_string())
    }
}
