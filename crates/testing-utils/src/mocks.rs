//! Recording mock implementations of the worker collaborator traits.
//!
//! Every mock is cheap to clone and shares its recorded state between
//! clones, so a test can keep one handle and pass another to the component
//! under test.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use trainsync_domain::TaskSummary;
use trainsync_errors::{SyncError, SyncResult};
use trainsync_worker::{
    ArtifactUploader, CallbackReporter, ChannelConnector, ChannelSink, ChannelSource,
    ProcessControl,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    Succeed,
    Fail,
    Panic,
}

/// Mock implementation of ProcessControl for testing
#[derive(Debug, Clone)]
pub struct MockProcessControl {
    behavior: StopBehavior,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockProcessControl {
    pub fn new() -> Self {
        Self::with_behavior(StopBehavior::Succeed)
    }

    pub fn failing() -> Self {
        Self::with_behavior(StopBehavior::Fail)
    }

    pub fn panicking() -> Self {
        Self::with_behavior(StopBehavior::Panic)
    }

    pub fn with_behavior(behavior: StopBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessControl for MockProcessControl {
    async fn stop(&self, task_id: &str) -> SyncResult<()> {
        self.calls.lock().unwrap().push(task_id.to_string());
        match self.behavior {
            StopBehavior::Succeed => Ok(()),
            StopBehavior::Fail => Err(SyncError::ProcessControl(format!(
                "mock stop failure for {task_id}"
            ))),
            StopBehavior::Panic => panic!("mock stop panic for {task_id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    SampleImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCall {
    pub kind: ArtifactKind,
    pub environment: String,
    pub file_name: String,
    pub date_tag: Option<String>,
}

/// Invoked after every upload with the number of uploads seen so far.
pub type UploadHook = Arc<dyn Fn(usize) -> BoxFuture<'static, ()> + Send + Sync>;

/// Mock implementation of ArtifactUploader for testing
///
/// Successful uploads return `remote/<file name>`.
#[derive(Clone, Default)]
pub struct MockUploader {
    calls: Arc<Mutex<Vec<UploadCall>>>,
    failing: Arc<Mutex<HashSet<String>>>,
    after_upload: Option<UploadHook>,
}

impl MockUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, file_name: &str) {
        self.failing.lock().unwrap().insert(file_name.to_string());
    }

    pub fn with_after_upload(mut self, hook: UploadHook) -> Self {
        self.after_upload = Some(hook);
        self
    }

    pub fn calls(&self) -> Vec<UploadCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn uploaded_names(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.file_name.clone())
            .collect()
    }

    pub fn upload_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    async fn record(&self, call: UploadCall) -> SyncResult<String> {
        let file_name = call.file_name.clone();
        let seen = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call);
            calls.len()
        };
        let result = if self.failing.lock().unwrap().contains(&file_name) {
            Err(SyncError::Upload(format!("mock upload failure for {file_name}")))
        } else {
            Ok(format!("remote/{file_name}"))
        };
        if let Some(ref hook) = self.after_upload {
            hook(seen).await;
        }
        result
    }
}

#[async_trait]
impl ArtifactUploader for MockUploader {
    async fn upload_model(
        &self,
        environment: &str,
        file_name: &str,
        _local_path: &Path,
        date_tag: &str,
    ) -> SyncResult<String> {
        self.record(UploadCall {
            kind: ArtifactKind::Model,
            environment: environment.to_string(),
            file_name: file_name.to_string(),
            date_tag: Some(date_tag.to_string()),
        })
        .await
    }

    async fn upload_sample_image(
        &self,
        environment: &str,
        file_name: &str,
        _local_path: &Path,
    ) -> SyncResult<String> {
        self.record(UploadCall {
            kind: ArtifactKind::SampleImage,
            environment: environment.to_string(),
            file_name: file_name.to_string(),
            date_tag: None,
        })
        .await
    }
}

/// Mock implementation of CallbackReporter for testing
#[derive(Debug, Clone, Default)]
pub struct MockCallback {
    reports: Arc<Mutex<Vec<(String, TaskSummary)>>>,
    fail: bool,
}

impl MockCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn reports(&self) -> Vec<(String, TaskSummary)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<TaskSummary> {
        self.reports().into_iter().map(|(_, summary)| summary).collect()
    }

    pub fn codes(&self) -> Vec<i32> {
        self.summaries().iter().map(|summary| summary.code).collect()
    }
}

#[async_trait]
impl CallbackReporter for MockCallback {
    async fn report_result(&self, environment: &str, summary: &TaskSummary) -> SyncResult<()> {
        self.reports
            .lock()
            .unwrap()
            .push((environment.to_string(), summary.clone()));
        if self.fail {
            return Err(SyncError::Callback("mock callback failure".to_string()));
        }
        Ok(())
    }
}

type Inbound = SyncResult<Option<String>>;

#[derive(Default)]
struct ConnectorState {
    connects: usize,
    fail_connects: bool,
    fail_sends: bool,
    hang_connects: bool,
    hang_sends: bool,
    sent: Vec<String>,
    closes: usize,
    // 保留发送端，读端在没有消息时一直挂起
    inbound: Vec<mpsc::UnboundedSender<Inbound>>,
}

/// Mock implementation of ChannelConnector for testing
///
/// Every connection shares the recorded state. Reads pend until a test
/// pushes a message or closes the connection.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_connects(&self, fail: bool) {
        self.state.lock().unwrap().fail_connects = fail;
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    /// Connect attempts never complete while set, like a stalled endpoint.
    pub fn set_hang_connects(&self, hang: bool) {
        self.state.lock().unwrap().hang_connects = hang;
    }

    /// Writes never complete while set.
    pub fn set_hang_sends(&self, hang: bool) {
        self.state.lock().unwrap().hang_sends = hang;
    }

    /// Number of connect attempts, failed ones included.
    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Delivers a message on the most recent connection.
    pub fn push_inbound(&self, text: &str) -> bool {
        self.send_latest(Ok(Some(text.to_string())))
    }

    /// Makes the most recent connection's reader fail.
    pub fn fail_latest_read(&self) -> bool {
        self.send_latest(Err(SyncError::channel("mock read failure")))
    }

    fn send_latest(&self, item: Inbound) -> bool {
        match self.state.lock().unwrap().inbound.last() {
            Some(tx) => tx.send(item).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ChannelConnector for MockConnector {
    async fn connect(&self) -> SyncResult<(Box<dyn ChannelSink>, Box<dyn ChannelSource>)> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            if state.fail_connects {
                return Err(SyncError::channel("mock connect failure"));
            }
            state.hang_connects
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().inbound.push(tx);
        Ok((
            Box::new(MockSink {
                state: Arc::clone(&self.state),
            }),
            Box::new(MockSource { rx }),
        ))
    }
}

struct MockSink {
    state: Arc<Mutex<ConnectorState>>,
}

#[async_trait]
impl ChannelSink for MockSink {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_sends {
                return Err(SyncError::channel("mock send failure"));
            }
            if !state.hang_sends {
                state.sent.push(text);
                return Ok(());
            }
        }
        std::future::pending::<()>().await;
        Ok(())
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

struct MockSource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl ChannelSource for MockSource {
    async fn recv_text(&mut self) -> SyncResult<Option<String>> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Ok(None),
        }
    }
}
