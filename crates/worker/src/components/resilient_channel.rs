use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trainsync_config::ChannelConfig;
use trainsync_domain::ChannelMessage;
use trainsync_errors::{SyncError, SyncResult};

use crate::collaborators::{ChannelConnector, ChannelSink, ChannelSource};

/// Callback for every inbound text message.
pub type InboundHandler = Arc<dyn Fn(String) + Send + Sync>;

type SourceHandoff = (u64, Box<dyn ChannelSource>);

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub heartbeat_interval: Duration,
    pub receive_backoff: Duration,
    pub heartbeat_payload: String,
    /// Sent once on every successful (re)connect, before any other traffic.
    pub greeting: Option<String>,
    /// Upper bound for a connect (greeting included) and for a single write.
    pub connect_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for ChannelSettings {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_seconds),
            receive_backoff: Duration::from_millis(config.receive_backoff_ms),
            heartbeat_payload: config.heartbeat_payload.clone(),
            greeting: None,
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
        }
    }
}

/// 发送结果。断线时消息直接丢弃，不做缓存重发。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped,
    Failed,
}

struct ChannelInner {
    connector: Arc<dyn ChannelConnector>,
    settings: ChannelSettings,
    // send 与 reconnect 共用这一把锁
    sink: Mutex<Option<Box<dyn ChannelSink>>>,
    handoff_tx: mpsc::UnboundedSender<SourceHandoff>,
    connected: AtomicBool,
    running: AtomicBool,
    generation: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
}

impl ChannelInner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Runs one remote call under `connect_timeout`.
    async fn bounded<T, F>(&self, action: &str, call: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        match tokio::time::timeout(self.settings.connect_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::channel(format!(
                "{action} timed out after {:?}",
                self.settings.connect_timeout
            ))),
        }
    }

    /// Replaces the current connection. Must be called with the sink lock
    /// held. Never fails: a failed or stalled connect leaves the channel
    /// disconnected.
    async fn reconnect_locked(&self, sink: &mut Option<Box<dyn ChannelSink>>) -> bool {
        if !self.is_running() {
            return false;
        }

        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut old) = sink.take() {
            if let Err(e) = self.bounded("close", old.close()).await {
                debug!("Ignoring error while closing stale channel connection: {}", e);
            }
        }

        let (mut new_sink, source) = match self.bounded("connect", self.connector.connect()).await
        {
            Ok(halves) => halves,
            Err(e) => {
                warn!("Channel connect failed: {}", e);
                return false;
            }
        };

        if let Some(ref greeting) = self.settings.greeting {
            if let Err(e) = self
                .bounded("greeting", new_sink.send_text(greeting.clone()))
                .await
            {
                warn!("Channel greeting failed, dropping connection: {}", e);
                return false;
            }
        }

        // stop 可能在建连期间发生
        if !self.is_running() {
            if let Err(e) = self.bounded("close", new_sink.close()).await {
                debug!("Ignoring error while closing late channel connection: {}", e);
            }
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *sink = Some(new_sink);
        self.connected.store(true, Ordering::SeqCst);
        if self.handoff_tx.send((generation, source)).is_err() {
            debug!("Receive loop is gone, reader half discarded");
        }
        info!("Channel connected (generation {})", generation);
        true
    }

    /// Attempts one reconnect in the background unless another caller
    /// already holds the writer.
    fn spawn_reconnect(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(mut sink) = inner.sink.try_lock() else {
                debug!("Channel writer busy, skipping reconnect");
                return;
            };
            if !inner.is_connected() {
                inner.reconnect_locked(&mut sink).await;
            }
        });
    }

    /// Waits out the receive backoff. Returns true if shutdown was signalled.
    async fn backoff(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.receive_backoff) => !self.is_running(),
            _ = shutdown_rx.recv() => true,
        }
    }
}

/// Long-lived duplex session to the control plane that survives drops.
///
/// A heartbeat loop probes the connection and a receive loop drains inbound
/// traffic; both reconnect on failure. Outbound messages are fire-and-forget:
/// anything sent while the session is down is dropped, never queued.
pub struct ResilientChannel {
    inner: Arc<ChannelInner>,
    handoff_rx: Mutex<Option<mpsc::UnboundedReceiver<SourceHandoff>>>,
    inbound: Option<InboundHandler>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ResilientChannel {
    pub fn new(connector: Arc<dyn ChannelConnector>, settings: ChannelSettings) -> Self {
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(ChannelInner {
                connector,
                settings,
                sink: Mutex::new(None),
                handoff_tx,
                connected: AtomicBool::new(false),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                shutdown_tx,
            }),
            handoff_rx: Mutex::new(Some(handoff_rx)),
            inbound: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_inbound_handler(mut self, handler: InboundHandler) -> Self {
        self.inbound = Some(handler);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Connects and spawns the heartbeat and receive loops. An initial connect
    /// failure is not an error; the loops keep retrying. A channel can only be
    /// started once.
    pub async fn start(&self) -> SyncResult<()> {
        let Some(handoff_rx) = self.handoff_rx.lock().await.take() else {
            return Err(SyncError::channel("channel has already been started"));
        };

        self.inner.running.store(true, Ordering::SeqCst);
        {
            let mut sink = self.inner.sink.lock().await;
            if !self.inner.reconnect_locked(&mut sink).await {
                warn!("Initial channel connect failed, background loops will retry");
            }
        }

        let heartbeat = tokio::spawn(heartbeat_loop(
            Arc::clone(&self.inner),
            self.inner.shutdown_tx.subscribe(),
        ));
        let receiver = tokio::spawn(receive_loop(
            Arc::clone(&self.inner),
            self.inbound.clone(),
            handoff_rx,
            self.inner.shutdown_tx.subscribe(),
        ));
        self.tasks.lock().await.extend([heartbeat, receiver]);

        info!(
            "Channel started (heartbeat every {:?})",
            self.inner.settings.heartbeat_interval
        );
        Ok(())
    }

    /// Sends one message. While disconnected the message is dropped at once
    /// and a single reconnect is started in the background; a failed or
    /// stalled write marks the channel disconnected. Never waits longer than
    /// `connect_timeout` for the writer.
    pub async fn send<M: Into<ChannelMessage>>(&self, message: M) -> SendOutcome {
        if !self.inner.is_running() {
            debug!("Channel not running, message dropped");
            return SendOutcome::Dropped;
        }

        let text = match message.into().into_wire() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize channel message: {}", e);
                return SendOutcome::Failed;
            }
        };

        if !self.inner.is_connected() {
            warn!("Channel disconnected, message dropped (potential message loss): {}", text);
            self.inner.spawn_reconnect();
            return SendOutcome::Dropped;
        }

        let Ok(mut sink) =
            tokio::time::timeout(self.inner.settings.connect_timeout, self.inner.sink.lock()).await
        else {
            warn!("Channel writer busy, message dropped (potential message loss): {}", text);
            return SendOutcome::Dropped;
        };
        let Some(writer) = sink.as_mut().filter(|_| self.inner.is_connected()) else {
            warn!("Channel disconnected, message dropped (potential message loss): {}", text);
            return SendOutcome::Dropped;
        };

        match self.inner.bounded("send", writer.send_text(text)).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                warn!("Channel send failed, marking disconnected: {}", e);
                self.inner.connected.store(false, Ordering::SeqCst);
                SendOutcome::Failed
            }
        }
    }

    /// Stops both loops and closes the connection. Returns once the loops
    /// have exited.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(());

        {
            let mut sink = self.inner.sink.lock().await;
            if let Some(mut writer) = sink.take() {
                if let Err(e) = self.inner.bounded("close", writer.close()).await {
                    debug!("Ignoring error while closing channel: {}", e);
                }
            }
            self.inner.connected.store(false, Ordering::SeqCst);
        }

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Channel loop task failed: {}", e);
            }
        }
        info!("Channel stopped");
    }
}

impl Drop for ResilientChannel {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

async fn heartbeat_loop(inner: Arc<ChannelInner>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(inner.settings.heartbeat_interval) => {}
            _ = shutdown_rx.recv() => break,
        }
        if !inner.is_running() {
            break;
        }

        let mut sink = inner.sink.lock().await;
        if !inner.is_connected() {
            debug!("Heartbeat found channel disconnected, reconnecting");
            inner.reconnect_locked(&mut sink).await;
            continue;
        }

        let result = match sink.as_mut() {
            Some(writer) => {
                let probe = writer.send_text(inner.settings.heartbeat_payload.clone());
                inner.bounded("heartbeat", probe).await
            }
            None => Err(SyncError::NotConnected),
        };
        if let Err(e) = result {
            warn!("Heartbeat failed, reconnecting: {}", e);
            inner.connected.store(false, Ordering::SeqCst);
            inner.reconnect_locked(&mut sink).await;
        }
    }
    debug!("Heartbeat loop exited");
}

enum ReceiveEvent {
    Message(String),
    Closed,
    Failed(SyncError),
    Handoff(Option<SourceHandoff>),
    Shutdown,
}

async fn receive_loop(
    inner: Arc<ChannelInner>,
    inbound: Option<InboundHandler>,
    mut handoff_rx: mpsc::UnboundedReceiver<SourceHandoff>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut current: Option<SourceHandoff> = None;

    loop {
        if !inner.is_running() {
            break;
        }
        while let Ok(next) = handoff_rx.try_recv() {
            current = Some(next);
        }

        if !inner.is_connected() {
            {
                let mut sink = inner.sink.lock().await;
                if !inner.is_connected() {
                    inner.reconnect_locked(&mut sink).await;
                }
            }
            if inner.backoff(&mut shutdown_rx).await {
                break;
            }
            continue;
        }

        let event = match current.as_mut() {
            Some((_, source)) => tokio::select! {
                result = source.recv_text() => match result {
                    Ok(Some(text)) => ReceiveEvent::Message(text),
                    Ok(None) => ReceiveEvent::Closed,
                    Err(e) => ReceiveEvent::Failed(e),
                },
                next = handoff_rx.recv() => ReceiveEvent::Handoff(next),
                _ = shutdown_rx.recv() => ReceiveEvent::Shutdown,
            },
            None => tokio::select! {
                next = handoff_rx.recv() => ReceiveEvent::Handoff(next),
                _ = shutdown_rx.recv() => ReceiveEvent::Shutdown,
            },
        };

        match event {
            ReceiveEvent::Message(text) => {
                debug!("Channel message received: {}", text);
                if let Some(ref handler) = inbound {
                    handler(text);
                }
            }
            ReceiveEvent::Handoff(Some(next)) => current = Some(next),
            ReceiveEvent::Handoff(None) | ReceiveEvent::Shutdown => break,
            ReceiveEvent::Closed => {
                if on_source_lost(&inner, &mut current, None, &mut shutdown_rx).await {
                    break;
                }
            }
            ReceiveEvent::Failed(e) => {
                if on_source_lost(&inner, &mut current, Some(e), &mut shutdown_rx).await {
                    break;
                }
            }
        }
    }
    debug!("Receive loop exited");
}

/// Marks the channel disconnected if the lost reader belongs to the live
/// connection, then backs off. Returns true if shutdown was signalled.
async fn on_source_lost(
    inner: &ChannelInner,
    current: &mut Option<SourceHandoff>,
    error: Option<SyncError>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> bool {
    let Some((generation, _)) = current.take() else {
        return false;
    };
    {
        let _sink = inner.sink.lock().await;
        // 旧连接的读端失效不影响已经重连上的新连接
        if generation != inner.generation.load(Ordering::SeqCst) {
            return false;
        }
        inner.connected.store(false, Ordering::SeqCst);
    }
    match error {
        Some(e) => warn!("Channel receive failed: {}", e),
        None => warn!("Channel closed by peer"),
    }
    inner.backoff(shutdown_rx).await
}
