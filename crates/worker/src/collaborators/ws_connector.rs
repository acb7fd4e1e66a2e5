use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use trainsync_errors::{SyncError, SyncResult};

use super::{ChannelConnector, ChannelSink, ChannelSource};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket connector for the control-plane channel.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// 限制 TCP 建连与 WebSocket 握手的总时长
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self) -> SyncResult<(Box<dyn ChannelSink>, Box<dyn ChannelSource>)> {
        let (stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    SyncError::channel(format!(
                        "connect to {} timed out after {:?}",
                        self.url, self.connect_timeout
                    ))
                })?
                .map_err(|e| SyncError::channel(format!("connect to {} failed: {e}", self.url)))?;
        info!("WebSocket connected: {}", self.url);

        let (sink, source) = stream.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { source })))
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl ChannelSink for WsSink {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SyncError::channel(format!("send failed: {e}")))
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| SyncError::channel(format!("close failed: {e}")))
    }
}

struct WsSource {
    source: SplitStream<WsStream>,
}

#[async_trait]
impl ChannelSource for WsSource {
    async fn recv_text(&mut self) -> SyncResult<Option<String>> {
        loop {
            match self.source.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()))
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("WebSocket closed by peer: {:?}", frame);
                    return Ok(None);
                }
                // ping/pong 由协议层自动应答
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(SyncError::channel(format!("receive failed: {e}"))),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_unreachable_host_fails() {
        let connector = WsConnector::new("ws://127.0.0.1:1/ws");
        assert_eq!(connector.url(), "ws://127.0.0.1:1/ws");
        let result = connector.connect().await;
        assert!(matches!(result, Err(SyncError::Channel(_))));
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_server() {
        // 接受 TCP 连接但从不回应握手
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let connector = WsConnector::new(format!("ws://{addr}/ws"))
            .with_connect_timeout(Duration::from_millis(200));
        let started = std::time::Instant::now();
        let result = connector.connect().await;

        assert!(matches!(result, Err(SyncError::Channel(ref m)) if m.contains("timed out")));
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }
}
