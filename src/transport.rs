//! The single persistent connection to the game server.
//!
//! [`TransportChannel::start`] spawns a loop that multiplexes outgoing frames,
//! incoming frames and shutdown with `tokio::select!`. Everything the loop
//! observes is reported on the returned event receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::ConnectionError;
use crate::protocol::{ClientMsg, Identity};

/// A text-frame socket. `recv` yields `None` once the peer has closed.
#[async_trait]
pub trait Transport: Send + 'static {
    async fn send(&mut self, frame: String) -> Result<(), ConnectionError>;
    async fn recv(&mut self) -> Option<Result<String, ConnectionError>>;
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

pub struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &url::Url) -> Result<Self, ConnectionError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(WsTransport { ws })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), ConnectionError> {
        self.ws.send(Message::text(frame)).await.map_err(|e| ConnectionError::Socket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server sent close");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(ConnectionError::Socket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.ws.close(None).await.map_err(|e| ConnectionError::Socket(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    Closed { reason: Option<String> },
    Error(String),
}

/// Where intents go. The live connection in production, a `Vec` in tests.
pub trait Outbox {
    fn send(&mut self, msg: ClientMsg);

    fn close(&mut self) {}
}

impl Outbox for Vec<ClientMsg> {
    fn send(&mut self, msg: ClientMsg) {
        self.push(msg);
    }
}

pub struct TransportChannel {
    cmd_tx: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TransportChannel {
    /// Connects to `url` and starts the channel. Fails only if the handshake
    /// does; later drops arrive as events.
    pub async fn open(
        url: &url::Url,
        identity: Identity,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), ConnectionError> {
        info!(%url, name = %identity.name, "connecting");
        let transport = WsTransport::connect(url).await?;
        Ok(Self::start(transport, identity))
    }

    /// Runs the channel over an already connected transport. The identity
    /// announcement is queued as the first outgoing frame.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        identity: Identity,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let connected = Arc::new(AtomicBool::new(true));

        match serde_json::to_string(&identity.announcement()) {
            Ok(frame) => {
                let _ = cmd_tx.send(frame);
            }
            Err(e) => error!("failed to encode identity: {e}"),
        }

        let task = tokio::spawn(channel_loop(transport, cmd_rx, event_tx, Arc::clone(&connected), shutdown_rx));
        let channel = TransportChannel { cmd_tx, connected, shutdown_tx: Some(shutdown_tx), task: Some(task) };
        (channel, event_rx)
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues one message. Dropped with a warning if the channel is not open.
    pub fn send(&self, msg: &ClientMsg) {
        if !self.connected() {
            warn!(?msg, "send on a closed channel ignored");
            return;
        }
        match serde_json::to_string(msg) {
            Ok(frame) => {
                if self.cmd_tx.send(frame).is_err() {
                    warn!("channel loop gone, message dropped");
                }
            }
            Err(e) => error!("failed to encode {msg:?}: {e}"),
        }
    }

    pub fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        if let Some(tx) = self.shutdown_tx.take() {
            debug!("closing channel");
            let _ = tx.send(());
        }
    }
}

impl Outbox for TransportChannel {
    fn send(&mut self, msg: ClientMsg) {
        TransportChannel::send(self, &msg);
    }

    fn close(&mut self) {
        TransportChannel::close(self);
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel").field("connected", &self.connected()).finish()
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn channel_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<ChannelEvent>,
    connected: Arc<AtomicBool>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let _ = event_tx.send(ChannelEvent::Opened);
    let closed = |reason: Option<String>| {
        connected.store(false, Ordering::Release);
        let _ = event_tx.send(ChannelEvent::Closed { reason });
    };

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(frame) => {
                    if let Err(e) = transport.send(frame).await {
                        error!("send failed: {e}");
                        let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                        closed(Some(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = transport.close().await;
                    closed(Some("channel dropped".into()));
                    break;
                }
            },
            _ = &mut shutdown_rx => {
                if let Err(e) = transport.close().await {
                    debug!("close failed: {e}");
                }
                closed(Some("closed by client".into()));
                break;
            }
            incoming = transport.recv() => match incoming {
                Some(Ok(frame)) => {
                    let _ = event_tx.send(ChannelEvent::Message(frame));
                }
                Some(Err(e)) => {
                    error!("receive failed: {e}");
                    let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                    closed(Some(e.to_string()));
                    break;
                }
                None => {
                    info!("server closed the connection");
                    closed(None);
                    break;
                }
            },
        }
    }
    debug!("channel loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Color;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct MockTransport {
        incoming: VecDeque<Option<Result<String, ConnectionError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockTransport {
        fn new(incoming: Vec<Option<Result<String, ConnectionError>>>) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let t = MockTransport { incoming: incoming.into(), sent: Arc::clone(&sent), closed: Arc::clone(&closed) };
            (t, sent, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: String) -> Result<(), ConnectionError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, ConnectionError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), ConnectionError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn sent_msgs(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<ClientMsg> {
        sent.lock().unwrap().iter().map(|f| serde_json::from_str(f).unwrap()).collect()
    }

    #[tokio::test]
    async fn identity_is_the_first_frame() {
        let welcome = r#"{"tipo":"BIENVENIDA","color":"rojo","jugador_id":0,"nombre":"Ana"}"#.to_string();
        let (transport, sent, _closed) = MockTransport::new(vec![Some(Ok(welcome.clone()))]);
        let (mut channel, mut events) = TransportChannel::start(transport, Identity::new("Ana").with_color(Color::Red));

        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));
        assert_eq!(events.recv().await, Some(ChannelEvent::Message(welcome)));
        assert!(channel.connected());

        channel.send(&ClientMsg::RollDice);
        channel.close();
        assert_eq!(events.recv().await, Some(ChannelEvent::Closed { reason: Some("closed by client".into()) }));

        let msgs = sent_msgs(&sent);
        assert_eq!(msgs[0], ClientMsg::Connect { name: "Ana".into(), color: Some(Color::Red), account_id: None });
        assert_eq!(msgs.iter().filter(|m| matches!(m, ClientMsg::Connect { .. })).count(), 1);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_silences_send() {
        let (transport, sent, closed) = MockTransport::new(vec![]);
        let (mut channel, mut events) = TransportChannel::start(transport, Identity::new("Luis"));
        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));

        channel.close();
        channel.close();
        assert!(!channel.connected());
        channel.send(&ClientMsg::RollDice);

        assert!(matches!(events.recv().await, Some(ChannelEvent::Closed { .. })));
        assert_eq!(events.recv().await, None);
        assert!(closed.load(Ordering::Relaxed));
        assert!(!sent_msgs(&sent).contains(&ClientMsg::RollDice));
    }

    #[tokio::test]
    async fn server_close_flips_connected() {
        let (transport, _sent, _closed) = MockTransport::new(vec![None]);
        let (channel, mut events) = TransportChannel::start(transport, Identity::new("Ana"));
        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));
        assert_eq!(events.recv().await, Some(ChannelEvent::Closed { reason: None }));
        assert!(!channel.connected());
    }

    #[tokio::test]
    async fn receive_error_reports_then_closes() {
        let (transport, _sent, _closed) = MockTransport::new(vec![Some(Err(ConnectionError::Socket("reset".into())))]);
        let (mut channel, mut events) = TransportChannel::start(transport, Identity::new("Ana"));
        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));
        assert_eq!(events.recv().await, Some(ChannelEvent::Error("socket error: reset".into())));
        assert!(matches!(events.recv().await, Some(ChannelEvent::Closed { reason: Some(_) })));
        assert!(!channel.connected());
        Outbox::send(&mut channel, ClientMsg::RollDice);
    }

    #[test]
    fn vec_outbox_records() {
        let mut out: Vec<ClientMsg> = Vec::new();
        Outbox::send(&mut out, ClientMsg::RequestColors);
        assert_eq!(out, vec![ClientMsg::RequestColors]);
    }
}
