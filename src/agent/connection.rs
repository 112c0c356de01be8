use super::messages::ServerToAgent;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("connection is closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(#[source] WsError),
}

impl From<WsError> for ConnectionError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectionError::Closed,
            other => ConnectionError::Transport(other),
        }
    }
}

/// One bidirectional transport to a remote peer
///
/// Implementations must allow `send` to be called from many tasks at once and
/// must put at most one write on the underlying transport at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Deliver one message to the peer, waiting for any send already in progress
    async fn send(&self, message: &ServerToAgent) -> Result<(), ConnectionError>;

    /// Close the transport. Registry cleanup is left to the read loop that
    /// observes the close.
    async fn disconnect(&self) -> Result<(), ConnectionError>;

    fn remote_addr(&self) -> Option<SocketAddr> { None }
}

/// Shared handle to a [`Connection`] that compares and hashes by identity.
///
/// Two handles are equal only when they point at the same connection object,
/// so a handle can key the registry's connection map for the whole lifetime
/// of the transport.
#[derive(Clone)]
pub struct ConnectionRef(Arc<dyn Connection>);

impl ConnectionRef {
    pub fn new<C: Connection + 'static>(conn: C) -> Self { Self(Arc::new(conn)) }

    pub fn from_arc(conn: Arc<dyn Connection>) -> Self { Self(conn) }

    fn addr(&self) -> usize { Arc::as_ptr(&self.0).cast::<()>() as usize }
}

impl Deref for ConnectionRef {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target { self.0.as_ref() }
}

impl PartialEq for ConnectionRef {
    fn eq(&self, other: &Self) -> bool { self.addr() == other.addr() }
}

impl Eq for ConnectionRef {}

impl Hash for ConnectionRef {
    fn hash<H: Hasher>(&self, state: &mut H) { self.addr().hash(state) }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.remote_addr() {
            Some(peer) => write!(f, "ConnectionRef({:#x}, {peer})", self.addr()),
            None => write!(f, "ConnectionRef({:#x})", self.addr()),
        }
    }
}

/// A [`Connection`] over the write half of a WebSocket.
///
/// The WebSocket sink cannot take concurrent writers, so every write goes
/// through one async lock. Messages are encoded before the lock is taken.
///
/// `disconnect` does not queue behind pending writes. It raises the close
/// signal first, which aborts every send still waiting on the lock or on a
/// peer that stopped reading, and only then closes the sink.
pub struct WsConnection<W> {
    sink: Mutex<W>,
    closed: watch::Sender<bool>,
    peer: Option<SocketAddr>,
}

impl<W> WsConnection<W> {
    pub fn new(sink: W, peer: Option<SocketAddr>) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: watch::Sender::new(false),
            peer,
        }
    }
}

/// Resolves once the close signal has been raised
async fn closing(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl<W> Connection for WsConnection<W>
where
    W: Sink<Message, Error = WsError> + Unpin + Send + 'static,
{
    async fn send(&self, message: &ServerToAgent) -> Result<(), ConnectionError> {
        let frame = Message::Text(serde_json::to_string(message)?);

        let closed = self.closed.subscribe();
        let already_closed = *closed.borrow();
        if already_closed {
            return Err(ConnectionError::Closed);
        }

        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(frame).await
        };

        tokio::select! {
            result = write => Ok(result?),
            _ = closing(closed) => Err(ConnectionError::Closed),
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectionError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;

        match sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(ConnectionError::Transport(err)),
        }
    }

    fn remote_addr(&self) -> Option<SocketAddr> { self.peer }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};

    /// Sink for a peer that stopped reading: no write ever finishes flushing
    #[derive(Default)]
    pub(crate) struct StalledSink {
        close_stalls: bool,
    }

    impl StalledSink {
        /// Closing stalls as well, like a close frame stuck behind unread data
        pub(crate) fn stalled_close() -> Self { Self { close_stalls: true } }
    }

    impl Sink<Message> for StalledSink {
        type Error = WsError;

        fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> { Poll::Ready(Ok(())) }

        fn start_send(self: Pin<&mut Self>, _item: Message) -> Result<(), WsError> { Ok(()) }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> { Poll::Pending }

        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), WsError>> {
            if self.close_stalls { Poll::Pending } else { Poll::Ready(Ok(())) }
        }
    }

    /// Connection double that keeps every message instead of writing it
    #[derive(Default)]
    pub(crate) struct RecordingConnection {
        sent: parking_lot::Mutex<Vec<ServerToAgent>>,
        closed: AtomicBool,
        failing: AtomicBool,
    }

    impl RecordingConnection {
        pub(crate) fn shared() -> (Arc<Self>, ConnectionRef) {
            let conn = Arc::new(Self::default());
            let handle = ConnectionRef::from_arc(conn.clone());
            (conn, handle)
        }

        pub(crate) fn sent(&self) -> Vec<ServerToAgent> { self.sent.lock().clone() }

        pub(crate) fn is_closed(&self) -> bool { self.closed.load(Ordering::SeqCst) }

        pub(crate) fn fail_sends(&self) { self.failing.store(true, Ordering::SeqCst) }
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        async fn send(&self, message: &ServerToAgent) -> Result<(), ConnectionError> {
            if self.is_closed() {
                return Err(ConnectionError::Closed);
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(ConnectionError::Transport(WsError::Io(std::io::ErrorKind::BrokenPipe.into())));
            }

            self.sent.lock().push(message.clone());
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), ConnectionError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }
}
