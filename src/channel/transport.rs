//! Transport seam for the reconnecting channel
//!
//! A [`Connector`] produces a [`Connection`]: a sink for outbound text frames
//! and a stream of inbound [`Frame`]s. Production code uses
//! [`TungsteniteConnector`]; tests plug in an in-memory connector.

use super::ChannelError;
use futures_util::future::BoxFuture;
use futures_util::sink::Sink;
use futures_util::stream::Stream;
use futures_util::{future, SinkExt, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace};

/// Inbound frame as seen by the channel
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Text(String),
    /// Peer sent a close frame; `clean` is false for abnormal close codes
    Close { clean: bool },
    /// Ping, pong or binary frame; counts as liveness only
    Control,
}

pub(crate) type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub(crate) type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ChannelError>> + Send>>;

/// One live bidirectional connection
pub(crate) struct Connection {
    pub(crate) outgoing: FrameSink,
    pub(crate) incoming: FrameStream,
}

/// Opens connections to a target address
pub(crate) trait Connector: Send + Sync + 'static {
    fn connect(&self, address: &str) -> BoxFuture<'static, Result<Connection, ChannelError>>;
}

/// WebSocket connector backed by tokio-tungstenite
#[derive(Debug, Clone)]
pub(crate) struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl TungsteniteConnector {
    pub(crate) fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TungsteniteConnector {
    fn connect(&self, address: &str) -> BoxFuture<'static, Result<Connection, ChannelError>> {
        let address = address.to_string();
        let connect_timeout = self.connect_timeout;

        Box::pin(async move {
            let (ws_stream, _response) = timeout(connect_timeout, connect_async(address.as_str()))
                .await
                .map_err(|_| ChannelError::ConnectTimeout(connect_timeout))?
                .map_err(|e| ChannelError::Transport(e.to_string()))?;
            debug!(address = %address, "WebSocket handshake complete");

            let (ws_sink, ws_stream) = ws_stream.split();

            let outgoing = ws_sink
                .sink_map_err(|e| ChannelError::Transport(e.to_string()))
                .with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text))));

            let incoming = ws_stream.map(|result| match result {
                Ok(Message::Text(text)) => Ok(Frame::Text(text)),
                Ok(Message::Close(close)) => {
                    let clean = close
                        .as_ref()
                        .map(|c| is_clean_close(c.code))
                        .unwrap_or(true);
                    Ok(Frame::Close { clean })
                }
                Ok(other) => {
                    trace!("Received non-text WebSocket frame: {:?}", other);
                    Ok(Frame::Control)
                }
                Err(e) => Err(ChannelError::Transport(e.to_string())),
            });

            Ok(Connection {
                outgoing: Box::pin(outgoing),
                incoming: Box::pin(incoming),
            })
        })
    }
}

fn is_clean_close(code: CloseCode) -> bool {
    matches!(code, CloseCode::Normal | CloseCode::Away)
}
