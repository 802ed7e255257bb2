use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::error::TransportError;
use super::{EventSink, Transport};
use crate::Result;
use crate::endpoint::Endpoint;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Connection {
    write: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

/// [`Transport`] over a `tokio-tungstenite` WebSocket.
///
/// Text and binary frames become message events, a close frame becomes a close event carrying
/// its reason, and stream errors become error events. Ping/pong frames are handled by
/// tungstenite and never surface.
#[derive(Default)]
pub struct TungsteniteTransport {
    connection: Mutex<Option<Connection>>,
}

impl TungsteniteTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn read_loop(mut read: futures::stream::SplitStream<WsStream>, events: EventSink) {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    events.message(text.as_bytes());
                }
                Ok(Message::Binary(bytes)) => {
                    events.message(bytes.to_vec());
                }
                Ok(Message::Close(frame)) => {
                    events.closed(frame.map(|f| f.reason.as_str().to_owned()));
                    return;
                }
                Err(e) => {
                    events.error(e.to_string());
                    return;
                }
                _ => {
                    // Ignore ping/pong, tungstenite answers them itself.
                }
            }
        }

        events.closed(None);
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, endpoint: &Endpoint, events: EventSink) -> bool {
        let ws_stream = match connect_async(endpoint.url()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let error = TransportError::Connection(e);
                #[cfg(feature = "tracing")]
                tracing::warn!(%endpoint, "Unable to open WebSocket: {error}");
                #[cfg(not(feature = "tracing"))]
                let _ = &error;
                return false;
            }
        };

        let (write, read) = ws_stream.split();
        let reader = tokio::spawn(Self::read_loop(read, events));

        let previous = self
            .connection
            .lock()
            .await
            .replace(Connection { write, reader });
        if let Some(previous) = previous {
            previous.reader.abort();
        }

        true
    }

    async fn write(&self, text: String) -> Result<()> {
        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(TransportError::NotConnected)?;

        connection.write.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&self) {
        let Some(mut connection) = self.connection.lock().await.take() else {
            return;
        };

        connection.reader.abort();
        if let Err(e) = connection.write.send(Message::Close(None)).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Unable to send close frame: {e}");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
