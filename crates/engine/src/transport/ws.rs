// WebSocket transport over tokio-tungstenite.
//
// Frames are JSON text. Malformed frames are logged and skipped rather
// than tearing the connection down; binary and ping/pong frames are
// handled below this layer and ignored here.

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::warn;

use huddle_common::protocol::ws::WsMessage;

use super::Transport;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport speaking huddle-sync.v1 over a WebSocket.
#[derive(Default)]
pub struct WsTransport {
    stream: Option<WsStream>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WsTransport {
    async fn open(&mut self, url: &str) -> Result<()> {
        let (stream, _response) =
            connect_async(url).await.with_context(|| format!("websocket connect to {url}"))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, msg: &WsMessage) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(|| anyhow!("transport not open"))?;
        let encoded = serde_json::to_string(msg).context("encode frame")?;
        stream.send(Message::Text(encoded.into())).await.context("websocket send")?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<WsMessage>> {
        let stream = self.stream.as_mut().ok_or_else(|| anyhow!("transport not open"))?;
        loop {
            match stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(anyhow!(e)).context("websocket receive"),
                Some(Ok(Message::Text(text))) => match serde_json::from_str(text.as_str()) {
                    Ok(msg) => return Ok(Some(msg)),
                    Err(e) => {
                        warn!(error = %e, "skipping malformed frame");
                    }
                },
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Ping/pong are answered by tungstenite; binary frames are
                // not part of huddle-sync.v1.
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
