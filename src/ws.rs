//! Shared WebSocket transport.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. The relay uses [`accept`] on sockets handed over by
//! its listener; [`connect`] is the client side, used by the `receive`
//! subcommand and the tests.
//!
//! Both sides share one concrete stream type: accepted sockets are wrapped
//! in `MaybeTlsStream::Plain` so the halves are not generic.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::MaybeTlsStream;

/// Concrete WebSocket stream type.
type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Received WebSocket message.
#[derive(Debug)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping frame with payload.
    Ping(Vec<u8>),
    /// Pong frame with payload.
    Pong(Vec<u8>),
    /// Close frame with status code and reason.
    Close {
        /// WebSocket close code (1000 = normal, 1005 = no code).
        code: u16,
        /// Human-readable close reason.
        reason: String,
    },
}

impl WsMessage {
    /// Short description for logs (kind and size, never contents).
    pub fn describe(&self) -> String {
        match self {
            Self::Text(text) => format!("text ({} bytes)", text.len()),
            Self::Binary(data) => format!("binary ({} bytes)", data.len()),
            Self::Ping(_) => "ping".to_string(),
            Self::Pong(_) => "pong".to_string(),
            Self::Close { code, .. } => format!("close ({code})"),
        }
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

impl WsWriter {
    /// Send one binary message and wait until it is flushed.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails (connection closed, I/O error).
    pub async fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Binary(data))
            .await
            .context("WebSocket send_binary failed")
    }

    /// Send a UTF-8 text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.sink
            .send(tungstenite::Message::Text(text.to_string()))
            .await
            .context("WebSocket send_text failed")
    }

    /// Send a close frame with a status code and reason.
    ///
    /// # Errors
    ///
    /// Returns an error if the send fails.
    pub async fn send_close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .context("WebSocket send_close failed")
    }

    /// Flush pending writes and close the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if closing fails.
    pub async fn close(&mut self) -> Result<()> {
        self.sink.close().await.context("WebSocket close failed")
    }

    /// Best-effort close: close frame, then sink close, both bounded by
    /// `timeout`. Errors are logged at debug level only since the peer may
    /// already be gone.
    pub async fn close_gracefully(&mut self, code: u16, reason: &str, timeout: Duration) {
        let result = tokio::time::timeout(timeout, async {
            self.send_close(code, reason).await?;
            self.close().await
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("WebSocket close: {e:#}"),
            Err(_) => log::debug!("WebSocket close timed out after {timeout:?}"),
        }
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

impl WsReader {
    /// Receive the next message, returning `None` when the stream ends.
    ///
    /// Raw `Frame` variants are skipped internally. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Result<WsMessage>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(WsMessage::Text(text.to_string())));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(WsMessage::Binary(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    return Some(Ok(WsMessage::Ping(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Pong(data))) => {
                    return Some(Ok(WsMessage::Pong(data.to_vec())));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    return Some(Ok(WsMessage::Close { code, reason }));
                }
                Some(Ok(tungstenite::Message::Frame(_))) => {
                    // Raw frames are never surfaced.
                    continue;
                }
                Some(Err(e)) => {
                    return Some(Err(anyhow::anyhow!("WebSocket read error: {e}")));
                }
                None => return None,
            }
        }
    }
}

fn split(ws_stream: WsStream) -> (WsWriter, WsReader) {
    let (sink, stream) = ws_stream.split();
    (WsWriter { sink }, WsReader { stream })
}

/// Perform the server side of the WebSocket handshake on an accepted socket.
///
/// # Errors
///
/// Returns an error if the peer does not complete a valid upgrade request.
pub async fn accept(stream: TcpStream) -> Result<(WsWriter, WsReader)> {
    let ws_stream = tokio_tungstenite::accept_async(MaybeTlsStream::Plain(stream))
        .await
        .context("WebSocket accept failed")?;
    Ok(split(ws_stream))
}

/// Connect to a `ws://` URL.
///
/// # Errors
///
/// Returns an error if the URL is invalid or the handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    use tungstenite::client::IntoClientRequest;

    let request = url
        .into_client_request()
        .with_context(|| format!("invalid WebSocket URL: {url}"))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("WebSocket connect failed")?;

    Ok(split(ws_stream))
}
