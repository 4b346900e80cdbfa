//! # Upstream Connection
//!
//! Client-side websocket built on `tokio-tungstenite`. Once connected the stream is
//! split into two tasks:
//! - a **writer** that drains an unbounded command channel, so sends from the
//!   session never block and keep their call order
//! - a **reader** that reports every inbound frame, the close, or a transport error
//!   through a callback (the relay actor turns these into actor messages); it is
//!   started separately so no frame can arrive before the owner holds the handle
//!
//! The same connection type is used by the `relay-client` binary to talk to the relay.

use crate::config::UpstreamConfig;
use crate::error::RelayError;
use crate::relay::frame::{CloseCode, CloseFrame, Frame, FrameSink};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// What the reader task observed.
#[derive(Debug)]
pub enum UpstreamEvent {
    Frame(Frame),
    /// The peer closed the connection (or the stream simply ended)
    Closed,
    /// The connection failed mid-stream
    Failed(RelayError),
}

enum Command {
    Send(Frame),
    Close(CloseFrame),
}

/// Sending half of an open connection.
pub struct UpstreamHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl FrameSink for UpstreamHandle {
    fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        self.commands
            .send(Command::Send(frame))
            .map_err(|_| RelayError::DestinationClosed)
    }

    fn close(&mut self, frame: CloseFrame) {
        // A failed send means the writer already stopped
        let _ = self.commands.send(Command::Close(frame));
    }
}

pub fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
    }
}

fn to_ws_close(frame: CloseFrame) -> WsCloseFrame<'static> {
    let code = match frame.code {
        CloseCode::Normal => WsCloseCode::Normal,
        CloseCode::Policy => WsCloseCode::Policy,
        CloseCode::Error => WsCloseCode::Error,
    };
    WsCloseFrame {
        code,
        reason: Cow::Owned(frame.reason),
    }
}

/// Upgrade request for the realtime service: bearer key plus the beta header.
pub fn upstream_request(config: &UpstreamConfig, api_key: &str) -> Result<Request, RelayError> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| RelayError::UpstreamConnect(format!("invalid upstream URL: {}", e)))?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key))
        .map_err(|e| RelayError::UpstreamConnect(format!("invalid API key header: {}", e)))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    if !config.beta_header.is_empty() {
        let beta = HeaderValue::from_str(&config.beta_header)
            .map_err(|e| RelayError::UpstreamConnect(format!("invalid beta header: {}", e)))?;
        request.headers_mut().insert("OpenAI-Beta", beta);
    }

    Ok(request)
}

/// Relay endpoint URL carrying `token` as a properly encoded query parameter.
pub fn relay_url(base: &str, token: &str) -> Result<Url, RelayError> {
    let mut url = Url::parse(base)
        .map_err(|e| RelayError::UpstreamConnect(format!("invalid relay URL: {}", e)))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

/// Connect to the realtime service for one session.
pub async fn connect_upstream(
    config: &UpstreamConfig,
    api_key: &str,
) -> Result<(UpstreamHandle, UpstreamReader), RelayError> {
    let request = upstream_request(config, api_key)?;
    open_socket(request).await
}

/// Open a websocket and start its writer task.
///
/// Reading starts only when [`UpstreamReader::spawn`] is called, so the owner can put
/// the handle in place before the first inbound frame is reported.
pub async fn open_socket<R>(request: R) -> Result<(UpstreamHandle, UpstreamReader), RelayError>
where
    R: IntoClientRequest + Unpin,
{
    let (stream, response) = connect_async(request)
        .await
        .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;
    debug!(status = %response.status(), "Websocket handshake complete");

    let (mut write, read) = stream.split();
    let (commands, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut commands = UnboundedReceiverStream::new(rx);

        while let Some(command) = commands.next().await {
            match command {
                Command::Send(frame) => {
                    if let Err(err) = write.send(to_message(frame)).await {
                        debug!(error = %err, "Websocket write failed, stopping writer");
                        return;
                    }
                }
                Command::Close(frame) => {
                    info!(code = frame.code.as_u16(), reason = %frame.reason, "Closing websocket");
                    let _ = write.send(Message::Close(Some(to_ws_close(frame)))).await;
                    return;
                }
            }
        }

        // Handle dropped without an explicit close
        let _ = write.close().await;
    });

    Ok((UpstreamHandle { commands }, UpstreamReader { read }))
}

/// Receiving half of an open connection, not yet being read.
pub struct UpstreamReader {
    read: SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl UpstreamReader {
    /// Report every inbound frame, then exactly one `Closed` or `Failed`.
    pub fn spawn<F>(self, on_event: F) -> JoinHandle<()>
    where
        F: Fn(UpstreamEvent) + Send + 'static,
    {
        let mut read = self.read;

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => on_event(UpstreamEvent::Frame(Frame::Text(text))),
                    Ok(Message::Binary(data)) => on_event(UpstreamEvent::Frame(Frame::Binary(data))),
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Websocket closed by peer");
                        on_event(UpstreamEvent::Closed);
                        return;
                    }
                    // Ping/pong are answered by tungstenite
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "Websocket read failed");
                        on_event(UpstreamEvent::Failed(RelayError::UpstreamTransport(err.to_string())));
                        return;
                    }
                }
            }

            on_event(UpstreamEvent::Closed);
        })
    }
}
