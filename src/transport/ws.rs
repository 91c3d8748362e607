//! WebSocket dialer over `tokio-tungstenite`.
//!
//! One spawned task per epoch: handshake, optional Socket.IO namespace
//! connect, then a single loop that forwards queued outbound events and
//! decodes inbound frames. The task reports `Opened` once the connection is
//! usable and exactly one `Closed` when it ends for any reason other than
//! being aborted by a hang-up.

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Request};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use wire::{Codec, Credentials, Outbound, Packet};

use super::{AuthMode, Dialer, SignalSink, SocketHandle, TransportError};

type Stream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Clone, Debug)]
pub struct WsDialer {
    url: String,
    codec: Codec,
    auth_mode: AuthMode,
}

impl WsDialer {
    pub fn new(url: impl Into<String>, codec: Codec, auth_mode: AuthMode) -> Self {
        Self { url: url.into(), codec, auth_mode }
    }
}

impl Dialer for WsDialer {
    fn dial(&self, epoch: u64, credentials: Credentials, signals: SignalSink) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let dialer = self.clone();
        let task = tokio::spawn(async move {
            match dialer.connect_and_run(&credentials, &signals, rx).await {
                Ok(()) => {
                    debug!(epoch, "ws: closed");
                    signals.closed(None);
                }
                Err(e) => {
                    warn!(epoch, error = %e, "ws: connection failed");
                    signals.closed(Some(e.to_string()));
                }
            }
        });
        SocketHandle::new(epoch, tx, Some(task))
    }
}

impl WsDialer {
    async fn connect_and_run(
        &self,
        credentials: &Credentials,
        signals: &SignalSink,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ) -> Result<(), TransportError> {
        let request = handshake_request(&self.url, &self.codec, self.auth_mode, credentials)?;
        let (mut stream, _) = connect_async(request).await.map_err(boxed)?;

        // First-message auth sends the credentials as an event once open.
        let connect_auth = (self.auth_mode == AuthMode::ConnectTime).then_some(credentials);
        if let Some(packet) = self.codec.connect_packet(connect_auth) {
            stream.send(Message::Text(packet.into())).await.map_err(boxed)?;
        }
        if self.codec.awaits_connect_ack() {
            self.await_connect_ack(&mut stream).await?;
        }
        signals.opened();

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    let Some(event) = event else {
                        let _ = stream.close(None).await;
                        return Ok(());
                    };
                    let frame = self.codec.encode(&event);
                    stream.send(Message::Text(frame.into())).await.map_err(boxed)?;
                }
                incoming = stream.next() => {
                    let Some(incoming) = incoming else {
                        return Ok(());
                    };
                    match incoming.map_err(boxed)? {
                        Message::Text(text) => match self.codec.decode(text.as_str()) {
                            Ok(Packet::Event(event)) => signals.inbound(event),
                            Ok(Packet::Ping) => self.pong(&mut stream).await?,
                            Ok(Packet::Disconnect) => return Ok(()),
                            Ok(Packet::ConnectError(reason)) => return Err(TransportError::Refused(reason)),
                            Ok(_) => {}
                            Err(e) => warn!(error = %e, "ws: undecodable frame"),
                        },
                        Message::Close(_) => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }

    /// Wait for the Socket.IO `40` acknowledgement, answering heartbeats.
    async fn await_connect_ack(&self, stream: &mut Stream) -> Result<(), TransportError> {
        while let Some(incoming) = stream.next().await {
            match incoming.map_err(boxed)? {
                Message::Text(text) => match self.codec.decode(text.as_str()) {
                    Ok(Packet::Connected) => return Ok(()),
                    Ok(Packet::ConnectError(reason)) => return Err(TransportError::Refused(reason)),
                    Ok(Packet::Ping) => self.pong(stream).await?,
                    Ok(Packet::Disconnect) => return Err(TransportError::HandshakeClosed),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "ws: undecodable handshake frame"),
                },
                Message::Close(_) => return Err(TransportError::HandshakeClosed),
                _ => {}
            }
        }
        Err(TransportError::HandshakeClosed)
    }

    async fn pong(&self, stream: &mut Stream) -> Result<(), TransportError> {
        if let Some(pong) = self.codec.pong() {
            stream.send(Message::Text(pong.into())).await.map_err(boxed)?;
        }
        Ok(())
    }
}

/// Build the upgrade request for `codec` and `auth_mode`.
///
/// Plain JSON sockets with connect-time auth carry the credentials as
/// `api_key`/`user_id` query parameters plus a `user_id` header. Socket.IO
/// sockets get the Engine.IO query; their credentials travel in the connect
/// packet instead.
pub(crate) fn handshake_request(
    url: &str,
    codec: &Codec,
    auth_mode: AuthMode,
    credentials: &Credentials,
) -> Result<Request<()>, TransportError> {
    let mut url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
    let with_credentials = matches!(codec, Codec::Json) && auth_mode == AuthMode::ConnectTime;
    {
        let mut query = url.query_pairs_mut();
        match codec {
            Codec::Json if with_credentials => {
                query.append_pair("api_key", &credentials.api_key);
                query.append_pair("user_id", &credentials.user_id);
            }
            Codec::Json => {}
            Codec::SocketIo { .. } => {
                query.append_pair("EIO", "4");
                query.append_pair("transport", "websocket");
            }
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }

    let mut request = url.as_str().into_client_request().map_err(boxed)?;
    if with_credentials {
        let name = HeaderName::from_bytes(b"user_id").map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
        let value =
            HeaderValue::from_str(&credentials.user_id).map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
        request.headers_mut().insert(name, value);
    }
    Ok(request)
}

fn boxed(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    TransportError::WebSocket(Box::new(e))
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
