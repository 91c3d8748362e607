//! Realtime connection lifecycle.
//!
//! DESIGN
//! ======
//! [`Connector`] is the connection state machine. It performs no I/O: each
//! operation returns [`ConnectorAction`]s that the runtime executes (dial a
//! socket, write a frame, hang up, arm the reconnect timer).
//!
//! ```text
//! Disconnected --connect--> Connecting --open--> Connected
//!      ^                        |                    |
//!      |                     closed               closed
//!   disconnect                  v                    v
//!      +------------------- Reconnecting <-----------+
//!                          (timer -> Connecting)
//! ```
//!
//! Every dial is tagged with a fresh epoch. Socket signals carry their epoch
//! and anything from an older dial is ignored, so a socket that is still
//! closing after the widget was reopened cannot move the new connection.
//!
//! Reconnection uses a fixed backoff and never gives up while the widget is
//! open. `disconnect` is the only way to stop it.

mod ws;

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};
use wire::{Credentials, Inbound, Outbound};

use crate::session::Input;

pub use ws::WsDialer;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Where the credentials travel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// Handshake query/headers or the Socket.IO connect packet.
    #[default]
    ConnectTime,
    /// An `authenticate` event written as soon as the socket opens.
    FirstMessage,
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "connect" | "connect_time" | "handshake" => Ok(Self::ConnectTime),
            "first_message" | "message" => Ok(Self::FirstMessage),
            other => Err(format!("unknown auth mode '{other}' (expected 'connect' or 'first_message')")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("invalid websocket url: {0}")]
    InvalidUrl(String),
    #[error("invalid handshake header: {0}")]
    InvalidHeader(String),
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("server refused connection: {0}")]
    Refused(String),
    #[error("socket closed during handshake")]
    HandshakeClosed,
}

/// Work the runtime performs on the connector's behalf.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectorAction {
    Dial { epoch: u64, credentials: Credentials },
    Write(Outbound),
    Hangup { epoch: u64 },
    ArmReconnect(Duration),
    CancelReconnect,
}

type Handler<T> = Box<dyn FnMut(&T) + Send>;

/// Registered callbacks, invoked in registration order.
pub struct Observers<T> {
    handlers: Vec<Handler<T>>,
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self { handlers: Vec::new() }
    }
}

impl<T> Observers<T> {
    pub fn subscribe(&mut self, handler: impl FnMut(&T) + Send + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn notify(&mut self, value: &T) {
        for handler in &mut self.handlers {
            handler(value);
        }
    }
}

pub struct Connector {
    state: ConnectionState,
    auth_mode: AuthMode,
    backoff: Duration,
    credentials: Option<Credentials>,
    epoch: u64,
    wants_connection: bool,
    message_observers: Observers<Inbound>,
    state_observers: Observers<ConnectionState>,
}

impl Connector {
    #[must_use]
    pub fn new(auth_mode: AuthMode, backoff: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            auth_mode,
            backoff,
            credentials: None,
            epoch: 0,
            wants_connection: false,
            message_observers: Observers::default(),
            state_observers: Observers::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Epoch of the most recent dial.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn on_message(&mut self, handler: impl FnMut(&Inbound) + Send + 'static) {
        self.message_observers.subscribe(handler);
    }

    pub fn on_connection_change(&mut self, handler: impl FnMut(&ConnectionState) + Send + 'static) {
        self.state_observers.subscribe(handler);
    }

    /// Start connecting. No-op while a connection is up or being dialed.
    pub fn connect(&mut self, credentials: Credentials) -> Vec<ConnectorAction> {
        self.credentials = Some(credentials);
        self.wants_connection = true;
        match self.state {
            ConnectionState::Disconnected => self.dial(),
            ConnectionState::Reconnecting => {
                let mut actions = vec![ConnectorAction::CancelReconnect];
                actions.extend(self.dial());
                actions
            }
            ConnectionState::Connecting | ConnectionState::Connected => Vec::new(),
        }
    }

    /// The socket for `epoch` finished its handshake.
    pub fn on_open(&mut self, epoch: u64) -> Vec<ConnectorAction> {
        if epoch != self.epoch || self.state != ConnectionState::Connecting {
            debug!(epoch, current = self.epoch, "transport: ignoring stale open");
            return Vec::new();
        }
        info!(epoch, "transport: connected");
        self.set_state(ConnectionState::Connected);

        match (self.auth_mode, &self.credentials) {
            (AuthMode::FirstMessage, Some(credentials)) => {
                vec![ConnectorAction::Write(Outbound::Authenticate(credentials.clone()))]
            }
            _ => Vec::new(),
        }
    }

    /// The socket for `epoch` closed or failed to open.
    pub fn on_closed(&mut self, epoch: u64) -> Vec<ConnectorAction> {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "transport: ignoring stale close");
            return Vec::new();
        }
        if !self.wants_connection {
            self.set_state(ConnectionState::Disconnected);
            return Vec::new();
        }
        if self.state == ConnectionState::Reconnecting {
            return Vec::new();
        }
        info!(epoch, backoff_ms = self.backoff.as_millis(), "transport: connection lost, reconnecting");
        self.set_state(ConnectionState::Reconnecting);
        vec![ConnectorAction::ArmReconnect(self.backoff)]
    }

    /// The reconnect backoff elapsed.
    pub fn on_reconnect_due(&mut self) -> Vec<ConnectorAction> {
        if self.wants_connection && self.state == ConnectionState::Reconnecting {
            self.dial()
        } else {
            Vec::new()
        }
    }

    /// Close the connection and suppress reconnection.
    pub fn disconnect(&mut self) -> Vec<ConnectorAction> {
        self.wants_connection = false;
        let actions = match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                vec![ConnectorAction::Hangup { epoch: self.epoch }]
            }
            ConnectionState::Reconnecting => vec![ConnectorAction::CancelReconnect],
            ConnectionState::Disconnected => Vec::new(),
        };
        if self.state != ConnectionState::Disconnected {
            info!(epoch = self.epoch, "transport: disconnected");
        }
        self.set_state(ConnectionState::Disconnected);
        actions
    }

    /// Best-effort send; nothing is queued while disconnected.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] unless the state is `Connected`.
    pub fn send(&mut self, event: Outbound) -> Result<ConnectorAction, TransportError> {
        if self.state == ConnectionState::Connected {
            Ok(ConnectorAction::Write(event))
        } else {
            Err(TransportError::NotConnected)
        }
    }

    /// `join_room` for `ticket_id`; `None` unless connected.
    pub fn join_ticket_room(&mut self, ticket_id: &str) -> Option<ConnectorAction> {
        self.send(Outbound::JoinRoom { ticket_id: ticket_id.to_owned() }).ok()
    }

    /// Route an inbound event to observers. Returns `false` for stale epochs.
    pub fn deliver(&mut self, epoch: u64, event: &Inbound) -> bool {
        if epoch != self.epoch || self.state != ConnectionState::Connected {
            debug!(epoch, current = self.epoch, "transport: dropping event from stale socket");
            return false;
        }
        self.message_observers.notify(event);
        true
    }

    fn dial(&mut self) -> Vec<ConnectorAction> {
        let Some(credentials) = self.credentials.clone() else {
            return Vec::new();
        };
        self.epoch += 1;
        debug!(epoch = self.epoch, "transport: dialing");
        self.set_state(ConnectionState::Connecting);
        vec![ConnectorAction::Dial { epoch: self.epoch, credentials }]
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            self.state = next;
            self.state_observers.notify(&next);
        }
    }
}

// =============================================================================
// DIALER SEAM
// =============================================================================

/// Socket lifecycle reports, tagged with the dial epoch.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    Opened { epoch: u64 },
    Closed { epoch: u64, reason: Option<String> },
    Inbound { epoch: u64, event: Inbound },
}

/// Handle a socket task uses to report back into the session queue.
#[derive(Clone, Debug)]
pub struct SignalSink {
    epoch: u64,
    inputs: mpsc::UnboundedSender<Input>,
}

impl SignalSink {
    #[must_use]
    pub fn new(epoch: u64, inputs: mpsc::UnboundedSender<Input>) -> Self {
        Self { epoch, inputs }
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn opened(&self) {
        self.post(Signal::Opened { epoch: self.epoch });
    }

    pub fn closed(&self, reason: Option<String>) {
        self.post(Signal::Closed { epoch: self.epoch, reason });
    }

    pub fn inbound(&self, event: Inbound) {
        self.post(Signal::Inbound { epoch: self.epoch, event });
    }

    fn post(&self, signal: Signal) {
        // The session is gone once the receiver drops; nothing left to tell.
        let _ = self.inputs.send(Input::Transport(signal));
    }
}

/// Live socket owned by the runtime. Dropping it hangs up.
#[derive(Debug)]
pub struct SocketHandle {
    epoch: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SocketHandle {
    #[must_use]
    pub fn new(
        epoch: u64,
        outbound: mpsc::UnboundedSender<Outbound>,
        task: Option<tokio::task::JoinHandle<()>>,
    ) -> Self {
        Self { epoch, outbound, task }
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queue a frame. Returns `false` when the socket task has exited.
    pub fn send(&self, event: Outbound) -> bool {
        self.outbound.send(event).is_ok()
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens one socket per epoch.
pub trait Dialer: Send + Sync {
    fn dial(&self, epoch: u64, credentials: Credentials, signals: SignalSink) -> SocketHandle;
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
