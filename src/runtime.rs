//! Async driver for a [`Session`].
//!
//! DESIGN
//! ======
//! One spawned task owns the session and drains an unbounded input queue in
//! arrival order. Each input runs to completion, then its effects are
//! executed in order. Effects that wait (sockets, timers, ticket requests)
//! run in their own tasks and report back only by posting inputs, so the
//! session never observes interleaving.
//!
//! The host talks to the task through a cloneable [`Widget`] handle:
//! commands go in over the queue, presentation events come out over a
//! broadcast channel, and the connection state is mirrored on a watch.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::identity::IdentityStore;
use crate::model::{VisitorId, WidgetConfig};
use crate::onboarding::InputValidator;
use crate::services::{ConfigService, ServiceError, TicketService};
use crate::session::{Effect, Input, Session, SessionEvent, SessionOptions};
use crate::store::{DurableSessionStore, SharedStore};
use crate::timers::TimerId;
use crate::transport::{ConnectionState, Dialer, SignalSink, SocketHandle};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum WidgetError {
    #[error("widget configuration unavailable: {0}")]
    Config(#[source] ServiceError),
    #[error("widget session has stopped")]
    Stopped,
}

/// External collaborators of a running widget.
pub struct Backends {
    pub config: Arc<dyn ConfigService>,
    pub tickets: Arc<dyn TicketService>,
    pub dialer: Arc<dyn Dialer>,
    pub storage: SharedStore,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct Widget {
    inputs: mpsc::UnboundedSender<Input>,
    events: broadcast::Sender<SessionEvent>,
    connection: watch::Receiver<ConnectionState>,
    config: Arc<WidgetConfig>,
    visitor_id: VisitorId,
}

impl Widget {
    /// Fetch the widget config, rehydrate the session, and spawn its task.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Config`] when the config cannot be fetched;
    /// the widget does not start without it.
    pub async fn start(
        options: SessionOptions,
        validator: Box<dyn InputValidator>,
        backends: Backends,
    ) -> Result<(Self, JoinHandle<()>), WidgetError> {
        let config = match backends.config.fetch_config().await {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "widget: failed to load configuration");
                return Err(WidgetError::Config(e));
            }
        };
        info!(name = config.display_name(), "widget: configuration loaded");

        let mut identity = IdentityStore::new(backends.storage.clone());
        let store = DurableSessionStore::new(backends.storage.clone());
        let mut session = Session::new(options, &mut identity, store, validator, backends.clock.clone());
        let visitor_id = session.visitor_id().clone();

        let (state_tx, connection) = watch::channel(session.connection_state());
        session.connector_mut().on_connection_change(move |state| {
            state_tx.send_replace(*state);
        });

        let (inputs, rx) = mpsc::unbounded_channel();
        // Replay publishes the whole history in one batch before anyone reads.
        let capacity = EVENT_CAPACITY.max(session.messages().len() * 2 + 16);
        let (events, _) = broadcast::channel(capacity);
        let driver = Driver {
            session,
            inputs: inputs.clone(),
            events: events.clone(),
            tickets: backends.tickets,
            dialer: backends.dialer,
            socket: None,
            timers: HashMap::new(),
        };
        let task = tokio::spawn(driver.run(rx));

        let widget = Self { inputs, events, connection, config: Arc::new(config), visitor_id };
        Ok((widget, task))
    }

    /// # Errors
    ///
    /// Returns [`WidgetError::Stopped`] once the session task has exited.
    pub fn open(&self) -> Result<(), WidgetError> {
        self.post(Input::Open)
    }

    /// # Errors
    ///
    /// Returns [`WidgetError::Stopped`] once the session task has exited.
    pub fn close(&self) -> Result<(), WidgetError> {
        self.post(Input::Close)
    }

    /// # Errors
    ///
    /// Returns [`WidgetError::Stopped`] once the session task has exited.
    pub fn submit(&self, text: impl Into<String>) -> Result<(), WidgetError> {
        self.post(Input::Submit(text.into()))
    }

    /// Close the widget and stop the session task.
    ///
    /// # Errors
    ///
    /// Returns [`WidgetError::Stopped`] when the task has already exited.
    pub fn shutdown(&self) -> Result<(), WidgetError> {
        self.post(Input::Shutdown)
    }

    /// Events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    #[must_use]
    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    #[must_use]
    pub fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    fn post(&self, input: Input) -> Result<(), WidgetError> {
        self.inputs.send(input).map_err(|_| WidgetError::Stopped)
    }
}

struct Driver {
    session: Session,
    inputs: mpsc::UnboundedSender<Input>,
    events: broadcast::Sender<SessionEvent>,
    tickets: Arc<dyn TicketService>,
    dialer: Arc<dyn Dialer>,
    socket: Option<SocketHandle>,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = rx.recv().await {
            let stop = matches!(input, Input::Shutdown);
            for effect in self.session.handle(input) {
                self.execute(effect);
            }
            if stop {
                break;
            }
        }
        self.socket = None;
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        debug!("widget: session task stopped");
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Dial { epoch, credentials } => {
                let sink = SignalSink::new(epoch, self.inputs.clone());
                // Replacing the handle hangs up any previous socket.
                self.socket = Some(self.dialer.dial(epoch, credentials, sink));
            }
            Effect::Write { epoch, event } => match &self.socket {
                Some(socket) if socket.epoch() == epoch => {
                    if !socket.send(event) {
                        debug!(epoch, "widget: socket task gone, dropping write");
                    }
                }
                _ => debug!(epoch, "widget: no socket for write"),
            },
            Effect::Hangup { epoch } => {
                if self.socket.as_ref().is_some_and(|s| s.epoch() == epoch) {
                    self.socket = None;
                }
            }
            Effect::StartTimer { token, after } => {
                let inputs = self.inputs.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = inputs.send(Input::TimerFired(token));
                });
                if let Some(previous) = self.timers.insert(token.id, task) {
                    previous.abort();
                }
            }
            Effect::CancelTimer(id) => {
                if let Some(task) = self.timers.remove(&id) {
                    task.abort();
                }
            }
            Effect::CreateTicket(request) => {
                let tickets = self.tickets.clone();
                let inputs = self.inputs.clone();
                tokio::spawn(async move {
                    let result = tickets.create_ticket(&request).await;
                    if let Err(e) = &result {
                        warn!(error = %e, "widget: ticket request failed");
                    }
                    let _ = inputs.send(Input::TicketResolved(result));
                });
            }
            Effect::Emit(event) => {
                // No subscribers is fine; the host may not render yet.
                let _ = self.events.send(event);
            }
        }
    }
}

#[cfg(test)]
#[path = "runtime_test.rs"]
mod tests;
