//! Session controller: one conversation's state machine.
//!
//! DESIGN
//! ======
//! `Session::handle(Input) -> Vec<Effect>` is the only entry point. It owns
//! the durable store, the message log, onboarding, the connector and the
//! timer table, and it never performs I/O itself. The runtime feeds inputs
//! one at a time in arrival order and executes the returned effects in order.
//!
//! Presentation is part of the effect stream (`Effect::Emit`), so a test can
//! assert on exactly what a user would see after each input.
//!
//! TICKET LIFECYCLE
//! ================
//! No ticket: onboarding runs (first visit) or, when details are already on
//! file, the next user text becomes the description of a new ticket. While a
//! ticket request is in flight further text is refused. On success the
//! description becomes the first user message and is sent into the ticket
//! room. On closure the ticket and its history are dropped; user details stay.

use std::sync::Arc;
use std::time::Duration;

use time::{Date, OffsetDateTime, UtcOffset};
use tracing::{debug, info, warn};
use wire::{Credentials, Inbound, OutgoingMessage, Outbound};

use crate::clock::Clock;
use crate::identity::IdentityStore;
use crate::message_log::{MessageLog, TimelineEntry};
use crate::model::{Message, Sender, TicketInfo, UserDetails, VisitorId, format_timestamp};
use crate::onboarding::{InputValidator, Onboarding, OnboardingStep, Outcome, Prompt};
use crate::services::{ServiceError, TicketRequest};
use crate::store::DurableSessionStore;
use crate::timers::{TimerId, TimerTable, TimerToken};
use crate::transport::{AuthMode, ConnectionState, Connector, ConnectorAction, Signal, TransportError};

pub const TICKET_FAILURE_NOTICE: &str = "Sorry, we encountered an error setting up your chat. Please try again.";
pub const SEND_FAILURE_NOTICE: &str = "Failed to send message. Please try again.";
pub const BUSY_NOTICE: &str = "Please wait while we set up your chat.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub api_token: String,
    pub auth_mode: AuthMode,
    pub reconnect_backoff: Duration,
    pub typing_delay: Duration,
    pub ticket_category: String,
    pub utc_offset: UtcOffset,
}

#[derive(Debug)]
pub enum Input {
    Open,
    Close,
    Submit(String),
    Transport(Signal),
    TimerFired(TimerToken),
    TicketResolved(Result<TicketInfo, ServiceError>),
    Shutdown,
}

/// What a host renders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    ConversationStarted,
    MessageAppended { message: Message, replayed: bool },
    DateSeparator { date: Date },
    TypingStarted,
    TypingStopped,
    PromptChanged { prompt: Prompt },
    OnboardingAnswered { text: String },
    Notice { text: String },
    ConnectionChanged { state: ConnectionState },
    TicketClosed,
}

/// Work the runtime performs for the session.
#[derive(Debug, PartialEq)]
pub enum Effect {
    Dial { epoch: u64, credentials: Credentials },
    Write { epoch: u64, event: Outbound },
    Hangup { epoch: u64 },
    StartTimer { token: TimerToken, after: Duration },
    CancelTimer(TimerId),
    CreateTicket(TicketRequest),
    Emit(SessionEvent),
}

pub struct Session {
    options: SessionOptions,
    visitor_id: VisitorId,
    store: DurableSessionStore,
    log: MessageLog,
    onboarding: Onboarding,
    ticket: TicketInfo,
    connector: Connector,
    timers: TimerTable,
    clock: Arc<dyn Clock>,
    open: bool,
    history_shown: bool,
    conversation_started: bool,
    typing_shown: bool,
    pending_prompt: Option<Prompt>,
    /// Description of the in-flight ticket request.
    ticket_pending: Option<String>,
    reported_state: ConnectionState,
    effects: Vec<Effect>,
}

impl Session {
    /// Rehydrate from storage. The visitor id is resolved once, here.
    pub fn new(
        options: SessionOptions,
        identity: &mut IdentityStore,
        mut store: DurableSessionStore,
        validator: Box<dyn InputValidator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let visitor_id = identity.get_or_create_visitor_id();
        let snapshot = store.load();
        let log = MessageLog::restore(snapshot.messages, options.utc_offset);
        let connector = Connector::new(options.auth_mode, options.reconnect_backoff);
        info!(
            visitor_id = %visitor_id,
            ticket = snapshot.ticket_info.id.as_deref().unwrap_or("-"),
            messages = log.len(),
            "session: restored"
        );

        Self {
            options,
            visitor_id,
            store,
            log,
            onboarding: Onboarding::new(snapshot.user_details, validator),
            ticket: snapshot.ticket_info,
            connector,
            timers: TimerTable::new(),
            clock,
            open: false,
            history_shown: false,
            conversation_started: false,
            typing_shown: false,
            pending_prompt: None,
            ticket_pending: None,
            reported_state: ConnectionState::Disconnected,
            effects: Vec::new(),
        }
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::Open => self.open(),
            Input::Close | Input::Shutdown => self.close(),
            Input::Submit(text) => self.submit(&text),
            Input::Transport(signal) => self.on_signal(signal),
            Input::TimerFired(token) => self.on_timer(token),
            Input::TicketResolved(result) => self.on_ticket_resolved(result),
        }
        self.report_connection_state();
        std::mem::take(&mut self.effects)
    }

    #[must_use]
    pub fn visitor_id(&self) -> &VisitorId {
        &self.visitor_id
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn ticket(&self) -> &TicketInfo {
        &self.ticket
    }

    #[must_use]
    pub fn user_details(&self) -> &UserDetails {
        self.onboarding.details()
    }

    #[must_use]
    pub fn onboarding_step(&self) -> OnboardingStep {
        self.onboarding.step()
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.log.replay()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connector.state()
    }

    /// Register connector observers before the first input.
    pub fn connector_mut(&mut self) -> &mut Connector {
        &mut self.connector
    }

    // =========================================================================
    // OPEN / CLOSE
    // =========================================================================

    fn open(&mut self) {
        if self.open {
            return;
        }
        self.open = true;
        debug!("session: widget opened");

        let credentials = self.credentials();
        let actions = self.connector.connect(credentials);
        self.apply_all(actions);

        if self.onboarding.should_start(self.ticket.is_active()) {
            if let Some(prompt) = self.onboarding.start() {
                info!("session: onboarding started");
                self.start_conversation();
                self.emit(SessionEvent::PromptChanged { prompt });
            }
        } else if !self.history_shown {
            self.history_shown = true;
            self.replay_history();
        }
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        debug!("session: widget closed");
        let actions = self.connector.disconnect();
        self.apply_all(actions);
        self.flush_pending_prompt();
    }

    fn replay_history(&mut self) {
        if self.log.is_empty() {
            return;
        }
        self.start_conversation();
        for entry in self.log.timeline() {
            match entry {
                TimelineEntry::Separator(date) => {
                    self.emit(SessionEvent::DateSeparator { date });
                }
                TimelineEntry::Message(message) => {
                    self.emit(SessionEvent::MessageAppended { message, replayed: true });
                }
            }
        }
    }

    // =========================================================================
    // USER INPUT
    // =========================================================================

    fn submit(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.open {
            debug!("session: ignoring input while closed");
            return;
        }

        if self.onboarding.is_active() {
            self.submit_onboarding(text);
            return;
        }
        if self.ticket_pending.is_some() {
            self.notice(BUSY_NOTICE);
            return;
        }
        if !self.ticket.is_active() {
            if self.onboarding.details().has_email() {
                // Details are on file from an earlier ticket.
                self.start_conversation();
                self.request_ticket(text);
            } else {
                debug!("session: no ticket and no details, dropping input");
            }
            return;
        }

        self.start_conversation();
        self.append_and_send(text);
    }

    fn submit_onboarding(&mut self, text: &str) {
        match self.onboarding.submit(text) {
            Outcome::Advanced { prompt, persist_details } => {
                self.emit(SessionEvent::OnboardingAnswered { text: text.to_owned() });
                if persist_details {
                    let details = self.onboarding.details().clone();
                    self.store.save_user_details(&details);
                }
                self.pace_prompt(prompt);
            }
            Outcome::Rejected { notice, prompt } => {
                self.emit(SessionEvent::OnboardingAnswered { text: text.to_owned() });
                self.notice(&notice);
                self.emit(SessionEvent::PromptChanged { prompt });
            }
            Outcome::TicketCreationRequested { description } => {
                self.request_ticket(&description);
            }
            Outcome::Busy => self.notice(BUSY_NOTICE),
            Outcome::Inactive => {}
        }
    }

    fn request_ticket(&mut self, description: &str) {
        let details = self.onboarding.details();
        let request = TicketRequest {
            user_id: self.visitor_id.to_string(),
            category: self.options.ticket_category.clone(),
            attachments: Vec::new(),
            description: description.to_owned(),
            first_name: details.first_name.clone(),
            last_name: details.last_name.clone(),
            email: details.email.clone(),
            is_guest: true,
        };
        info!(visitor_id = %self.visitor_id, "session: requesting ticket");
        self.ticket_pending = Some(description.to_owned());
        self.show_typing();
        self.effects.push(Effect::CreateTicket(request));
    }

    fn on_ticket_resolved(&mut self, result: Result<TicketInfo, ServiceError>) {
        let Some(description) = self.ticket_pending.take() else {
            warn!("session: ticket result without a pending request");
            return;
        };
        self.hide_typing();

        let result =
            result.and_then(|info| if info.is_active() { Ok(info) } else { Err(ServiceError::MissingTicketId) });
        let info = match result {
            Ok(info) if !self.ticket.is_active() => info,
            Ok(_) => {
                warn!("session: ignoring ticket result, a ticket is already associated");
                return;
            }
            Err(e) => {
                warn!(error = %e, "session: ticket creation failed");
                self.onboarding.ticket_failed();
                self.notice(TICKET_FAILURE_NOTICE);
                return;
            }
        };

        self.onboarding.ticket_created();
        self.ticket = info;
        self.store.save_ticket_info(&self.ticket);
        info!(ticket_id = self.ticket.id.as_deref().unwrap_or("-"), "session: ticket associated");

        self.start_conversation();
        self.join_ticket_room();
        self.append_and_send(&description);
    }

    fn append_and_send(&mut self, text: &str) {
        let now = self.clock.now();
        let Some(message) = self.append(text, Sender::User, now, None) else {
            return;
        };

        let payload = OutgoingMessage {
            message: message.text.clone(),
            sender_id: self.visitor_id.to_string(),
            ticket_id: self.ticket.id.clone(),
            organization_id: self.ticket.organization_id.clone(),
            attachments: Vec::new(),
            created_at: format_timestamp(message.timestamp),
        };
        match self.connector.send(Outbound::SendMessage(payload)) {
            Ok(action) => self.apply(action),
            Err(TransportError::NotConnected) => {
                debug!("session: send while disconnected");
                self.notice(SEND_FAILURE_NOTICE);
            }
            Err(e) => {
                warn!(error = %e, "session: send failed");
                self.notice(SEND_FAILURE_NOTICE);
            }
        }
    }

    // =========================================================================
    // TRANSPORT
    // =========================================================================

    fn on_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Opened { epoch } => {
                let actions = self.connector.on_open(epoch);
                self.apply_all(actions);
                self.join_ticket_room();
            }
            Signal::Closed { epoch, reason } => {
                if let Some(reason) = reason {
                    debug!(epoch, reason, "session: socket closed");
                }
                let actions = self.connector.on_closed(epoch);
                self.apply_all(actions);
            }
            Signal::Inbound { epoch, event } => {
                if self.connector.deliver(epoch, &event) {
                    self.on_inbound(event);
                }
            }
        }
    }

    fn on_inbound(&mut self, event: Inbound) {
        match event {
            Inbound::Message(message) => {
                self.hide_typing();
                if !message.text.trim().is_empty() {
                    self.start_conversation();
                }
                let now = self.clock.now();
                self.append(&message.text, Sender::Agent, now, message.id);
            }
            Inbound::Typing { active: true } => self.show_typing(),
            Inbound::Typing { active: false } => self.hide_typing(),
            Inbound::TicketClosed { ticket_id } => {
                if let (Some(closed), Some(current)) = (&ticket_id, &self.ticket.id) {
                    if closed != current {
                        debug!(closed, current, "session: closure for another ticket");
                        return;
                    }
                }
                self.close_ticket();
            }
            Inbound::Other { event, .. } => debug!(event, "session: unhandled event"),
        }
    }

    fn close_ticket(&mut self) {
        if !self.ticket.is_active() {
            return;
        }
        info!(ticket_id = self.ticket.id.as_deref().unwrap_or("-"), "session: ticket closed");
        self.hide_typing();
        self.ticket.clear();
        self.store.clear_ticket_state();
        self.log.clear();
        self.emit(SessionEvent::TicketClosed);
    }

    fn join_ticket_room(&mut self) {
        let Some(ticket_id) = self.ticket.id.clone() else {
            return;
        };
        if let Some(action) = self.connector.join_ticket_room(&ticket_id) {
            debug!(ticket_id, "session: joining ticket room");
            self.apply(action);
        }
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    fn on_timer(&mut self, token: TimerToken) {
        if !self.timers.fire(token) {
            debug!(timer = ?token.id, "session: ignoring stale timer");
            return;
        }
        match token.id {
            TimerId::Reconnect => {
                let actions = self.connector.on_reconnect_due();
                self.apply_all(actions);
            }
            TimerId::OnboardingPacing => {
                if let Some(prompt) = self.pending_prompt.take() {
                    self.hide_typing();
                    self.emit(SessionEvent::PromptChanged { prompt });
                }
            }
        }
    }

    /// Show `prompt` after the typing delay.
    fn pace_prompt(&mut self, prompt: Prompt) {
        self.flush_pending_prompt();
        if self.options.typing_delay.is_zero() {
            self.emit(SessionEvent::PromptChanged { prompt });
            return;
        }
        self.show_typing();
        self.pending_prompt = Some(prompt);
        let token = self.timers.arm(TimerId::OnboardingPacing);
        self.effects.push(Effect::StartTimer { token, after: self.options.typing_delay });
    }

    /// Show a paced prompt now instead of waiting out its delay.
    fn flush_pending_prompt(&mut self) {
        let Some(prompt) = self.pending_prompt.take() else {
            return;
        };
        if self.timers.cancel(TimerId::OnboardingPacing) {
            self.effects.push(Effect::CancelTimer(TimerId::OnboardingPacing));
        }
        self.hide_typing();
        self.emit(SessionEvent::PromptChanged { prompt });
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn credentials(&self) -> Credentials {
        Credentials { api_key: self.options.api_token.clone(), user_id: self.visitor_id.to_string() }
    }

    fn append(&mut self, text: &str, sender: Sender, at: OffsetDateTime, id: Option<String>) -> Option<Message> {
        let appended = self.log.append(text, sender, at, id)?;
        self.store.save_messages(self.log.replay());
        if let Some(date) = appended.separator {
            self.emit(SessionEvent::DateSeparator { date });
        }
        self.emit(SessionEvent::MessageAppended { message: appended.message.clone(), replayed: false });
        Some(appended.message)
    }

    fn start_conversation(&mut self) {
        if !self.conversation_started {
            self.conversation_started = true;
            self.emit(SessionEvent::ConversationStarted);
        }
    }

    fn show_typing(&mut self) {
        if !self.typing_shown {
            self.typing_shown = true;
            self.emit(SessionEvent::TypingStarted);
        }
    }

    fn hide_typing(&mut self) {
        if self.typing_shown {
            self.typing_shown = false;
            self.emit(SessionEvent::TypingStopped);
        }
    }

    fn notice(&mut self, text: &str) {
        self.emit(SessionEvent::Notice { text: text.to_owned() });
    }

    fn emit(&mut self, event: SessionEvent) {
        self.effects.push(Effect::Emit(event));
    }

    fn apply_all(&mut self, actions: Vec<ConnectorAction>) {
        for action in actions {
            self.apply(action);
        }
    }

    fn apply(&mut self, action: ConnectorAction) {
        let effect = match action {
            ConnectorAction::Dial { epoch, credentials } => Effect::Dial { epoch, credentials },
            ConnectorAction::Write(event) => Effect::Write { epoch: self.connector.epoch(), event },
            ConnectorAction::Hangup { epoch } => Effect::Hangup { epoch },
            ConnectorAction::ArmReconnect(after) => {
                let token = self.timers.arm(TimerId::Reconnect);
                Effect::StartTimer { token, after }
            }
            ConnectorAction::CancelReconnect => {
                self.timers.cancel(TimerId::Reconnect);
                Effect::CancelTimer(TimerId::Reconnect)
            }
        };
        self.effects.push(effect);
    }

    fn report_connection_state(&mut self) {
        let state = self.connector.state();
        if state != self.reported_state {
            self.reported_state = state;
            self.emit(SessionEvent::ConnectionChanged { state });
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
