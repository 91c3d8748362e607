use super::*;
use crate::clock::ManualClock;
use crate::onboarding::{EmailShape, OPENING_PROMPT, Permissive};
use crate::store::{MESSAGES_KEY, MemoryStore, SharedStore, TICKET_INFO_KEY, USER_DETAILS_KEY, USER_ID_KEY};
use crate::transport::Signal;
use std::collections::HashMap;
use time::macros::{date, datetime};
use wire::AgentMessage;

const VISITOR: &str = "visitor-1";

fn options() -> SessionOptions {
    SessionOptions {
        api_token: "key".into(),
        auth_mode: AuthMode::ConnectTime,
        reconnect_backoff: Duration::from_secs(3),
        typing_delay: Duration::from_millis(600),
        ticket_category: "support".into(),
        utc_offset: UtcOffset::UTC,
    }
}

struct Harness {
    session: Session,
    kv: SharedStore,
    clock: Arc<ManualClock>,
    timers: HashMap<TimerId, TimerToken>,
    epoch: u64,
}

impl Harness {
    fn new() -> Self {
        let kv: SharedStore = Arc::new(MemoryStore::new());
        kv.set(USER_ID_KEY, VISITOR).expect("seed visitor");
        Self::with_store(kv, options(), Box::new(Permissive))
    }

    /// Details and ticket already on file, as after an earlier visit.
    fn returning() -> Self {
        let harness = Self::new();
        harness
            .kv
            .set(USER_DETAILS_KEY, r#"{"firstName":"Ana","lastName":"Lee","email":"ana@x.com"}"#)
            .expect("seed details");
        harness.kv.set(TICKET_INFO_KEY, r#"{"id":"T1","organizationId":"O1"}"#).expect("seed ticket");
        Self::with_store(harness.kv, options(), Box::new(Permissive))
    }

    fn with_store(kv: SharedStore, options: SessionOptions, validator: Box<dyn InputValidator>) -> Self {
        let clock = Arc::new(ManualClock::new(datetime!(2026-10-14 09:30 UTC)));
        let mut identity = IdentityStore::new(kv.clone());
        let session = Session::new(options, &mut identity, DurableSessionStore::new(kv.clone()), validator, clock.clone());
        Self { session, kv, clock, timers: HashMap::new(), epoch: 0 }
    }

    fn reload(self) -> Self {
        Self::with_store(self.kv, options(), Box::new(Permissive))
    }

    fn drive(&mut self, input: Input) -> Vec<Effect> {
        let effects = self.session.handle(input);
        for effect in &effects {
            match effect {
                Effect::StartTimer { token, .. } => {
                    self.timers.insert(token.id, *token);
                }
                Effect::CancelTimer(id) => {
                    self.timers.remove(id);
                }
                Effect::Dial { epoch, .. } => self.epoch = *epoch,
                _ => {}
            }
        }
        effects
    }

    fn submit(&mut self, text: &str) -> Vec<Effect> {
        self.drive(Input::Submit(text.to_owned()))
    }

    fn fire(&mut self, id: TimerId) -> Vec<Effect> {
        let token = self.timers.remove(&id).expect("timer armed");
        self.drive(Input::TimerFired(token))
    }

    fn opened(&mut self) -> Vec<Effect> {
        self.drive(Input::Transport(Signal::Opened { epoch: self.epoch }))
    }

    fn closed(&mut self) -> Vec<Effect> {
        self.drive(Input::Transport(Signal::Closed { epoch: self.epoch, reason: None }))
    }

    fn inbound(&mut self, event: Inbound) -> Vec<Effect> {
        self.drive(Input::Transport(Signal::Inbound { epoch: self.epoch, event }))
    }

    fn open_connected(&mut self) -> Vec<Effect> {
        let mut effects = self.drive(Input::Open);
        effects.extend(self.opened());
        effects
    }

    /// Answer the three detail questions, waiting out each typing delay.
    fn answer_details(&mut self) {
        for answer in ["Ana", "Lee", "ana@x.com"] {
            self.submit(answer);
            self.fire(TimerId::OnboardingPacing);
        }
    }

    fn stored(&self, key: &str) -> Option<serde_json::Value> {
        self.kv.get(key).expect("get").map(|raw| serde_json::from_str(&raw).expect("stored json"))
    }
}

fn events(effects: &[Effect]) -> Vec<SessionEvent> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Emit(event) => Some(event.clone()),
            _ => None,
        })
        .collect()
}

fn writes(effects: &[Effect]) -> Vec<Outbound> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Write { event, .. } => Some(event.clone()),
            _ => None,
        })
        .collect()
}

fn prompt_texts(effects: &[Effect]) -> Vec<String> {
    events(effects)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::PromptChanged { prompt } => Some(prompt.text),
            _ => None,
        })
        .collect()
}

fn notices(effects: &[Effect]) -> Vec<String> {
    events(effects)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Notice { text } => Some(text),
            _ => None,
        })
        .collect()
}

fn ticket_request(effects: &[Effect]) -> Option<TicketRequest> {
    effects.iter().find_map(|effect| match effect {
        Effect::CreateTicket(request) => Some(request.clone()),
        _ => None,
    })
}

fn agent(id: Option<&str>, text: &str) -> Inbound {
    Inbound::Message(AgentMessage { id: id.map(str::to_owned), text: text.into() })
}

// =============================================================================
// ONBOARDING THROUGH FIRST MESSAGE
// =============================================================================

#[test]
fn first_visit_walks_onboarding_into_a_ticket() {
    let mut h = Harness::new();

    let effects = h.open_connected();
    assert!(effects.iter().any(|e| matches!(e, Effect::Dial { epoch: 1, .. })));
    let shown = events(&effects);
    assert_eq!(shown[0], SessionEvent::ConversationStarted);
    assert_eq!(prompt_texts(&effects), [OPENING_PROMPT]);
    assert!(shown.contains(&SessionEvent::ConnectionChanged { state: ConnectionState::Connected }));

    let effects = h.submit("Ana");
    assert_eq!(
        events(&effects),
        [SessionEvent::OnboardingAnswered { text: "Ana".into() }, SessionEvent::TypingStarted]
    );
    assert!(effects.contains(&Effect::StartTimer {
        token: h.timers[&TimerId::OnboardingPacing],
        after: Duration::from_millis(600),
    }));
    let effects = h.fire(TimerId::OnboardingPacing);
    assert_eq!(events(&effects)[0], SessionEvent::TypingStopped);
    assert_eq!(prompt_texts(&effects), ["Thanks Ana! What is your Last Name?"]);

    h.submit("Lee");
    assert_eq!(prompt_texts(&h.fire(TimerId::OnboardingPacing)), ["Great! And finally, what is your Email?"]);
    assert_eq!(h.stored(USER_DETAILS_KEY), None);

    h.submit("ana@x.com");
    assert_eq!(
        h.stored(USER_DETAILS_KEY),
        Some(serde_json::json!({ "firstName": "Ana", "lastName": "Lee", "email": "ana@x.com" }))
    );
    assert_eq!(prompt_texts(&h.fire(TimerId::OnboardingPacing)), ["Perfect. Now, how can we help you today?"]);

    let effects = h.submit("Billing issue");
    let request = ticket_request(&effects).expect("ticket requested");
    assert_eq!(
        request,
        TicketRequest {
            user_id: VISITOR.into(),
            category: "support".into(),
            attachments: Vec::new(),
            description: "Billing issue".into(),
            first_name: "Ana".into(),
            last_name: "Lee".into(),
            email: "ana@x.com".into(),
            is_guest: true,
        }
    );

    let effects = h.drive(Input::TicketResolved(Ok(TicketInfo::new("T1", Some("O1".into())))));
    let sent = writes(&effects);
    assert_eq!(sent[0], Outbound::JoinRoom { ticket_id: "T1".into() });
    match &sent[1] {
        Outbound::SendMessage(message) => {
            assert_eq!(message.message, "Billing issue");
            assert_eq!(message.sender_id, VISITOR);
            assert_eq!(message.ticket_id.as_deref(), Some("T1"));
            assert_eq!(message.organization_id.as_deref(), Some("O1"));
            assert_eq!(message.created_at, "2026-10-14T09:30:00Z");
        }
        other => panic!("expected send_message, got {other:?}"),
    }

    assert_eq!(h.session.onboarding_step(), OnboardingStep::Idle);
    assert_eq!(h.stored(TICKET_INFO_KEY), Some(serde_json::json!({ "id": "T1", "organizationId": "O1" })));
    let texts: Vec<_> = h.session.messages().iter().map(|m| (m.text.as_str(), m.sender)).collect();
    assert_eq!(texts, [("Billing issue", Sender::User)]);
}

#[test]
fn reload_replays_history_without_onboarding() {
    let mut h = Harness::new();
    h.open_connected();
    h.answer_details();
    h.submit("Billing issue");
    h.drive(Input::TicketResolved(Ok(TicketInfo::new("T1", Some("O1".into())))));

    let mut h = h.reload();
    assert_eq!(h.session.ticket().id.as_deref(), Some("T1"));
    let effects = h.drive(Input::Open);
    assert!(prompt_texts(&effects).is_empty());

    let shown: Vec<_> = events(&effects)
        .into_iter()
        .filter(|e| !matches!(e, SessionEvent::ConnectionChanged { .. }))
        .collect();
    assert_eq!(shown.len(), 3);
    assert_eq!(shown[0], SessionEvent::ConversationStarted);
    assert_eq!(shown[1], SessionEvent::DateSeparator { date: date!(2026 - 10 - 14) });
    match &shown[2] {
        SessionEvent::MessageAppended { message, replayed } => {
            assert!(replayed);
            assert_eq!(message.text, "Billing issue");
        }
        other => panic!("expected replayed message, got {other:?}"),
    }

    // Rejoin on connect.
    assert_eq!(writes(&h.opened()), [Outbound::JoinRoom { ticket_id: "T1".into() }]);
}

#[test]
fn empty_input_is_ignored_everywhere() {
    let mut h = Harness::new();
    h.open_connected();
    assert!(h.submit("   ").is_empty());
    assert_eq!(h.session.onboarding_step(), OnboardingStep::AskFirstName);
}

#[test]
fn submissions_during_ticket_request_are_refused() {
    let mut h = Harness::new();
    h.open_connected();
    h.answer_details();
    assert!(ticket_request(&h.submit("Billing issue")).is_some());

    let effects = h.submit("hello?");
    assert!(ticket_request(&effects).is_none());
    assert_eq!(notices(&effects), [BUSY_NOTICE]);
    assert!(h.session.messages().is_empty());
}

#[test]
fn ticket_failure_keeps_issue_step_and_allows_retry() {
    let mut h = Harness::new();
    h.open_connected();
    h.answer_details();
    h.submit("Billing issue");

    let effects = h.drive(Input::TicketResolved(Err(ServiceError::MissingTicketId)));
    assert_eq!(notices(&effects), [TICKET_FAILURE_NOTICE]);
    assert!(events(&effects).contains(&SessionEvent::TypingStopped));
    assert_eq!(h.session.onboarding_step(), OnboardingStep::AskIssue);
    assert!(!h.session.ticket().is_active());
    assert_eq!(h.stored(TICKET_INFO_KEY), None);

    let request = ticket_request(&h.submit("Billing issue, take two")).expect("retry");
    assert_eq!(request.description, "Billing issue, take two");
}

#[test]
fn ticket_result_without_an_id_counts_as_a_failure() {
    let mut h = Harness::new();
    h.open_connected();
    h.answer_details();
    h.submit("Billing issue");

    let effects = h.drive(Input::TicketResolved(Ok(TicketInfo::default())));
    assert_eq!(notices(&effects), [TICKET_FAILURE_NOTICE]);
    assert_eq!(h.session.onboarding_step(), OnboardingStep::AskIssue);
    assert!(!h.session.ticket().is_active());
    assert_eq!(h.stored(TICKET_INFO_KEY), None);

    let effects = h.submit("Billing issue again");
    assert!(notices(&effects).is_empty());
    assert_eq!(ticket_request(&effects).expect("retry").description, "Billing issue again");
}

#[test]
fn late_ticket_result_after_close_is_still_applied() {
    let mut h = Harness::new();
    h.open_connected();
    h.answer_details();
    h.submit("Billing issue");
    h.drive(Input::Close);

    let effects = h.drive(Input::TicketResolved(Ok(TicketInfo::new("T1", None))));
    assert!(writes(&effects).is_empty());
    assert_eq!(notices(&effects), [SEND_FAILURE_NOTICE]);
    assert_eq!(h.session.ticket().id.as_deref(), Some("T1"));
    assert_eq!(h.session.messages().len(), 1);
}

#[test]
fn rejected_email_repeats_the_prompt() {
    let kv: SharedStore = Arc::new(MemoryStore::new());
    let mut h = Harness::with_store(kv, options(), Box::new(EmailShape));
    h.open_connected();
    for answer in ["Ana", "Lee"] {
        h.submit(answer);
        h.fire(TimerId::OnboardingPacing);
    }

    let effects = h.submit("ana at x");
    assert_eq!(notices(&effects), [crate::onboarding::INVALID_EMAIL_NOTICE]);
    assert_eq!(prompt_texts(&effects), ["Great! And finally, what is your Email?"]);
    assert_eq!(h.session.onboarding_step(), OnboardingStep::AskEmail);
    assert_eq!(h.stored(USER_DETAILS_KEY), None);
}

#[test]
fn close_shows_a_paced_prompt_immediately() {
    let mut h = Harness::new();
    h.open_connected();
    h.submit("Ana");
    let token = h.timers[&TimerId::OnboardingPacing];

    let effects = h.drive(Input::Close);
    assert!(effects.contains(&Effect::CancelTimer(TimerId::OnboardingPacing)));
    assert_eq!(prompt_texts(&effects), ["Thanks Ana! What is your Last Name?"]);
    assert!(h.drive(Input::TimerFired(token)).is_empty());

    // Reopening resumes where the visitor left off.
    h.drive(Input::Open);
    assert_eq!(h.session.onboarding_step(), OnboardingStep::AskLastName);
}

#[test]
fn zero_typing_delay_shows_prompts_inline() {
    let kv: SharedStore = Arc::new(MemoryStore::new());
    let options = SessionOptions { typing_delay: Duration::ZERO, ..options() };
    let mut h = Harness::with_store(kv, options, Box::new(Permissive));
    h.open_connected();
    let effects = h.submit("Ana");
    assert_eq!(prompt_texts(&effects), ["Thanks Ana! What is your Last Name?"]);
    assert!(!effects.iter().any(|e| matches!(e, Effect::StartTimer { .. })));
}

// =============================================================================
// MESSAGING
// =============================================================================

#[test]
fn returning_visitor_sends_directly() {
    let mut h = Harness::returning();
    h.open_connected();
    let effects = h.submit("  Any update?  ");
    match writes(&effects).as_slice() {
        [Outbound::SendMessage(message)] => assert_eq!(message.message, "Any update?"),
        other => panic!("expected one send_message, got {other:?}"),
    }
    assert_eq!(h.stored(MESSAGES_KEY).and_then(|v| v.as_array().map(Vec::len)), Some(1));
}

#[test]
fn send_while_disconnected_shows_notice_and_keeps_message() {
    let mut h = Harness::returning();
    h.drive(Input::Open);
    let effects = h.submit("hello");
    assert!(writes(&effects).is_empty());
    assert_eq!(notices(&effects), [SEND_FAILURE_NOTICE]);
    assert_eq!(h.session.messages().len(), 1);
}

#[test]
fn agent_typing_then_message() {
    let mut h = Harness::returning();
    h.open_connected();

    assert_eq!(events(&h.inbound(Inbound::Typing { active: true })), [SessionEvent::TypingStarted]);
    assert!(h.inbound(Inbound::Typing { active: true }).is_empty());

    h.clock.set(datetime!(2026-10-14 09:31 UTC));
    let shown = events(&h.inbound(agent(Some("m1"), "How can I help?")));
    assert_eq!(shown[0], SessionEvent::TypingStopped);
    assert_eq!(shown[1], SessionEvent::ConversationStarted);
    assert!(matches!(shown[2], SessionEvent::DateSeparator { .. }));
    match &shown[3] {
        SessionEvent::MessageAppended { message, replayed: false } => {
            assert_eq!(message.sender, Sender::Agent);
            assert_eq!(message.id.as_deref(), Some("m1"));
        }
        other => panic!("expected agent message, got {other:?}"),
    }

    // Redelivery is dropped.
    assert!(events(&h.inbound(agent(Some("m1"), "How can I help?"))).is_empty());
    assert!(events(&h.inbound(Inbound::Typing { active: false })).is_empty());
    assert_eq!(h.session.messages().len(), 1);
}

#[test]
fn messages_on_a_new_day_get_a_separator() {
    let mut h = Harness::returning();
    h.open_connected();
    h.submit("first");
    h.clock.set(datetime!(2026-10-15 08:00 UTC));
    let shown = events(&h.inbound(agent(None, "next morning")));
    assert_eq!(shown[0], SessionEvent::DateSeparator { date: date!(2026 - 10 - 15) });
}

#[test]
fn ticket_closure_resets_ticket_and_history_but_keeps_details() {
    let mut h = Harness::returning();
    h.open_connected();
    h.submit("hello");
    h.inbound(Inbound::Typing { active: true });

    let effects = h.inbound(Inbound::TicketClosed { ticket_id: Some("T1".into()) });
    assert_eq!(events(&effects), [SessionEvent::TypingStopped, SessionEvent::TicketClosed]);
    assert!(!h.session.ticket().is_active());
    assert!(h.session.messages().is_empty());
    assert_eq!(h.stored(TICKET_INFO_KEY), None);
    assert_eq!(h.stored(MESSAGES_KEY), None);
    assert_eq!(h.session.user_details().email, "ana@x.com");

    // The next text opens a new ticket with the same details.
    let request = ticket_request(&h.submit("Another question")).expect("new ticket");
    assert_eq!(request.description, "Another question");
    assert_eq!(request.first_name, "Ana");
    assert!(prompt_texts(&h.submit("x")).is_empty());
}

#[test]
fn closure_for_another_ticket_is_ignored() {
    let mut h = Harness::returning();
    h.open_connected();
    assert!(h.inbound(Inbound::TicketClosed { ticket_id: Some("T9".into()) }).is_empty());
    assert!(h.session.ticket().is_active());
}

// =============================================================================
// CONNECTION LIFECYCLE
// =============================================================================

#[test]
fn connection_loss_reconnects_and_rejoins() {
    let mut h = Harness::returning();
    h.open_connected();

    let effects = h.closed();
    assert!(events(&effects).contains(&SessionEvent::ConnectionChanged { state: ConnectionState::Reconnecting }));
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::StartTimer { token, after } if token.id == TimerId::Reconnect && *after == Duration::from_secs(3)
    )));

    let effects = h.fire(TimerId::Reconnect);
    assert!(effects.iter().any(|e| matches!(e, Effect::Dial { epoch: 2, .. })));
    assert_eq!(writes(&h.opened()), [Outbound::JoinRoom { ticket_id: "T1".into() }]);
}

#[test]
fn closing_the_widget_suppresses_reconnection() {
    let mut h = Harness::returning();
    h.open_connected();
    h.closed();
    let token = h.timers[&TimerId::Reconnect];

    let effects = h.drive(Input::Close);
    assert!(effects.contains(&Effect::CancelTimer(TimerId::Reconnect)));
    assert!(events(&effects).contains(&SessionEvent::ConnectionChanged { state: ConnectionState::Disconnected }));

    let effects = h.drive(Input::TimerFired(token));
    assert!(!effects.iter().any(|e| matches!(e, Effect::Dial { .. })));
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);
}

#[test]
fn close_hangs_up_and_stale_socket_is_ignored() {
    let mut h = Harness::returning();
    h.open_connected();
    let first = h.epoch;
    assert!(h.drive(Input::Close).contains(&Effect::Hangup { epoch: first }));

    h.drive(Input::Open);
    assert_eq!(h.epoch, first + 1);

    let stale = h.drive(Input::Transport(Signal::Opened { epoch: first }));
    assert!(stale.is_empty());
    let stale = h.drive(Input::Transport(Signal::Inbound { epoch: first, event: agent(None, "ghost") }));
    assert!(stale.is_empty());
    assert_eq!(h.session.connection_state(), ConnectionState::Connecting);
}

#[test]
fn first_message_auth_writes_authenticate_first() {
    let kv: SharedStore = Arc::new(MemoryStore::new());
    kv.set(USER_ID_KEY, VISITOR).expect("seed visitor");
    let options = SessionOptions { auth_mode: AuthMode::FirstMessage, ..options() };
    let mut h = Harness::with_store(kv, options, Box::new(Permissive));
    let effects = h.open_connected();
    assert_eq!(
        writes(&effects),
        [Outbound::Authenticate(Credentials { api_key: "key".into(), user_id: VISITOR.into() })]
    );
}

#[test]
fn reopen_does_not_replay_history_twice() {
    let mut h = Harness::returning();
    h.open_connected();
    h.submit("hello");
    h.drive(Input::Close);
    let effects = h.drive(Input::Open);
    assert!(!events(&effects).iter().any(|e| matches!(e, SessionEvent::MessageAppended { .. })));
}
