use super::*;
use chat_widget::ConnectionState;
use time::macros::{date, datetime, offset};

#[test]
fn messages_show_local_time_and_author() {
    let message = Message {
        text: "Hi Ana".into(),
        sender: Sender::Agent,
        timestamp: datetime!(2026-10-14 23:45 UTC),
        id: None,
    };
    let event = SessionEvent::MessageAppended { message, replayed: true };
    assert_eq!(render_event(&event, UtcOffset::UTC).as_deref(), Some("[23:45] agent: Hi Ana"));
    assert_eq!(render_event(&event, offset!(+2)).as_deref(), Some("[01:45] agent: Hi Ana"));
}

#[test]
fn separators_name_the_day() {
    let event = SessionEvent::DateSeparator { date: date!(2026-10-14) };
    assert_eq!(render_event(&event, UtcOffset::UTC).as_deref(), Some("---- Wed, Oct 14, 2026 ----"));
}

#[test]
fn bookkeeping_events_are_silent() {
    assert_eq!(render_event(&SessionEvent::ConversationStarted, UtcOffset::UTC), None);
    assert_eq!(render_event(&SessionEvent::TypingStopped, UtcOffset::UTC), None);
    assert_eq!(
        render_event(&SessionEvent::ConnectionChanged { state: ConnectionState::Reconnecting }, UtcOffset::UTC)
            .as_deref(),
        Some("** connection reconnecting")
    );
}

#[test]
fn header_falls_back_to_defaults() {
    let banner = header(&WidgetConfig { name: Some("Acme".into()), ..WidgetConfig::default() });
    assert!(banner.starts_with("== Acme =="));
    assert!(banner.contains("Our support team is online and ready to chat"));
}
