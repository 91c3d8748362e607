//! Plain-text rendering of session events for a terminal.

use chat_widget::model::Message;
use chat_widget::{SessionEvent, Sender, WidgetConfig};
use time::macros::format_description;
use time::{Date, UtcOffset};

/// Banner printed when the chat starts.
pub fn header(config: &WidgetConfig) -> String {
    format!("== {} ==\n{}\n{}", config.display_name(), config.supporting_message(), config.opening_message())
}

/// One line (or none) per event.
pub fn render_event(event: &SessionEvent, offset: UtcOffset) -> Option<String> {
    match event {
        SessionEvent::ConversationStarted | SessionEvent::TypingStopped => None,
        SessionEvent::MessageAppended { message, .. } => Some(message_line(message, offset)),
        SessionEvent::DateSeparator { date } => Some(format!("---- {} ----", date_label(*date))),
        SessionEvent::TypingStarted => Some("  (agent is typing...)".into()),
        SessionEvent::PromptChanged { prompt } => Some(format!("bot: {}  [{}]", prompt.text, prompt.placeholder)),
        SessionEvent::OnboardingAnswered { text } => Some(format!("you: {text}")),
        SessionEvent::Notice { text } => Some(format!("!! {text}")),
        SessionEvent::ConnectionChanged { state } => Some(format!("** connection {}", state.as_str())),
        SessionEvent::TicketClosed => Some("** conversation closed by support; type to start a new one".into()),
    }
}

fn message_line(message: &Message, offset: UtcOffset) -> String {
    let who = match message.sender {
        Sender::User => "you",
        Sender::Agent => "agent",
    };
    let local = message.timestamp.to_offset(offset);
    let clock = local
        .format(format_description!("[hour]:[minute]"))
        .unwrap_or_else(|_| format!("{:02}:{:02}", local.hour(), local.minute()));
    format!("[{clock}] {who}: {}", message.text)
}

fn date_label(date: Date) -> String {
    date.format(format_description!("[weekday repr:short], [month repr:short] [day padding:none], [year]"))
        .unwrap_or_else(|_| date.to_string())
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;
