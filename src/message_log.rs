//! Ordered conversation history.
//!
//! DESIGN
//! ======
//! The log is append-only between clears and its order is the display order.
//! Timestamps never go backwards: an explicit timestamp earlier than the last
//! entry is raised to the last entry's timestamp. Messages carrying a backend
//! id are accepted once; redelivery after a reconnect is dropped.
//!
//! Date separators are derived, never stored. One precedes the first message
//! and one precedes every message whose calendar day (in the configured
//! offset) differs from its predecessor's.
//!
//! The log holds no storage handle; the session writes the full sequence to
//! the durable store after every mutation.

use std::collections::HashSet;

use time::{Date, OffsetDateTime, UtcOffset};
use tracing::debug;

use crate::model::{Message, Sender};

/// Result of an accepted append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Appended {
    pub message: Message,
    /// Set when a date separator should be shown before the message.
    pub separator: Option<Date>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimelineEntry {
    Separator(Date),
    Message(Message),
}

#[derive(Debug)]
pub struct MessageLog {
    messages: Vec<Message>,
    seen_ids: HashSet<String>,
    offset: UtcOffset,
}

impl MessageLog {
    #[must_use]
    pub fn new(offset: UtcOffset) -> Self {
        Self::restore(Vec::new(), offset)
    }

    /// Rebuild from stored history, order preserved.
    #[must_use]
    pub fn restore(messages: Vec<Message>, offset: UtcOffset) -> Self {
        let seen_ids = messages.iter().filter_map(|m| m.id.clone()).collect();
        Self { messages, seen_ids, offset }
    }

    /// Append a message. Returns `None` for blank text or an already-seen id.
    pub fn append(
        &mut self,
        text: &str,
        sender: Sender,
        timestamp: OffsetDateTime,
        id: Option<String>,
    ) -> Option<Appended> {
        if text.trim().is_empty() {
            return None;
        }
        if let Some(id) = &id {
            if self.seen_ids.contains(id) {
                debug!(message_id = %id, "log: dropping duplicate message");
                return None;
            }
        }

        let previous = self.messages.last().map(|m| m.timestamp);
        let timestamp = match previous {
            Some(last) if timestamp < last => last,
            _ => timestamp,
        };
        let separator = match previous {
            Some(last) if self.day(last) == self.day(timestamp) => None,
            _ => Some(self.day(timestamp)),
        };

        if let Some(id) = &id {
            self.seen_ids.insert(id.clone());
        }
        let message = Message { text: text.to_owned(), sender, timestamp, id };
        self.messages.push(message.clone());
        Some(Appended { message, separator })
    }

    /// Current history in display order. Pure read.
    #[must_use]
    pub fn replay(&self) -> &[Message] {
        &self.messages
    }

    /// History interleaved with date separators.
    #[must_use]
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        let mut entries = Vec::with_capacity(self.messages.len() + 1);
        let mut current_day = None;
        for message in &self.messages {
            let day = self.day(message.timestamp);
            if current_day != Some(day) {
                entries.push(TimelineEntry::Separator(day));
                current_day = Some(day);
            }
            entries.push(TimelineEntry::Message(message.clone()));
        }
        entries
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.seen_ids.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn day(&self, ts: OffsetDateTime) -> Date {
        ts.to_offset(self.offset).date()
    }
}

#[cfg(test)]
#[path = "message_log_test.rs"]
mod tests;
