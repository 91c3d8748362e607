//! Conversation session engine for an embeddable customer-support chat widget.
//!
//! SYSTEM CONTEXT
//! ==============
//! A host embeds one [`runtime::Widget`]. The widget authenticates an
//! anonymous visitor, walks them through onboarding, opens a support ticket,
//! and exchanges realtime messages with the backend over a persistent socket.
//! Rendering is left to the host, which observes [`session::SessionEvent`]s.
//!
//! LAYERS
//! ======
//! - [`identity`], [`store`]: durable visitor id and session records.
//! - [`transport`]: connection state machine plus the WebSocket dialer.
//! - [`onboarding`], [`message_log`]: conversation state.
//! - [`session`]: pure controller, `Input -> Vec<Effect>`.
//! - [`runtime`]: single-task driver that executes effects.
//! - [`services`], [`settings`]: backend HTTP contracts and configuration.

pub mod clock;
pub mod identity;
pub mod message_log;
pub mod model;
pub mod onboarding;
pub mod runtime;
pub mod services;
pub mod session;
pub mod settings;
pub mod store;
pub mod timers;
pub mod transport;

pub use model::{Message, Sender, TicketInfo, UserDetails, VisitorId, WidgetConfig};
pub use runtime::{Backends, Widget, WidgetError};
pub use session::{Session, SessionEvent, SessionOptions};
pub use settings::Settings;
pub use transport::ConnectionState;
