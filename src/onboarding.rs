//! Question sequence that runs before a ticket exists.
//!
//! DESIGN
//! ======
//! `Idle -> AskFirstName -> AskLastName -> AskEmail -> AskIssue -> Idle`.
//! Steps only move forward, one per accepted answer. The machine owns the
//! collected [`UserDetails`]; the controller reads them for persistence and
//! ticket creation but never writes them.
//!
//! The issue answer does not advance by itself. It is handed back as
//! [`Outcome::TicketCreationRequested`] and the machine waits at `AskIssue`
//! until the controller reports the ticket result.

use crate::model::UserDetails;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OnboardingStep {
    #[default]
    Idle,
    AskFirstName,
    AskLastName,
    AskEmail,
    AskIssue,
}

/// Agent-side copy for a step plus the input placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub placeholder: String,
}

impl Prompt {
    fn new(text: impl Into<String>, placeholder: &str) -> Self {
        Self { text: text.into(), placeholder: placeholder.to_owned() }
    }
}

pub const OPENING_PROMPT: &str = "Hi there! 👋 To get started, could you please tell me your First Name?";

impl OnboardingStep {
    /// Prompt asking for this step's answer.
    #[must_use]
    pub fn prompt(self, details: &UserDetails) -> Option<Prompt> {
        match self {
            Self::Idle => None,
            Self::AskFirstName => Some(Prompt::new(OPENING_PROMPT, "Enter your First Name...")),
            Self::AskLastName => Some(Prompt::new(
                format!("Thanks {}! What is your Last Name?", details.first_name),
                "Enter your Last Name...",
            )),
            Self::AskEmail => Some(Prompt::new(
                "Great! And finally, what is your Email?",
                "Enter your Email...",
            )),
            Self::AskIssue => Some(Prompt::new(
                "Perfect. Now, how can we help you today?",
                "Describe what you need help with...",
            )),
        }
    }

    fn next(self) -> Self {
        match self {
            Self::Idle => Self::AskFirstName,
            Self::AskFirstName => Self::AskLastName,
            Self::AskLastName => Self::AskEmail,
            Self::AskEmail => Self::AskIssue,
            Self::AskIssue => Self::Idle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Answer stored; show `prompt` next.
    Advanced { prompt: Prompt, persist_details: bool },
    /// Validator refused the answer; the step is unchanged.
    Rejected { notice: String, prompt: Prompt },
    TicketCreationRequested { description: String },
    /// A ticket request is already in flight.
    Busy,
    /// Onboarding is not running.
    Inactive,
}

/// Per-step answer check. Returning `Err` carries the notice to show.
pub trait InputValidator: Send {
    /// # Errors
    ///
    /// Returns the user-facing reason when the answer is not acceptable.
    fn validate(&self, step: OnboardingStep, answer: &str) -> Result<(), String>;
}

/// Accepts every answer.
#[derive(Clone, Copy, Debug, Default)]
pub struct Permissive;

impl InputValidator for Permissive {
    fn validate(&self, _step: OnboardingStep, _answer: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Requires something address-shaped at the email step.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmailShape;

pub const INVALID_EMAIL_NOTICE: &str = "Please enter a valid email address.";

impl InputValidator for EmailShape {
    fn validate(&self, step: OnboardingStep, answer: &str) -> Result<(), String> {
        if step != OnboardingStep::AskEmail || looks_like_email(answer) {
            Ok(())
        } else {
            Err(INVALID_EMAIL_NOTICE.to_owned())
        }
    }
}

fn looks_like_email(answer: &str) -> bool {
    if answer.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = answer.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

pub struct Onboarding {
    step: OnboardingStep,
    started: bool,
    awaiting_ticket: bool,
    details: UserDetails,
    validator: Box<dyn InputValidator>,
}

impl Onboarding {
    pub fn new(details: UserDetails, validator: Box<dyn InputValidator>) -> Self {
        Self { step: OnboardingStep::Idle, started: false, awaiting_ticket: false, details, validator }
    }

    #[must_use]
    pub fn step(&self) -> OnboardingStep {
        self.step
    }

    #[must_use]
    pub fn details(&self) -> &UserDetails {
        &self.details
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.step != OnboardingStep::Idle
    }

    #[must_use]
    pub fn is_awaiting_ticket(&self) -> bool {
        self.awaiting_ticket
    }

    /// Entry condition: not yet run, no email on file, no ticket.
    #[must_use]
    pub fn should_start(&self, has_ticket: bool) -> bool {
        !self.started && !self.is_active() && !self.details.has_email() && !has_ticket
    }

    /// Begin at `AskFirstName`. Returns the opening prompt, or `None` when
    /// already running.
    pub fn start(&mut self) -> Option<Prompt> {
        if self.is_active() {
            return None;
        }
        self.started = true;
        self.step = OnboardingStep::AskFirstName;
        self.step.prompt(&self.details)
    }

    /// Prompt for the current step, if any.
    #[must_use]
    pub fn current_prompt(&self) -> Option<Prompt> {
        self.step.prompt(&self.details)
    }

    pub fn submit(&mut self, answer: &str) -> Outcome {
        let answer = answer.trim();
        if !self.is_active() {
            return Outcome::Inactive;
        }
        if self.awaiting_ticket {
            return Outcome::Busy;
        }
        if let Err(notice) = self.validator.validate(self.step, answer) {
            let Some(prompt) = self.current_prompt() else {
                return Outcome::Inactive;
            };
            return Outcome::Rejected { notice, prompt };
        }

        let persist_details = match self.step {
            OnboardingStep::Idle => return Outcome::Inactive,
            OnboardingStep::AskFirstName => {
                self.details.first_name = answer.to_owned();
                false
            }
            OnboardingStep::AskLastName => {
                self.details.last_name = answer.to_owned();
                false
            }
            OnboardingStep::AskEmail => {
                self.details.email = answer.to_owned();
                true
            }
            OnboardingStep::AskIssue => {
                self.awaiting_ticket = true;
                return Outcome::TicketCreationRequested { description: answer.to_owned() };
            }
        };

        self.step = self.step.next();
        match self.current_prompt() {
            Some(prompt) => Outcome::Advanced { prompt, persist_details },
            None => Outcome::Inactive,
        }
    }

    /// The ticket exists; onboarding is complete.
    pub fn ticket_created(&mut self) {
        self.awaiting_ticket = false;
        if self.step == OnboardingStep::AskIssue {
            self.step = self.step.next();
        }
    }

    /// Stay at `AskIssue`; the next answer is a fresh description.
    pub fn ticket_failed(&mut self) {
        self.awaiting_ticket = false;
    }
}

#[cfg(test)]
#[path = "onboarding_test.rs"]
mod tests;
