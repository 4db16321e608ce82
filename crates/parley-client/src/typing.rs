//! Typing indicator debounce.

use std::time::Duration;
use tokio::time::Instant;

/// Quiet period after which an announced "typing" is withdrawn.
pub const TYPING_QUIET: Duration = Duration::from_secs(1);

/// Turns raw input activity into typing indicator changes.
///
/// Each method returns the indicator to forward, if any. The owner is
/// expected to wait on [`TypingDebouncer::deadline`] and call
/// [`TypingDebouncer::poll_expired`] when it passes.
#[derive(Debug)]
pub struct TypingDebouncer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(TYPING_QUIET)
    }
}

impl TypingDebouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the current announcement lapses.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn input(&mut self) -> Option<bool> {
        let announce = self.deadline.is_none();
        self.deadline = Some(Instant::now() + self.quiet);
        announce.then_some(true)
    }

    pub fn poll_expired(&mut self) -> Option<bool> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                Some(false)
            }
            _ => None,
        }
    }

    pub fn message_sent(&mut self) -> Option<bool> {
        self.deadline.take().map(|_| false)
    }
}
