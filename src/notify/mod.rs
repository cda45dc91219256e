//! Operator notifications.
//!
//! Fire-and-forget: `notify` returns immediately and can never fail the
//! caller. Delivery problems are logged and dropped.
//! - `telegram` — Telegram Bot API channel

pub mod telegram;

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str);
}

/// Discards every message. Used when no channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _text: &str) {}
}
