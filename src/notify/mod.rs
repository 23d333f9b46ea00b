// Operator notifications (Telegram or plain log output)
pub mod messages;
pub mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use parking_lot::Mutex;

/// Best-effort text delivery to the registered recipients
///
/// Implementations never return errors: delivery failures are logged and
/// swallowed so that notification problems can't stall trading.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str);
}

/// Writes notifications to the log (used when no chat is configured)
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) {
        tracing::info!("📣 {}", message.replace('\n', " | "));
    }
}

/// Keeps every message in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}
