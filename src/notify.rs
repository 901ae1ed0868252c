//! Notification gateway: pushes operator-authored text to a user's Telegram chat.
//!
//! Delivery is best effort. Failures are returned to the caller as a [`NotifyError`] and are
//! never retried.
use async_trait::async_trait;
use metrics::counter;
use teloxide::{ApiError, RequestError, prelude::*, types::ChatId};
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{NOTIFY_FAILED, NOTIFY_SENT};

#[derive(Debug, Error)]
pub enum NotifyError {
    /// No bot token is configured.
    #[error("notifications are disabled")]
    Disabled,
    /// The user blocked the bot or never started it.
    #[error("user has blocked the bot or never started it")]
    Unreachable,
    #[error("failed to deliver notification: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `text` to the private chat of the user with the given Telegram id.
    async fn send(&self, telegram_id: i64, text: &str) -> Result<(), NotifyError>;
}

/// Sends notifications through the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, telegram_id: i64, text: &str) -> Result<(), NotifyError> {
        let res = self
            .bot
            .send_message(ChatId(telegram_id), text.to_owned())
            .await;

        match res {
            Ok(_msg) => {
                counter!(NOTIFY_SENT).increment(1);
                debug!(telegram_id, "notification delivered");
                Ok(())
            }
            Err(err) => {
                counter!(NOTIFY_FAILED).increment(1);
                warn!(telegram_id, "notification failed: {err}");
                Err(match err {
                    RequestError::Api(
                        ApiError::BotBlocked | ApiError::ChatNotFound | ApiError::UserDeactivated,
                    ) => NotifyError::Unreachable,
                    other => NotifyError::Delivery(other.to_string()),
                })
            }
        }
    }
}

/// Used when no bot token is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledNotifier;

#[async_trait]
impl Notifier for DisabledNotifier {
    async fn send(&self, telegram_id: i64, _text: &str) -> Result<(), NotifyError> {
        counter!(NOTIFY_FAILED).increment(1);
        warn!(telegram_id, "dropping notification, no bot token configured");
        Err(NotifyError::Disabled)
    }
}
