//! # Notifier Module
//!
//! Outbound messages to the customer bot, the provider bot and the admin channel.
//! The workflow only builds [`Notification`] values; a [`Notifier`] delivers them
//! after the order mutation has been persisted. Delivery is attempted once and a
//! failure is logged, never propagated.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Mutex;
use teloxide::prelude::*;
use teloxide::types::{
    ButtonRequest, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    KeyboardRemove, ReplyMarkup,
};
use tracing::{debug, info, warn};

use crate::localization::t_lang;

/// Where a notification goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Customer chat on the customer bot
    Customer(i64),
    /// Provider chat on the provider bot
    Provider(i64),
    /// Administrative broadcast chat
    Admin,
}

/// Inline button with an opaque callback token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// Reply markup attached to a notification
#[derive(Debug, Clone, PartialEq)]
pub enum Markup {
    /// Rows of inline buttons
    Inline(Vec<Vec<Button>>),
    /// One-button reply keyboard asking for the contact
    RequestContact(String),
    /// One-button reply keyboard asking for the location
    RequestLocation(String),
    /// Hide a previously shown reply keyboard
    RemoveKeyboard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub target: Channel,
    pub text: String,
    pub markup: Option<Markup>,
}

impl Notification {
    pub fn new(target: Channel, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
            markup: None,
        }
    }

    pub fn with_markup(mut self, markup: Markup) -> Self {
        self.markup = Some(markup);
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Deliver notifications in order, one attempt each
pub async fn dispatch(notifier: &dyn Notifier, notifications: Vec<Notification>) {
    for notification in notifications {
        if let Err(e) = notifier.send(&notification).await {
            warn!(
                target_channel = ?notification.target,
                error = %e,
                "Notification delivery failed"
            );
        }
    }
}

fn to_reply_markup(markup: &Markup) -> ReplyMarkup {
    match markup {
        Markup::Inline(rows) => ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(
            rows.iter().map(|row| {
                row.iter()
                    .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.token.clone()))
                    .collect::<Vec<_>>()
            }),
        )),
        Markup::RequestContact(label) => ReplyMarkup::Keyboard(
            KeyboardMarkup::new(vec![vec![
                KeyboardButton::new(label.clone()).request(ButtonRequest::Contact)
            ]])
            .resize_keyboard(),
        ),
        Markup::RequestLocation(label) => ReplyMarkup::Keyboard(
            KeyboardMarkup::new(vec![vec![
                KeyboardButton::new(label.clone()).request(ButtonRequest::Location)
            ]])
            .resize_keyboard(),
        ),
        Markup::RemoveKeyboard => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    }
}

/// Delivers notifications through the two Telegram bots
///
/// Admin notices go out through the customer bot, prefixed with the admin header.
/// A channel whose bot token or chat id is not configured is skipped.
pub struct TelegramNotifier {
    customer_bot: Option<Bot>,
    provider_bot: Option<Bot>,
    admin_chat_id: Option<ChatId>,
    language_code: String,
}

impl TelegramNotifier {
    pub fn new(
        customer_token: Option<&str>,
        provider_token: Option<&str>,
        admin_chat_id: Option<i64>,
        language_code: &str,
    ) -> Self {
        Self {
            customer_bot: customer_token.map(Bot::new),
            provider_bot: provider_token.map(Bot::new),
            admin_chat_id: admin_chat_id.map(ChatId),
            language_code: language_code.to_string(),
        }
    }

    async fn send_via(
        bot: &Bot,
        chat_id: ChatId,
        text: String,
        markup: Option<&Markup>,
    ) -> Result<()> {
        let request = bot.send_message(chat_id, text);
        let sent = match markup {
            Some(markup) => request.reply_markup(to_reply_markup(markup)).await,
            None => request.await,
        };
        sent.with_context(|| format!("Failed to send message to chat {chat_id}"))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let (bot, chat_id, text) = match notification.target {
            Channel::Customer(chat) => (&self.customer_bot, Some(ChatId(chat)), notification.text.clone()),
            Channel::Provider(chat) => (&self.provider_bot, Some(ChatId(chat)), notification.text.clone()),
            Channel::Admin => (
                &self.customer_bot,
                self.admin_chat_id,
                format!(
                    "{}\n{}",
                    t_lang("admin-prefix", Some(&self.language_code)),
                    notification.text
                ),
            ),
        };

        let (Some(bot), Some(chat_id)) = (bot, chat_id) else {
            debug!(target_channel = ?notification.target, "Channel not configured, notification dropped");
            return Ok(());
        };

        Self::send_via(bot, chat_id, text, notification.markup.as_ref()).await
    }
}

/// Logs notifications instead of sending them, used when no bot token is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        info!(target_channel = ?notification.target, text = %notification.text, "Notification (not sent)");
        Ok(())
    }
}

/// Keeps every notification in memory for inspection
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything sent so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Notifications sent to channels matching the predicate
    pub fn sent_to(&self, matches: impl Fn(&Channel) -> bool) -> Vec<Notification> {
        self.sent()
            .into_iter()
            .filter(|n| matches(&n.target))
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        debug!(target_channel = ?notification.target, "Notification recorded");
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _notification: &Notification) -> Result<()> {
            anyhow::bail!("transport down")
        }
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        dispatch(
            &FailingNotifier,
            vec![Notification::new(Channel::Admin, "hello")],
        )
        .await;
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::new();
        dispatch(
            &notifier,
            vec![
                Notification::new(Channel::Customer(1), "first"),
                Notification::new(Channel::Admin, "second"),
            ],
        )
        .await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "first");
        assert_eq!(notifier.sent_to(|c| *c == Channel::Admin).len(), 1);
    }

    #[test]
    fn test_inline_markup_conversion() {
        let markup = Markup::Inline(vec![
            vec![Button::new("CLICK", "pay_CLICK"), Button::new("PAYME", "pay_PAYME")],
            vec![Button::new("Naqd", "pay_CASH")],
        ]);
        match to_reply_markup(&markup) {
            ReplyMarkup::InlineKeyboard(keyboard) => {
                assert_eq!(keyboard.inline_keyboard.len(), 2);
                assert_eq!(keyboard.inline_keyboard[0].len(), 2);
                assert_eq!(keyboard.inline_keyboard[1][0].text, "Naqd");
            }
            other => panic!("unexpected markup: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_telegram_channels_are_skipped() {
        let notifier = TelegramNotifier::new(None, None, None, "uz");
        let result = notifier
            .send(&Notification::new(Channel::Customer(5), "hi"))
            .await;
        assert!(result.is_ok());
    }
}
