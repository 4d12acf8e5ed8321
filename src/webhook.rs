//! # Webhook Module
//!
//! Telegram webhook endpoints for the customer and provider bots. Only the update
//! fields the bots act on are decoded. Every call is acknowledged with
//! `{"ok": true}`, whatever happened inside, so Telegram never redelivers.

use axum::{body::Bytes, extract::State, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::bot::{CustomerEvent, ProviderEvent};
use crate::dialogue::GeoPoint;
use crate::models::ConversationKey;
use crate::notifier::dispatch;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    pub phone_number: String,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMessage {
    pub chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub message: Option<CallbackMessage>,
    pub from: User,
}

fn classify_text(text: String) -> Result<String, String> {
    if text.trim_start().starts_with('/') {
        Ok(text.trim().to_string())
    } else {
        Err(text)
    }
}

impl Update {
    /// The conversation and event this update means for the customer bot
    pub fn customer_event(self) -> Option<(ConversationKey, CustomerEvent)> {
        if let Some(query) = self.callback_query {
            let chat_id = query.message.map(|m| m.chat.id).unwrap_or(query.from.id);
            let data = query.data?;
            return Some((ConversationKey::new(query.from.id, chat_id), CustomerEvent::Button(data)));
        }

        let message = self.message?;
        let user_id = message.from.map(|u| u.id).unwrap_or(message.chat.id);
        let key = ConversationKey::new(user_id, message.chat.id);

        let event = if let Some(contact) = message.contact {
            CustomerEvent::Contact(contact.phone_number)
        } else if let Some(point) = message.location {
            CustomerEvent::Location(point)
        } else {
            match classify_text(message.text?) {
                Ok(command) => CustomerEvent::Command(command),
                Err(text) => CustomerEvent::Text(text),
            }
        };
        Some((key, event))
    }

    /// The provider chat and event this update means for the provider bot
    pub fn provider_event(self) -> Option<(i64, ProviderEvent)> {
        if let Some(query) = self.callback_query {
            let chat_id = query.message.map(|m| m.chat.id).unwrap_or(query.from.id);
            return Some((chat_id, ProviderEvent::Button(query.data?)));
        }

        let message = self.message?;
        let event = match classify_text(message.text?) {
            Ok(command) => ProviderEvent::Command(command),
            Err(text) => ProviderEvent::Text(text),
        };
        Some((message.chat.id, event))
    }
}

fn parse_update(body: &[u8]) -> Option<Update> {
    match serde_json::from_slice(body) {
        Ok(update) => Some(update),
        Err(e) => {
            warn!(error = %e, "Ignoring malformed webhook update");
            None
        }
    }
}

fn ack() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// POST /telegram/user_webhook
pub async fn customer_webhook(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let Some((key, event)) = parse_update(&body).and_then(Update::customer_event) else {
        debug!("Customer update carries nothing to act on");
        return ack();
    };

    match state.engine.handle(key, event).await {
        Ok(notifications) => dispatch(state.notifier.as_ref(), notifications).await,
        Err(e) => error!(conversation = %key, error = %e, "Customer update failed"),
    }
    ack()
}

/// POST /telegram/master_webhook
pub async fn provider_webhook(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let Some((chat_id, event)) = parse_update(&body).and_then(Update::provider_event) else {
        debug!("Provider update carries nothing to act on");
        return ack();
    };

    match state.provider_desk.handle(chat_id, event).await {
        Ok(notifications) => dispatch(state.notifier.as_ref(), notifications).await,
        Err(e) => error!(chat_id, error = %e, "Provider update failed"),
    }
    ack()
}
