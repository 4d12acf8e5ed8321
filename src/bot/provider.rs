//! Provider ("usta") bot: order list, order cards and status buttons

use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::OrderError;
use crate::localization::{t_args_lang, t_lang};
use crate::models::{Order, OrderStatus};
use crate::notifier::{Channel, Notification};
use crate::store::OrderStore;

use super::callback_data::ProviderButton;
use super::lifecycle::LifecycleController;
use super::ui_builder::{provider_order_card, provider_orders_menu};

/// Statuses a provider works on
const PROVIDER_VISIBLE: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::InProgress];

/// Inbound provider event
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Command(String),
    Text(String),
    Button(String),
}

pub struct ProviderDesk {
    store: Arc<dyn OrderStore>,
    lifecycle: Arc<LifecycleController>,
    allowed_chats: Vec<i64>,
    language_code: String,
}

impl ProviderDesk {
    pub fn new(
        store: Arc<dyn OrderStore>,
        lifecycle: Arc<LifecycleController>,
        allowed_chats: Vec<i64>,
        language_code: impl Into<String>,
    ) -> Self {
        if allowed_chats.is_empty() {
            warn!("No provider chats configured, every chat may drive order statuses");
        }
        Self {
            store,
            lifecycle,
            allowed_chats,
            language_code: language_code.into(),
        }
    }

    /// An empty allowlist admits every chat
    pub fn is_authorized(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    pub async fn handle(
        &self,
        chat_id: i64,
        event: ProviderEvent,
    ) -> Result<Vec<Notification>, OrderError> {
        if !self.is_authorized(chat_id) {
            warn!(chat_id, "Ignoring provider event from unauthorized chat");
            return Ok(Vec::new());
        }

        match event {
            ProviderEvent::Command(command) => match command.split_whitespace().next() {
                Some("/start") => Ok(vec![self.reply(chat_id, t_lang("master-welcome", self.lang()))]),
                Some("/orders") => self.list_orders(chat_id).await,
                _ => Ok(vec![self.reply(chat_id, t_lang("master-unknown-command", self.lang()))]),
            },
            ProviderEvent::Text(_) => {
                Ok(vec![self.reply(chat_id, t_lang("master-unknown-command", self.lang()))])
            }
            ProviderEvent::Button(data) => match ProviderButton::parse(&data) {
                Some(ProviderButton::ShowOrder(order_id)) => self.show_order(chat_id, order_id).await,
                Some(ProviderButton::Status(order_id, action)) => {
                    match self.lifecycle.provider_transition(order_id, action, chat_id).await {
                        Ok(change) => Ok(change.notifications),
                        Err(OrderError::NotFound(_)) => Ok(vec![self.reply(
                            chat_id,
                            t_lang("master-order-not-found", self.lang()),
                        )]),
                        Err(OrderError::InvalidTransition { from, .. }) => {
                            let order_ref = order_id.to_string();
                            Ok(vec![self.reply(
                                chat_id,
                                t_args_lang(
                                    "master-transition-rejected",
                                    &[("order_id", &order_ref), ("status", from.as_str())],
                                    self.lang(),
                                ),
                            )])
                        }
                        Err(e) => Err(e),
                    }
                }
                None => {
                    debug!(chat_id, data = %data, "Malformed provider callback ignored");
                    Ok(Vec::new())
                }
            },
        }
    }

    async fn list_orders(&self, chat_id: i64) -> Result<Vec<Notification>, OrderError> {
        let orders = self.store.list_orders_in(&PROVIDER_VISIBLE).await?;
        if orders.is_empty() {
            return Ok(vec![self.reply(chat_id, t_lang("master-no-orders", self.lang()))]);
        }

        let mut rows = Vec::with_capacity(orders.len());
        for order in orders {
            let service_name = self.service_name(&order).await?;
            rows.push((order, service_name));
        }

        Ok(vec![self
            .reply(chat_id, t_lang("master-orders-title", self.lang()))
            .with_markup(provider_orders_menu(&rows))])
    }

    async fn show_order(&self, chat_id: i64, order_id: i64) -> Result<Vec<Notification>, OrderError> {
        let Some(order) = self.store.get_order(order_id).await? else {
            return Ok(vec![self.reply(chat_id, t_lang("master-order-not-found", self.lang()))]);
        };
        let service_name = self.service_name(&order).await?;
        let (text, keyboard) = provider_order_card(&order, service_name.as_deref(), self.lang());
        Ok(vec![self.reply(chat_id, text).with_markup(keyboard)])
    }

    async fn service_name(&self, order: &Order) -> Result<Option<String>, OrderError> {
        let Some(service_id) = order.service_id else {
            return Ok(None);
        };
        Ok(self.store.get_service(service_id).await?.map(|s| s.name))
    }

    fn reply(&self, chat_id: i64, text: String) -> Notification {
        Notification::new(Channel::Provider(chat_id), text)
    }

    fn lang(&self) -> Option<&str> {
        Some(&self.language_code)
    }
}
