//! Customer conversation engine
//!
//! Interprets one inbound event against the `step` of the conversation's active order.
//! Each call runs under the conversation lock: find (or create) the active order,
//! apply at most one transition, persist, release the lock. The returned
//! notifications are dispatched by the caller afterwards.

use std::sync::Arc;
use tracing::{debug, info};

use crate::dialogue::{validate_free_text, FieldValue, GeoPoint, Step};
use crate::errors::OrderError;
use crate::localization::{t_args_lang, t_lang};
use crate::locks::ConversationLocks;
use crate::models::{ConversationKey, NewMessage, Order, OrderStatus};
use crate::notifier::{Channel, Markup, Notification};
use crate::store::OrderStore;

use super::callback_data::CustomerButton;
use super::ui_builder::{category_menu, location_request, payment_menu, phone_request, service_menu};

/// Inbound customer event, already classified by the transport layer
#[derive(Debug, Clone, PartialEq)]
pub enum CustomerEvent {
    /// Slash command such as `/start`
    Command(String),
    /// Typed text
    Text(String),
    /// Phone number shared through the contact button
    Contact(String),
    /// Coordinates shared through the location button
    Location(GeoPoint),
    /// Callback token of a pressed inline button
    Button(String),
}

pub struct ConversationEngine {
    store: Arc<dyn OrderStore>,
    locks: Arc<ConversationLocks>,
    language_code: String,
}

impl ConversationEngine {
    pub fn new(
        store: Arc<dyn OrderStore>,
        locks: Arc<ConversationLocks>,
        language_code: impl Into<String>,
    ) -> Self {
        Self {
            store,
            locks,
            language_code: language_code.into(),
        }
    }

    /// Apply one event to the conversation identified by `key`
    ///
    /// The active order of the conversation is looked up, or created on first
    /// contact, and at most one transition of the step table is applied and saved.
    /// Text arriving after the provider finished the last order is relayed on that
    /// order instead of opening a new one.
    ///
    /// # Arguments
    ///
    /// * `key` - The (user id, chat id) pair the event came from
    /// * `event` - The classified inbound event
    ///
    /// # Returns
    ///
    /// Notifications to dispatch after the call returns; the conversation lock is
    /// already released by then. An unknown category or service yields a single
    /// "not found" reply, a malformed or out-of-step event yields none.
    ///
    /// # Errors
    ///
    /// [`OrderError::Store`] when the store fails. Nothing is partially applied.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use usta_bot::bot::{ConversationEngine, CustomerEvent};
    /// use usta_bot::dialogue::Step;
    /// use usta_bot::locks::ConversationLocks;
    /// use usta_bot::models::ConversationKey;
    /// use usta_bot::{MemoryStore, OrderStore};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let store = Arc::new(MemoryStore::new());
    /// let engine = ConversationEngine::new(store.clone(), Arc::new(ConversationLocks::new()), "uz");
    /// let key = ConversationKey::new(10, 20);
    ///
    /// let replies = engine
    ///     .handle(key, CustomerEvent::Command("/start".to_string()))
    ///     .await?;
    /// assert_eq!(replies.len(), 1);
    ///
    /// let order = store.find_active_order(key).await?.expect("order created");
    /// assert_eq!(order.step, Step::Category);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn handle(
        &self,
        key: ConversationKey,
        event: CustomerEvent,
    ) -> Result<Vec<Notification>, OrderError> {
        let guard = self.locks.lock(key).await;
        let result = self.apply(key, event).await;
        drop(guard);
        self.locks.prune();
        result
    }

    async fn apply(
        &self,
        key: ConversationKey,
        event: CustomerEvent,
    ) -> Result<Vec<Notification>, OrderError> {
        let mut order = match self.store.find_active_order(key).await? {
            Some(order) => order,
            None => {
                if let CustomerEvent::Text(text) = &event {
                    if let Some(finished) = self.finished_order(key).await? {
                        return self.relay_message(&finished, text).await;
                    }
                }
                let order = self.store.create_order(key).await?;
                info!(order_id = order.id, conversation = %key, "Created order for conversation");
                order
            }
        };

        if let CustomerEvent::Command(command) = &event {
            if is_start_command(command) {
                return self.restart(&mut order).await;
            }
            debug!(order_id = order.id, command = %command, "Ignoring unsupported command");
            return Ok(Vec::new());
        }

        match (order.step, event) {
            (Step::Category, CustomerEvent::Button(data)) => match CustomerButton::parse(&data) {
                Some(CustomerButton::Category(id)) => self.select_category(&mut order, id).await,
                _ => Ok(self.ignore(&order, "button")),
            },
            (Step::Service, CustomerEvent::Button(data)) => match CustomerButton::parse(&data) {
                Some(CustomerButton::Service(id)) => self.select_service(&mut order, id).await,
                _ => Ok(self.ignore(&order, "button")),
            },
            (Step::Phone, CustomerEvent::Contact(phone)) => {
                match validate_free_text(&phone) {
                    Ok(phone) => self.set_phone(&mut order, FieldValue::Structured(phone)).await,
                    Err(_) => Ok(self.ignore(&order, "contact")),
                }
            }
            (Step::Phone, CustomerEvent::Text(text)) => match validate_free_text(&text) {
                Ok(text) => self.set_phone(&mut order, FieldValue::FreeText(text)).await,
                Err(reason) => Ok(self.ignore(&order, reason)),
            },
            (Step::Location, CustomerEvent::Location(point)) => {
                self.set_location(&mut order, FieldValue::Structured(point)).await
            }
            (Step::Location, CustomerEvent::Text(text)) => match validate_free_text(&text) {
                Ok(text) => self.set_location(&mut order, FieldValue::FreeText(text)).await,
                Err(reason) => Ok(self.ignore(&order, reason)),
            },
            (Step::Comment, CustomerEvent::Text(text)) => match validate_free_text(&text) {
                Ok(text) => self.set_comment(&mut order, text).await,
                Err(reason) => Ok(self.ignore(&order, reason)),
            },
            (Step::Payment, CustomerEvent::Button(data)) => match CustomerButton::parse(&data) {
                Some(CustomerButton::Payment(method)) => {
                    order.payment_method = Some(method);
                    order.status = OrderStatus::InProgress;
                    order.step = Step::Done;
                    let order = self.store.save_order(&order).await?;
                    info!(order_id = order.id, payment = method.code(), "Order placed");

                    let order_id = order.id.to_string();
                    Ok(vec![
                        self.customer(
                            &order,
                            t_args_lang("order-accepted", &[("order_id", &order_id)], self.lang()),
                        ),
                        Notification::new(
                            Channel::Admin,
                            t_args_lang(
                                "admin-new-order",
                                &[("order_id", &order_id), ("payment", method.label())],
                                self.lang(),
                            ),
                        ),
                    ])
                }
                _ => Ok(self.ignore(&order, "button")),
            },
            (Step::Done, CustomerEvent::Text(text)) => self.relay_message(&order, &text).await,
            (_, event) => {
                debug!(order_id = order.id, step = %order.step, ?event, "Event does not fit current step");
                Ok(Vec::new())
            }
        }
    }

    /// Most recent order of the conversation, if it was placed and the provider has
    /// since finished it
    async fn finished_order(&self, key: ConversationKey) -> Result<Option<Order>, OrderError> {
        Ok(self
            .store
            .find_latest_order(key)
            .await?
            .filter(|order| order.step == Step::Done && order.status == OrderStatus::Done))
    }

    /// Store customer text as a message on the order and pass it on to the admin
    async fn relay_message(
        &self,
        order: &Order,
        text: &str,
    ) -> Result<Vec<Notification>, OrderError> {
        let text = match validate_free_text(text) {
            Ok(text) => text,
            Err(reason) => return Ok(self.ignore(order, reason)),
        };

        self.store
            .append_message(&NewMessage {
                order_id: order.id,
                from_admin: false,
                text: text.clone(),
            })
            .await?;
        info!(order_id = order.id, status = %order.status, "Customer message recorded");

        let order_id = order.id.to_string();
        Ok(vec![Notification::new(
            Channel::Admin,
            t_args_lang(
                "admin-customer-message",
                &[("order_id", &order_id), ("text", &text)],
                self.lang(),
            ),
        )])
    }

    async fn restart(&self, order: &mut Order) -> Result<Vec<Notification>, OrderError> {
        order.restart();
        let order = self.store.save_order(order).await?;
        info!(order_id = order.id, "Conversation restarted");

        let categories = self.store.list_categories().await?;
        Ok(vec![self
            .customer(&order, t_lang("choose-category", self.lang()))
            .with_markup(category_menu(&categories))])
    }

    async fn select_category(
        &self,
        order: &mut Order,
        category_id: i64,
    ) -> Result<Vec<Notification>, OrderError> {
        if self.store.get_category(category_id).await?.is_none() {
            info!(order_id = order.id, category_id, "Unknown category selected");
            return Ok(vec![self.customer(order, t_lang("category-not-found", self.lang()))]);
        }

        let services = self.store.list_services(Some(category_id)).await?;
        if services.is_empty() {
            return Ok(vec![self.customer(order, t_lang("no-services", self.lang()))]);
        }

        order.category_id = Some(category_id);
        order.step = Step::Service;
        let order = self.store.save_order(order).await?;
        debug!(order_id = order.id, category_id, "Category selected");

        Ok(vec![self
            .customer(&order, t_lang("choose-service", self.lang()))
            .with_markup(service_menu(&services, self.lang()))])
    }

    async fn select_service(
        &self,
        order: &mut Order,
        service_id: i64,
    ) -> Result<Vec<Notification>, OrderError> {
        let service = self
            .store
            .get_service(service_id)
            .await?
            .filter(|s| Some(s.category_id) == order.category_id);
        let Some(service) = service else {
            info!(order_id = order.id, service_id, "Unknown service selected");
            return Ok(vec![self.customer(order, t_lang("service-not-found", self.lang()))]);
        };

        order.service_id = Some(service.id);
        order.status = OrderStatus::Pending;
        order.step = Step::Phone;
        let order = self.store.save_order(order).await?;
        debug!(order_id = order.id, service_id, "Service selected");

        Ok(vec![self
            .customer(&order, t_lang("share-phone-prompt", self.lang()))
            .with_markup(phone_request(self.lang()))])
    }

    async fn set_phone(
        &self,
        order: &mut Order,
        phone: FieldValue<String>,
    ) -> Result<Vec<Notification>, OrderError> {
        order.phone = Some(match phone {
            FieldValue::Structured(phone) | FieldValue::FreeText(phone) => phone,
        });
        order.step = Step::Location;
        let order = self.store.save_order(order).await?;
        debug!(order_id = order.id, "Phone recorded");

        Ok(vec![self
            .customer(&order, t_lang("share-location-prompt", self.lang()))
            .with_markup(location_request(self.lang()))])
    }

    async fn set_location(
        &self,
        order: &mut Order,
        location: FieldValue<GeoPoint>,
    ) -> Result<Vec<Notification>, OrderError> {
        match location {
            FieldValue::Structured(point) => {
                order.location_lat = Some(point.latitude);
                order.location_lng = Some(point.longitude);
                order.address_text = None;
            }
            FieldValue::FreeText(address) => {
                order.address_text = Some(address);
                order.location_lat = None;
                order.location_lng = None;
            }
        }
        order.step = Step::Comment;
        let order = self.store.save_order(order).await?;
        debug!(order_id = order.id, "Location recorded");

        Ok(vec![self
            .customer(&order, t_lang("comment-prompt", self.lang()))
            .with_markup(Markup::RemoveKeyboard)])
    }

    async fn set_comment(
        &self,
        order: &mut Order,
        comment: String,
    ) -> Result<Vec<Notification>, OrderError> {
        order.comment = Some(comment);
        order.step = Step::Payment;
        let order = self.store.save_order(order).await?;
        debug!(order_id = order.id, "Comment recorded");

        Ok(vec![self
            .customer(&order, t_lang("payment-prompt", self.lang()))
            .with_markup(payment_menu())])
    }

    fn ignore(&self, order: &Order, reason: &str) -> Vec<Notification> {
        debug!(order_id = order.id, step = %order.step, reason, "Malformed event ignored");
        Vec::new()
    }

    fn customer(&self, order: &Order, text: String) -> Notification {
        Notification::new(Channel::Customer(order.chat_id), text)
    }

    fn lang(&self) -> Option<&str> {
        Some(&self.language_code)
    }
}

/// `/start`, `/start payload` and `/start@BotName` all restart the funnel
fn is_start_command(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .and_then(|word| word.split('@').next())
        .is_some_and(|word| word == "/start")
}
