//! Status lifecycle controller
//!
//! Applies provider and admin status changes independently of the conversation step.
//! Providers may only move PENDING -> IN_PROGRESS and IN_PROGRESS -> DONE; admins may
//! set any status. Writers take the conversation lock of the order, so these changes
//! never interleave with the customer engine working on the same conversation.

use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{info, warn};

use crate::dialogue::validate_free_text;
use crate::errors::OrderError;
use crate::localization::{t_args_lang, t_lang};
use crate::locks::ConversationLocks;
use crate::models::{Message, NewMessage, Order, OrderStatus};
use crate::notifier::{Channel, Notification};
use crate::store::OrderStore;

use super::callback_data::ProviderAction;

impl ProviderAction {
    /// Required prior status and resulting status
    pub fn transition(&self) -> (OrderStatus, OrderStatus) {
        match self {
            ProviderAction::Start => (OrderStatus::Pending, OrderStatus::InProgress),
            ProviderAction::Finish => (OrderStatus::InProgress, OrderStatus::Done),
        }
    }
}

/// Result of an accepted status change
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order: Order,
    pub previous: OrderStatus,
    pub notifications: Vec<Notification>,
}

pub struct LifecycleController {
    store: Arc<dyn OrderStore>,
    locks: Arc<ConversationLocks>,
    language_code: String,
}

impl LifecycleController {
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

    /// Provider-driven transition, rejected unless the order is in the required status
    ///
    /// # Arguments
    ///
    /// * `order_id` - Order named by the pressed button
    /// * `action` - [`ProviderAction::Start`] (PENDING to IN_PROGRESS) or
    ///   [`ProviderAction::Finish`] (IN_PROGRESS to DONE)
    /// * `provider_chat_id` - Chat that receives the confirmation
    ///
    /// # Returns
    ///
    /// The saved order, its previous status and notifications for the provider, the
    /// customer and the admin channel.
    ///
    /// # Errors
    ///
    /// - [`OrderError::NotFound`] when the order does not exist
    /// - [`OrderError::InvalidTransition`] when the order is not in the required
    ///   status; the order is left untouched
    /// - [`OrderError::Store`] on persistence failures
    pub async fn provider_transition(
        &self,
        order_id: i64,
        action: ProviderAction,
        provider_chat_id: i64,
    ) -> Result<StatusChange, OrderError> {
        let (required, target) = action.transition();

        let (guard, mut order) = self.lock_order(order_id).await?;
        if order.status != required {
            drop(guard);
            self.locks.prune();
            warn!(order_id, from = %order.status, to = %target, "Provider transition rejected");
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        let previous = order.status;
        order.status = target;
        let saved = self.store.save_order(&order).await;
        drop(guard);
        self.locks.prune();
        let order = saved?;
        info!(order_id, from = %previous, to = %target, "Provider changed order status");

        let order_ref = order.id.to_string();
        let (provider_key, admin_key) = match action {
            ProviderAction::Start => ("master-started", "admin-master-started"),
            ProviderAction::Finish => ("master-finished", "admin-master-finished"),
        };

        let mut notifications = vec![Notification::new(
            Channel::Provider(provider_chat_id),
            t_lang(provider_key, self.lang()),
        )];
        notifications.extend(self.customer_notice(&order));
        notifications.push(Notification::new(
            Channel::Admin,
            t_args_lang(admin_key, &[("order_id", &order_ref)], self.lang()),
        ));

        Ok(StatusChange {
            order,
            previous,
            notifications,
        })
    }

    /// Operator override: any status may be set directly
    ///
    /// Reactivating an order is refused while its conversation already has another
    /// active order.
    ///
    /// # Returns
    ///
    /// The saved order and its previous status. Notifications are only produced when
    /// the status actually changed: the customer hears about IN_PROGRESS, DONE and
    /// PAYMENT_PENDING, the admin channel about IN_PROGRESS and DONE.
    ///
    /// # Errors
    ///
    /// [`OrderError::NotFound`], [`OrderError::Conflict`] or [`OrderError::Store`].
    pub async fn admin_set_status(
        &self,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<StatusChange, OrderError> {
        let (guard, mut order) = self.lock_order(order_id).await?;
        let result = self.apply_admin_status(&mut order, status).await;
        drop(guard);
        self.locks.prune();
        let (order, previous) = result?;
        info!(order_id, from = %previous, to = %status, "Admin set order status");

        let mut notifications = Vec::new();
        if previous != status {
            notifications.extend(self.customer_notice(&order));
            if status.notifies_admin() {
                let order_ref = order.id.to_string();
                notifications.push(Notification::new(
                    Channel::Admin,
                    t_args_lang(
                        "admin-status-changed",
                        &[("order_id", &order_ref), ("status", status.as_str())],
                        self.lang(),
                    ),
                ));
            }
        }

        Ok(StatusChange {
            order,
            previous,
            notifications,
        })
    }

    async fn apply_admin_status(
        &self,
        order: &mut Order,
        status: OrderStatus,
    ) -> Result<(Order, OrderStatus), OrderError> {
        if status.is_active() && !order.is_active() {
            if let Some(active) = self.store.find_active_order(order.key()).await? {
                if active.id != order.id {
                    return Err(OrderError::Conflict(format!(
                        "conversation {} already has active order {}",
                        order.key(),
                        active.id
                    )));
                }
            }
        }

        let previous = order.status;
        order.status = status;
        let order = self.store.save_order(order).await?;
        Ok((order, previous))
    }

    /// Record an admin message and relay it to the customer
    pub async fn admin_post_message(
        &self,
        order_id: i64,
        text: &str,
    ) -> Result<(Message, Vec<Notification>), OrderError> {
        let text = validate_free_text(text)
            .map_err(|reason| OrderError::Invalid(format!("message text is {reason}")))?;

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("order {order_id}")))?;

        let message = self
            .store
            .append_message(&NewMessage {
                order_id,
                from_admin: true,
                text: text.clone(),
            })
            .await?;
        info!(order_id, message_id = message.id, "Admin message recorded");

        let notification = Notification::new(
            Channel::Customer(order.chat_id),
            t_args_lang("admin-reply", &[("text", &text)], self.lang()),
        );
        Ok((message, vec![notification]))
    }

    /// Lock the order's conversation and reload the order under the lock
    async fn lock_order(&self, order_id: i64) -> Result<(OwnedMutexGuard<()>, Order), OrderError> {
        let not_found = || OrderError::NotFound(format!("order {order_id}"));

        let order = self.store.get_order(order_id).await?.ok_or_else(not_found)?;
        let guard = self.locks.lock(order.key()).await;
        match self.store.get_order(order_id).await {
            Ok(Some(order)) => Ok((guard, order)),
            Ok(None) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    fn customer_notice(&self, order: &Order) -> Option<Notification> {
        if !order.status.is_customer_visible() {
            return None;
        }
        let text = match order.status {
            OrderStatus::InProgress => t_lang("customer-job-started", self.lang()),
            OrderStatus::Done => t_lang("customer-job-done", self.lang()),
            _ => {
                let order_ref = order.id.to_string();
                t_args_lang("customer-payment-pending", &[("order_id", &order_ref)], self.lang())
            }
        };
        Some(Notification::new(Channel::Customer(order.chat_id), text))
    }

    fn lang(&self) -> Option<&str> {
        Some(&self.language_code)
    }
}
