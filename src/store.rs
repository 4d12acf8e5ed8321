//! # Store Module
//!
//! The persistence boundary the workflow talks to. [`OrderStore`] is implemented by
//! [`crate::db::PgStore`] for Postgres and by [`MemoryStore`] for runs without a
//! database and for tests.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::models::{
    Category, ConversationKey, Message, NewCategory, NewMessage, NewReview, NewService, Order,
    OrderStatus, Review, Service,
};

/// Result of a catalog delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Still referenced by services or orders
    InUse,
}

/// Order count for one service, used by the analytics summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceUsage {
    pub service_id: i64,
    pub name: String,
    pub orders: i64,
}

/// Persistence operations used by the conversation engine, the lifecycle controller
/// and the admin console
///
/// Every method returns `anyhow::Result`; callers map failures to
/// [`crate::errors::OrderError::Store`] and never retry.
///
/// # Invariants
///
/// - At most one order per [`ConversationKey`] has a status in
///   [`OrderStatus::ACTIVE`]. `create_order` and `save_order` fail rather than
///   break it.
/// - Messages and reviews are append-only and listed in creation order.
/// - Catalog deletes report [`DeleteOutcome::InUse`] instead of leaving dangling
///   references.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn list_categories(&self) -> Result<Vec<Category>>;
    async fn get_category(&self, id: i64) -> Result<Option<Category>>;
    async fn create_category(&self, new: &NewCategory) -> Result<Category>;
    async fn delete_category(&self, id: i64) -> Result<DeleteOutcome>;

    /// Services ordered by id, optionally restricted to one category
    async fn list_services(&self, category_id: Option<i64>) -> Result<Vec<Service>>;
    async fn get_service(&self, id: i64) -> Result<Option<Service>>;
    async fn create_service(&self, new: &NewService) -> Result<Service>;
    async fn delete_service(&self, id: i64) -> Result<DeleteOutcome>;

    /// The order of this conversation whose status is in [`OrderStatus::ACTIVE`]
    async fn find_active_order(&self, key: ConversationKey) -> Result<Option<Order>>;
    /// The most recently created order of this conversation, whatever its status
    async fn find_latest_order(&self, key: ConversationKey) -> Result<Option<Order>>;
    /// Create a NEW order at the category step
    ///
    /// # Errors
    ///
    /// Fails when the conversation already has an active order.
    async fn create_order(&self, key: ConversationKey) -> Result<Order>;
    async fn get_order(&self, id: i64) -> Result<Option<Order>>;
    /// Writes every mutable field in one statement and bumps `updated_at`
    async fn save_order(&self, order: &Order) -> Result<Order>;
    /// Newest first
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>>;
    /// Oldest first
    async fn list_orders_in(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>>;

    async fn append_message(&self, new: &NewMessage) -> Result<Message>;
    /// Messages of an order in creation order
    async fn list_messages(&self, order_id: i64) -> Result<Vec<Message>>;

    async fn create_review(&self, new: &NewReview) -> Result<Review>;
    async fn list_reviews(&self, order_id: i64) -> Result<Vec<Review>>;

    async fn status_counts(&self) -> Result<Vec<(OrderStatus, i64)>>;
    /// Sum of service prices over orders that are DONE or PAYMENT_PENDING
    async fn completed_revenue(&self) -> Result<f64>;
    async fn top_services(&self, limit: usize) -> Result<Vec<ServiceUsage>>;
}

/// Table names, each with its own id sequence
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Table {
    Categories,
    Services,
    Orders,
    Messages,
    Reviews,
}

#[derive(Default)]
struct Tables {
    sequences: HashMap<Table, i64>,
    categories: HashMap<i64, Category>,
    services: HashMap<i64, Service>,
    orders: HashMap<i64, Order>,
    messages: Vec<Message>,
    reviews: Vec<Review>,
}

impl Tables {
    fn next_id(&mut self, table: Table) -> i64 {
        let id = self.sequences.entry(table).or_default();
        *id += 1;
        *id
    }

    fn active_order_for(&self, key: ConversationKey, except: Option<i64>) -> Option<&Order> {
        self.orders
            .values()
            .filter(|order| Some(order.id) != except)
            .find(|order| order.key() == key && order.is_active())
    }
}

/// In-memory store with the same invariants as the Postgres schema
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, simulating an unreachable database
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        self.tables
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        let tables = self.tables()?;
        let mut categories: Vec<Category> = tables.categories.values().cloned().collect();
        categories.sort_by_key(|c| c.id);
        Ok(categories)
    }

    async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        Ok(self.tables()?.categories.get(&id).cloned())
    }

    async fn create_category(&self, new: &NewCategory) -> Result<Category> {
        let mut tables = self.tables()?;
        let category = Category {
            id: tables.next_id(Table::Categories),
            name: new.name.clone(),
            icon: new.icon.clone(),
            created_at: Utc::now(),
        };
        tables.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn delete_category(&self, id: i64) -> Result<DeleteOutcome> {
        let mut tables = self.tables()?;
        if !tables.categories.contains_key(&id) {
            return Ok(DeleteOutcome::NotFound);
        }
        let referenced = tables.services.values().any(|s| s.category_id == id)
            || tables.orders.values().any(|o| o.category_id == Some(id));
        if referenced {
            return Ok(DeleteOutcome::InUse);
        }
        tables.categories.remove(&id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn list_services(&self, category_id: Option<i64>) -> Result<Vec<Service>> {
        let tables = self.tables()?;
        let mut services: Vec<Service> = tables
            .services
            .values()
            .filter(|s| category_id.is_none_or(|id| s.category_id == id))
            .cloned()
            .collect();
        services.sort_by_key(|s| s.id);
        Ok(services)
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>> {
        Ok(self.tables()?.services.get(&id).cloned())
    }

    async fn create_service(&self, new: &NewService) -> Result<Service> {
        let mut tables = self.tables()?;
        if !tables.categories.contains_key(&new.category_id) {
            bail!("category {} does not exist", new.category_id);
        }
        let service = Service {
            id: tables.next_id(Table::Services),
            name: new.name.clone(),
            price: new.price,
            description: new.description.clone(),
            category_id: new.category_id,
            created_at: Utc::now(),
        };
        tables.services.insert(service.id, service.clone());
        Ok(service)
    }

    async fn delete_service(&self, id: i64) -> Result<DeleteOutcome> {
        let mut tables = self.tables()?;
        if !tables.services.contains_key(&id) {
            return Ok(DeleteOutcome::NotFound);
        }
        if tables.orders.values().any(|o| o.service_id == Some(id)) {
            return Ok(DeleteOutcome::InUse);
        }
        tables.services.remove(&id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn find_active_order(&self, key: ConversationKey) -> Result<Option<Order>> {
        Ok(self.tables()?.active_order_for(key, None).cloned())
    }

    async fn find_latest_order(&self, key: ConversationKey) -> Result<Option<Order>> {
        let tables = self.tables()?;
        Ok(tables
            .orders
            .values()
            .filter(|order| order.key() == key)
            .max_by_key(|order| order.id)
            .cloned())
    }

    async fn create_order(&self, key: ConversationKey) -> Result<Order> {
        let mut tables = self.tables()?;
        if let Some(existing) = tables.active_order_for(key, None) {
            bail!(
                "conversation {key} already has active order {}",
                existing.id
            );
        }
        let order = Order::new(tables.next_id(Table::Orders), key, Utc::now());
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.tables()?.orders.get(&id).cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<Order> {
        let mut tables = self.tables()?;
        let Some(created_at) = tables.orders.get(&order.id).map(|o| o.created_at) else {
            bail!("order {} does not exist", order.id);
        };
        if order.is_active() {
            if let Some(other) = tables.active_order_for(order.key(), Some(order.id)) {
                bail!(
                    "conversation {} already has active order {}",
                    order.key(),
                    other.id
                );
            }
        }
        let mut stored = order.clone();
        stored.created_at = created_at;
        stored.updated_at = Utc::now();
        tables.orders.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let tables = self.tables()?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(orders)
    }

    async fn list_orders_in(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let tables = self.tables()?;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    async fn append_message(&self, new: &NewMessage) -> Result<Message> {
        let mut tables = self.tables()?;
        if !tables.orders.contains_key(&new.order_id) {
            bail!("order {} does not exist", new.order_id);
        }
        let message = Message {
            id: tables.next_id(Table::Messages),
            order_id: new.order_id,
            from_admin: new.from_admin,
            text: new.text.clone(),
            created_at: Utc::now(),
        };
        tables.messages.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, order_id: i64) -> Result<Vec<Message>> {
        let tables = self.tables()?;
        Ok(tables
            .messages
            .iter()
            .filter(|m| m.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn create_review(&self, new: &NewReview) -> Result<Review> {
        let mut tables = self.tables()?;
        if !tables.orders.contains_key(&new.order_id) {
            bail!("order {} does not exist", new.order_id);
        }
        let review = Review {
            id: tables.next_id(Table::Reviews),
            order_id: new.order_id,
            audio_file: new.audio_file.clone(),
            kind: new.kind,
            transcript: new.transcript.clone(),
            sentiment_score: new.sentiment_score,
            quality_score: new.quality_score,
            difficulty: new.difficulty,
            materials_used: new.materials_used.clone(),
            extra_cost: new.extra_cost,
            recommended: new.recommended.clone(),
            ai_summary: new.ai_summary.clone(),
            created_at: Utc::now(),
        };
        tables.reviews.push(review.clone());
        Ok(review)
    }

    async fn list_reviews(&self, order_id: i64) -> Result<Vec<Review>> {
        let tables = self.tables()?;
        Ok(tables
            .reviews
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn status_counts(&self) -> Result<Vec<(OrderStatus, i64)>> {
        let tables = self.tables()?;
        Ok(OrderStatus::ALL
            .into_iter()
            .map(|status| {
                let count = tables.orders.values().filter(|o| o.status == status).count();
                (status, count as i64)
            })
            .filter(|(_, count)| *count > 0)
            .collect())
    }

    async fn completed_revenue(&self) -> Result<f64> {
        let tables = self.tables()?;
        Ok(tables
            .orders
            .values()
            .filter(|o| matches!(o.status, OrderStatus::Done | OrderStatus::PaymentPending))
            .filter_map(|o| o.service_id.and_then(|id| tables.services.get(&id)))
            .filter_map(|s| s.price)
            .sum())
    }

    async fn top_services(&self, limit: usize) -> Result<Vec<ServiceUsage>> {
        let tables = self.tables()?;
        let mut counts: HashMap<i64, i64> = HashMap::new();
        for service_id in tables.orders.values().filter_map(|o| o.service_id) {
            *counts.entry(service_id).or_default() += 1;
        }
        let mut usage: Vec<ServiceUsage> = counts
            .into_iter()
            .filter_map(|(service_id, orders)| {
                tables.services.get(&service_id).map(|s| ServiceUsage {
                    service_id,
                    name: s.name.clone(),
                    orders,
                })
            })
            .collect();
        usage.sort_by(|a, b| b.orders.cmp(&a.orders).then(a.service_id.cmp(&b.service_id)));
        usage.truncate(limit);
        Ok(usage)
    }
}
