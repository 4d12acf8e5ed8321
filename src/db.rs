use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, info};

use crate::dialogue::Step;
use crate::models::{
    Category, ConversationKey, Message, NewCategory, NewMessage, NewReview, NewService, Order,
    OrderStatus, PaymentMethod, Review, ReviewKind, Service,
};
use crate::store::{DeleteOutcome, OrderStore, ServiceUsage};

const ORDER_COLUMNS: &str = "id, user_id, chat_id, category_id, service_id, phone, address_text, \
     location_lat, location_lng, comment, payment_method, step, status, created_at, updated_at";

const REVIEW_COLUMNS: &str = "id, order_id, audio_file, audio_type, transcript, sentiment_score, \
     quality_score, difficulty, materials_used, extra_cost, recommended, ai_summary, created_at";

/// Initialize the database schema
pub async fn init_database_schema(pool: &PgPool) -> Result<()> {
    info!("Initializing database schema...");

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS categories (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(120) NOT NULL,
            icon VARCHAR(10),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create categories table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS services (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(150) NOT NULL,
            price DOUBLE PRECISION,
            description TEXT,
            category_id BIGINT NOT NULL REFERENCES categories(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create services table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS orders (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            chat_id BIGINT NOT NULL,
            category_id BIGINT REFERENCES categories(id),
            service_id BIGINT REFERENCES services(id),
            phone VARCHAR(50),
            address_text TEXT,
            location_lat DOUBLE PRECISION,
            location_lng DOUBLE PRECISION,
            comment TEXT,
            payment_method VARCHAR(20),
            step VARCHAR(30) NOT NULL DEFAULT 'category',
            status VARCHAR(30) NOT NULL DEFAULT 'NEW',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create orders table")?;

    // At most one active order per conversation
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS orders_one_active_per_conversation
         ON orders (user_id, chat_id)
         WHERE status IN ('NEW', 'PENDING', 'IN_PROGRESS', 'PAYMENT_PENDING')",
    )
    .execute(pool)
    .await
    .context("Failed to create active order index")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS messages (
            id BIGSERIAL PRIMARY KEY,
            order_id BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            from_admin BOOLEAN NOT NULL DEFAULT FALSE,
            text TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create messages table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS ai_reviews (
            id BIGSERIAL PRIMARY KEY,
            order_id BIGINT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            audio_file VARCHAR(300) NOT NULL,
            audio_type VARCHAR(20) NOT NULL,
            transcript TEXT NOT NULL,
            sentiment_score DOUBLE PRECISION NOT NULL,
            quality_score DOUBLE PRECISION NOT NULL,
            difficulty INTEGER NOT NULL,
            materials_used TEXT NOT NULL DEFAULT '',
            extra_cost DOUBLE PRECISION NOT NULL DEFAULT 0,
            recommended TEXT NOT NULL DEFAULT '',
            ai_summary TEXT NOT NULL DEFAULT '',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create ai_reviews table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

#[derive(FromRow)]
struct CategoryRow {
    id: i64,
    name: String,
    icon: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            name: row.name,
            icon: row.icon,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ServiceRow {
    id: i64,
    name: String,
    price: Option<f64>,
    description: Option<String>,
    category_id: i64,
    created_at: DateTime<Utc>,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Service {
            id: row.id,
            name: row.name,
            price: row.price,
            description: row.description,
            category_id: row.category_id,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    chat_id: i64,
    category_id: Option<i64>,
    service_id: Option<i64>,
    phone: Option<String>,
    address_text: Option<String>,
    location_lat: Option<f64>,
    location_lng: Option<f64>,
    comment: Option<String>,
    payment_method: Option<String>,
    step: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = anyhow::Error;

    fn try_from(row: OrderRow) -> Result<Self> {
        let payment_method = match row.payment_method {
            Some(code) => Some(
                PaymentMethod::from_code(&code)
                    .with_context(|| format!("Unknown payment method in order {}: {code}", row.id))?,
            ),
            None => None,
        };

        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            chat_id: row.chat_id,
            category_id: row.category_id,
            service_id: row.service_id,
            phone: row.phone,
            address_text: row.address_text,
            location_lat: row.location_lat,
            location_lng: row.location_lng,
            comment: row.comment,
            payment_method,
            step: row.step.parse::<Step>().map_err(anyhow::Error::msg)?,
            status: row.status.parse::<OrderStatus>().map_err(anyhow::Error::msg)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: i64,
    order_id: i64,
    from_admin: bool,
    text: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            id: row.id,
            order_id: row.order_id,
            from_admin: row.from_admin,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ReviewRow {
    id: i64,
    order_id: i64,
    audio_file: String,
    audio_type: String,
    transcript: String,
    sentiment_score: f64,
    quality_score: f64,
    difficulty: i32,
    materials_used: String,
    extra_cost: f64,
    recommended: String,
    ai_summary: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReviewRow> for Review {
    type Error = anyhow::Error;

    fn try_from(row: ReviewRow) -> Result<Self> {
        Ok(Review {
            id: row.id,
            order_id: row.order_id,
            audio_file: row.audio_file,
            kind: row.audio_type.parse::<ReviewKind>().map_err(anyhow::Error::msg)?,
            transcript: row.transcript,
            sentiment_score: row.sentiment_score,
            quality_score: row.quality_score,
            difficulty: row.difficulty,
            materials_used: row.materials_used,
            extra_cost: row.extra_cost,
            recommended: row.recommended,
            ai_summary: row.ai_summary,
            created_at: row.created_at,
        })
    }
}

fn into_orders(rows: Vec<OrderRow>) -> Result<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

/// Postgres-backed [`OrderStore`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn list_categories(&self) -> Result<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, name, icon, created_at FROM categories ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list categories")?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let row = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, name, icon, created_at FROM categories WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read category")?;
        Ok(row.map(Category::from))
    }

    async fn create_category(&self, new: &NewCategory) -> Result<Category> {
        let row = sqlx::query_as::<_, CategoryRow>(
            "INSERT INTO categories (name, icon) VALUES ($1, $2)
             RETURNING id, name, icon, created_at",
        )
        .bind(&new.name)
        .bind(&new.icon)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert category")?;
        info!(category_id = row.id, "Category created");
        Ok(row.into())
    }

    async fn delete_category(&self, id: i64) -> Result<DeleteOutcome> {
        let in_use: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM services WHERE category_id = $1)
                 OR EXISTS (SELECT 1 FROM orders WHERE category_id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check category references")?;

        if in_use {
            return Ok(DeleteOutcome::InUse);
        }

        let rows_affected = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete category")?
            .rows_affected();

        if rows_affected > 0 {
            info!(category_id = id, "Category deleted");
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn list_services(&self, category_id: Option<i64>) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, name, price, description, category_id, created_at FROM services
             WHERE $1::BIGINT IS NULL OR category_id = $1
             ORDER BY id",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list services")?;
        Ok(rows.into_iter().map(Service::from).collect())
    }

    async fn get_service(&self, id: i64) -> Result<Option<Service>> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT id, name, price, description, category_id, created_at FROM services
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read service")?;
        Ok(row.map(Service::from))
    }

    async fn create_service(&self, new: &NewService) -> Result<Service> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "INSERT INTO services (name, price, description, category_id) VALUES ($1, $2, $3, $4)
             RETURNING id, name, price, description, category_id, created_at",
        )
        .bind(&new.name)
        .bind(new.price)
        .bind(&new.description)
        .bind(new.category_id)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert service")?;
        info!(service_id = row.id, category_id = row.category_id, "Service created");
        Ok(row.into())
    }

    async fn delete_service(&self, id: i64) -> Result<DeleteOutcome> {
        let in_use: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE service_id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .context("Failed to check service references")?;

        if in_use {
            return Ok(DeleteOutcome::InUse);
        }

        let rows_affected = sqlx::query("DELETE FROM services WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete service")?
            .rows_affected();

        if rows_affected > 0 {
            info!(service_id = id, "Service deleted");
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn find_active_order(&self, key: ConversationKey) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE user_id = $1 AND chat_id = $2
               AND status IN ('NEW', 'PENDING', 'IN_PROGRESS', 'PAYMENT_PENDING')
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(key.user_id)
        .bind(key.chat_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up active order")?;
        row.map(Order::try_from).transpose()
    }

    async fn find_latest_order(&self, key: ConversationKey) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE user_id = $1 AND chat_id = $2
             ORDER BY id DESC LIMIT 1"
        ))
        .bind(key.user_id)
        .bind(key.chat_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up latest order")?;
        row.map(Order::try_from).transpose()
    }

    async fn create_order(&self, key: ConversationKey) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (user_id, chat_id, step, status) VALUES ($1, $2, $3, $4)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(key.user_id)
        .bind(key.chat_id)
        .bind(Step::Category.as_str())
        .bind(OrderStatus::New.as_str())
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert order")?;
        info!(order_id = row.id, conversation = %key, "Order created");
        row.try_into()
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read order")?;
        row.map(Order::try_from).transpose()
    }

    async fn save_order(&self, order: &Order) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET
                category_id = $2, service_id = $3, phone = $4, address_text = $5,
                location_lat = $6, location_lng = $7, comment = $8, payment_method = $9,
                step = $10, status = $11, updated_at = NOW()
             WHERE id = $1
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(order.id)
        .bind(order.category_id)
        .bind(order.service_id)
        .bind(&order.phone)
        .bind(&order.address_text)
        .bind(order.location_lat)
        .bind(order.location_lng)
        .bind(&order.comment)
        .bind(order.payment_method.map(|m| m.code()))
        .bind(order.step.as_str())
        .bind(order.status.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update order")?
        .with_context(|| format!("Order {} disappeared during update", order.id))?;
        debug!(order_id = order.id, step = %order.step, status = %order.status, "Order saved");
        row.try_into()
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders
             WHERE $1::TEXT IS NULL OR status = $1
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list orders")?;
        into_orders(rows)
    }

    async fn list_orders_in(&self, statuses: &[OrderStatus]) -> Result<Vec<Order>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = ANY($1) ORDER BY id"
        ))
        .bind(statuses)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list orders by status")?;
        into_orders(rows)
    }

    async fn append_message(&self, new: &NewMessage) -> Result<Message> {
        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages (order_id, from_admin, text) VALUES ($1, $2, $3)
             RETURNING id, order_id, from_admin, text, created_at",
        )
        .bind(new.order_id)
        .bind(new.from_admin)
        .bind(&new.text)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert message")?;
        debug!(order_id = new.order_id, message_id = row.id, "Message appended");
        Ok(row.into())
    }

    async fn list_messages(&self, order_id: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, order_id, from_admin, text, created_at FROM messages
             WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list messages")?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn create_review(&self, new: &NewReview) -> Result<Review> {
        let row = sqlx::query_as::<_, ReviewRow>(&format!(
            "INSERT INTO ai_reviews (order_id, audio_file, audio_type, transcript, sentiment_score,
                 quality_score, difficulty, materials_used, extra_cost, recommended, ai_summary)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {REVIEW_COLUMNS}"
        ))
        .bind(new.order_id)
        .bind(&new.audio_file)
        .bind(new.kind.as_str())
        .bind(&new.transcript)
        .bind(new.sentiment_score)
        .bind(new.quality_score)
        .bind(new.difficulty)
        .bind(&new.materials_used)
        .bind(new.extra_cost)
        .bind(&new.recommended)
        .bind(&new.ai_summary)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert review")?;
        info!(order_id = new.order_id, review_id = row.id, "Review stored");
        row.try_into()
    }

    async fn list_reviews(&self, order_id: i64) -> Result<Vec<Review>> {
        let rows = sqlx::query_as::<_, ReviewRow>(&format!(
            "SELECT {REVIEW_COLUMNS} FROM ai_reviews WHERE order_id = $1 ORDER BY created_at, id"
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list reviews")?;
        rows.into_iter().map(Review::try_from).collect()
    }

    async fn status_counts(&self) -> Result<Vec<(OrderStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM orders GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .context("Failed to count orders by status")?;
        rows.into_iter()
            .map(|(status, count)| {
                let status = status.parse::<OrderStatus>().map_err(anyhow::Error::msg)?;
                Ok((status, count))
            })
            .collect()
    }

    async fn completed_revenue(&self) -> Result<f64> {
        let revenue: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(s.price), 0)::DOUBLE PRECISION
             FROM orders o JOIN services s ON s.id = o.service_id
             WHERE o.status IN ('DONE', 'PAYMENT_PENDING')",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to sum revenue")?;
        Ok(revenue)
    }

    async fn top_services(&self, limit: usize) -> Result<Vec<ServiceUsage>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT s.id, s.name, COUNT(o.id) AS orders
             FROM services s JOIN orders o ON o.service_id = s.id
             GROUP BY s.id, s.name
             ORDER BY orders DESC, s.id
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to rank services")?;
        Ok(rows
            .into_iter()
            .map(|(service_id, name, orders)| ServiceUsage {
                service_id,
                name,
                orders,
            })
            .collect())
    }
}
