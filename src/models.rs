//! # Data Model
//!
//! Catalog records (categories and services), the central `Order` entity with its
//! conversation step and fulfillment status, and the append-only children of an
//! order: chat messages and voice-analysis reviews.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::dialogue::{GeoPoint, Step};

/// Service category shown in the first customer menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a category
#[derive(Debug, Clone, Deserialize)]
pub struct NewCategory {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

/// A bookable service belonging to exactly one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub price: Option<f64>,
    pub description: Option<String>,
    pub category_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a service
#[derive(Debug, Clone, Deserialize)]
pub struct NewService {
    pub name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    pub category_id: i64,
}

/// Fulfillment lifecycle stage of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Pending,
    InProgress,
    Done,
    PaymentPending,
    Closed,
}

impl OrderStatus {
    /// Statuses that make an order the active one of its conversation
    pub const ACTIVE: [OrderStatus; 4] = [
        OrderStatus::New,
        OrderStatus::Pending,
        OrderStatus::InProgress,
        OrderStatus::PaymentPending,
    ];

    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::New,
        OrderStatus::Pending,
        OrderStatus::InProgress,
        OrderStatus::Done,
        OrderStatus::PaymentPending,
        OrderStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Pending => "PENDING",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Done => "DONE",
            OrderStatus::PaymentPending => "PAYMENT_PENDING",
            OrderStatus::Closed => "CLOSED",
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Entering this status is reported to the customer
    pub fn is_customer_visible(&self) -> bool {
        matches!(
            self,
            OrderStatus::InProgress | OrderStatus::Done | OrderStatus::PaymentPending
        )
    }

    /// Entering this status is reported to the admin channel
    pub fn notifies_admin(&self) -> bool {
        matches!(self, OrderStatus::InProgress | OrderStatus::Done)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

/// Payment options offered in the last funnel step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Click,
    Payme,
    Cash,
    Qr,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Click,
        PaymentMethod::Payme,
        PaymentMethod::Cash,
        PaymentMethod::Qr,
    ];

    /// Code used in callback tokens and storage
    pub fn code(&self) -> &'static str {
        match self {
            PaymentMethod::Click => "CLICK",
            PaymentMethod::Payme => "PAYME",
            PaymentMethod::Cash => "CASH",
            PaymentMethod::Qr => "QR",
        }
    }

    /// Label shown to customers and providers
    pub fn label(&self) -> &'static str {
        match self {
            PaymentMethod::Click => "CLICK",
            PaymentMethod::Payme => "PAYME",
            PaymentMethod::Cash => "Naqd",
            PaymentMethod::Qr => "QR",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.code().eq_ignore_ascii_case(code))
    }
}

/// The (user id, chat id) pair identifying a customer's conversation channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationKey {
    pub user_id: i64,
    pub chat_id: i64,
}

impl ConversationKey {
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self { user_id, chat_id }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.chat_id)
    }
}

/// Per-customer transaction record tracking conversation progress and fulfillment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub category_id: Option<i64>,
    pub service_id: Option<i64>,
    pub phone: Option<String>,
    pub address_text: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub comment: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub step: Step,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// A fresh order at the start of the funnel
    pub fn new(id: i64, key: ConversationKey, now: DateTime<Utc>) -> Self {
        Self {
            id,
            user_id: key.user_id,
            chat_id: key.chat_id,
            category_id: None,
            service_id: None,
            phone: None,
            address_text: None,
            location_lat: None,
            location_lng: None,
            comment: None,
            payment_method: None,
            step: Step::Category,
            status: OrderStatus::New,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.user_id, self.chat_id)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn location(&self) -> Option<GeoPoint> {
        match (self.location_lat, self.location_lng) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint {
                latitude,
                longitude,
            }),
            _ => None,
        }
    }

    /// Puts the order back at the first funnel step
    ///
    /// Only `step` and `status` change. Collected answers stay until the funnel
    /// overwrites them again.
    pub fn restart(&mut self) {
        self.step = Step::Category;
        self.status = OrderStatus::New;
    }
}

/// Chat message attached to an order, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub order_id: i64,
    pub from_admin: bool,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub order_id: i64,
    pub from_admin: bool,
    pub text: String,
}

/// Who recorded the analysed voice note
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewKind {
    /// Customer feedback about the job
    Client,
    /// Provider's report about the job
    Master,
}

impl ReviewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewKind::Client => "client",
            ReviewKind::Master => "master",
        }
    }
}

impl FromStr for ReviewKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" | "customer" => Ok(ReviewKind::Client),
            "master" | "provider" => Ok(ReviewKind::Master),
            other => Err(format!("unknown review kind: {other}")),
        }
    }
}

/// Persisted result of analysing a voice submission, immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub order_id: i64,
    pub audio_file: String,
    pub kind: ReviewKind,
    pub transcript: String,
    pub sentiment_score: f64,
    pub quality_score: f64,
    pub difficulty: i32,
    pub materials_used: String,
    pub extra_cost: f64,
    pub recommended: String,
    pub ai_summary: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a review
#[derive(Debug, Clone, PartialEq)]
pub struct NewReview {
    pub order_id: i64,
    pub audio_file: String,
    pub kind: ReviewKind,
    pub transcript: String,
    pub sentiment_score: f64,
    pub quality_score: f64,
    pub difficulty: i32,
    pub materials_used: String,
    pub extra_cost: f64,
    pub recommended: String,
    pub ai_summary: String,
}
