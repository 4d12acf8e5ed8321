//! # Usta Service Bot
//!
//! Ordering workflow for a home-services marketplace run over Telegram: a customer
//! bot walks clients through category, service, contact, location, comment and
//! payment; a provider bot drives order status; an admin console manages the
//! catalog, talks to customers and attaches analysed voice reviews.

pub mod admin;
pub mod analysis;
pub mod bot;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod dialogue;
pub mod errors;
pub mod localization;
pub mod locks;
pub mod models;
pub mod notifier;
pub mod review;
pub mod server;
pub mod store;
pub mod webhook;

pub use errors::{AnalysisError, OrderError};
pub use server::{build_router, AppState};
pub use store::{MemoryStore, OrderStore};
