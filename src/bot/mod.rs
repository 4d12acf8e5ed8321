//! Bot module for handling the customer and provider conversations
//!
//! This module is split into several submodules:
//! - `conversation`: Customer funnel state machine
//! - `lifecycle`: Provider and admin status transitions
//! - `provider`: Provider bot commands and buttons
//! - `callback_data`: Inline button tokens
//! - `ui_builder`: Creates keyboards and formats messages

pub mod callback_data;
pub mod conversation;
pub mod lifecycle;
pub mod provider;
pub mod ui_builder;

pub use callback_data::{CustomerButton, ProviderAction, ProviderButton};
pub use conversation::{ConversationEngine, CustomerEvent};
pub use lifecycle::{LifecycleController, StatusChange};
pub use provider::{ProviderDesk, ProviderEvent};
