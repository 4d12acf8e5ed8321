//! Callback tokens carried by inline buttons

use regex::Regex;
use std::sync::LazyLock;

use crate::models::PaymentMethod;

static CUSTOMER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(cat|srv|pay)_([A-Za-z0-9]+)$").expect("valid customer token pattern"));
static PROVIDER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:ord_(\d+)|st_(\d+)_(start|done))$").expect("valid provider token pattern")
});

/// Button pressed in the customer bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerButton {
    Category(i64),
    Service(i64),
    Payment(PaymentMethod),
}

impl CustomerButton {
    pub fn parse(data: &str) -> Option<Self> {
        let captures = CUSTOMER_TOKEN.captures(data.trim())?;
        let value = captures.get(2)?.as_str();
        match captures.get(1)?.as_str() {
            "cat" => value.parse().ok().map(CustomerButton::Category),
            "srv" => value.parse().ok().map(CustomerButton::Service),
            "pay" => PaymentMethod::from_code(value).map(CustomerButton::Payment),
            _ => None,
        }
    }

    pub fn token(&self) -> String {
        match self {
            CustomerButton::Category(id) => format!("cat_{id}"),
            CustomerButton::Service(id) => format!("srv_{id}"),
            CustomerButton::Payment(method) => format!("pay_{}", method.code()),
        }
    }
}

/// What a provider asks for on one order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderAction {
    /// Begin work: PENDING -> IN_PROGRESS
    Start,
    /// Finish work: IN_PROGRESS -> DONE
    Finish,
}

/// Button pressed in the provider bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderButton {
    ShowOrder(i64),
    Status(i64, ProviderAction),
}

impl ProviderButton {
    pub fn parse(data: &str) -> Option<Self> {
        let captures = PROVIDER_TOKEN.captures(data.trim())?;
        if let Some(id) = captures.get(1) {
            return id.as_str().parse().ok().map(ProviderButton::ShowOrder);
        }
        let order_id = captures.get(2)?.as_str().parse().ok()?;
        let action = match captures.get(3)?.as_str() {
            "start" => ProviderAction::Start,
            _ => ProviderAction::Finish,
        };
        Some(ProviderButton::Status(order_id, action))
    }

    pub fn token(&self) -> String {
        match self {
            ProviderButton::ShowOrder(id) => format!("ord_{id}"),
            ProviderButton::Status(id, ProviderAction::Start) => format!("st_{id}_start"),
            ProviderButton::Status(id, ProviderAction::Finish) => format!("st_{id}_done"),
        }
    }
}
