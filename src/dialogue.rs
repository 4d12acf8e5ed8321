//! Order conversation steps and input normalization.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted length of a free-text answer (comment, address, phone)
pub const MAX_FREE_TEXT_LEN: usize = 1000;

/// Position of an order inside the customer conversation funnel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Category,
    Service,
    Phone,
    Location,
    Comment,
    Payment,
    Done,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Category => "category",
            Step::Service => "service",
            Step::Phone => "phone",
            Step::Location => "location",
            Step::Comment => "comment",
            Step::Payment => "payment",
            Step::Done => "done",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" => Ok(Step::Category),
            "service" => Ok(Step::Service),
            "phone" => Ok(Step::Phone),
            "location" => Ok(Step::Location),
            "comment" => Ok(Step::Comment),
            "payment" => Ok(Step::Payment),
            "done" => Ok(Step::Done),
            other => Err(format!("unknown step: {other}")),
        }
    }
}

/// A value the customer supplied either through a structured share button
/// or by typing it.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue<T> {
    Structured(T),
    FreeText(String),
}

/// Coordinates shared through the location button
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Validates a free-text answer
pub fn validate_free_text(input: &str) -> Result<String, &'static str> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.chars().count() > MAX_FREE_TEXT_LEN {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}
