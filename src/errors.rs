//! # Error Types Module
//!
//! Errors raised by the order workflow and by the voice-analysis pipeline.

use crate::models::OrderStatus;

/// Errors raised while acting on orders and the catalog
#[derive(Debug)]
pub enum OrderError {
    /// Referenced category, service or order does not exist
    NotFound(String),
    /// Status change not reachable from the current status
    InvalidTransition { from: OrderStatus, to: OrderStatus },
    /// Change would break a store invariant (active order uniqueness, references)
    Conflict(String),
    /// Rejected input such as an empty admin message
    Invalid(String),
    /// Persistence failure, propagated to the request boundary
    Store(anyhow::Error),
}

impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderError::NotFound(what) => write!(f, "Not found: {what}"),
            OrderError::InvalidTransition { from, to } => {
                write!(f, "Invalid transition: {from} -> {to}")
            }
            OrderError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            OrderError::Invalid(msg) => write!(f, "Invalid input: {msg}"),
            OrderError::Store(err) => write!(f, "Store error: {err:#}"),
        }
    }
}

impl std::error::Error for OrderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrderError::Store(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for OrderError {
    fn from(err: anyhow::Error) -> Self {
        OrderError::Store(err)
    }
}

/// Errors raised by the external transcription and scoring service
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisError {
    /// No API key configured
    Disabled,
    /// Too many recent failures, calls are suspended
    CircuitOpen,
    /// Network, HTTP status or timeout failures
    Transport(String),
    /// Transcription produced no text
    EmptyTranscript,
    /// Model output failed JSON parsing or range validation
    InvalidResponse(String),
}

impl std::fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisError::Disabled => write!(f, "Analysis disabled: no API key configured"),
            AnalysisError::CircuitOpen => write!(f, "Analysis suspended after repeated failures"),
            AnalysisError::Transport(msg) => write!(f, "Transport error: {msg}"),
            AnalysisError::EmptyTranscript => write!(f, "Transcription returned no text"),
            AnalysisError::InvalidResponse(msg) => write!(f, "Invalid analysis response: {msg}"),
        }
    }
}

impl std::error::Error for AnalysisError {}
