//! # Review Attachment Module
//!
//! Turns an analysed voice note into a persisted [`Review`]. Reviews are only ever
//! appended; an analysis failure produces no review and is reported back as
//! [`ReviewOutcome::Skipped`].

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{AnalysisError, OrderError};
use crate::models::{NewReview, Review, ReviewKind};
use crate::store::OrderStore;

/// Scored analysis of one voice note
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Analysis {
    pub transcript: String,
    pub sentiment_score: f64,
    pub quality_score: f64,
    pub difficulty: i32,
    pub materials_used: String,
    pub extra_cost: f64,
    pub recommended: String,
    pub ai_summary: String,
}

impl Analysis {
    /// Check every score is inside its documented range
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let invalid = |msg: String| Err(AnalysisError::InvalidResponse(msg));

        if self.transcript.trim().is_empty() {
            return Err(AnalysisError::EmptyTranscript);
        }
        if !(0.0..=100.0).contains(&self.sentiment_score) {
            return invalid(format!("sentiment_score {} outside 0-100", self.sentiment_score));
        }
        if !(0.0..=100.0).contains(&self.quality_score) {
            return invalid(format!("quality_score {} outside 0-100", self.quality_score));
        }
        // 0 means not rated
        if !(0..=10).contains(&self.difficulty) {
            return invalid(format!("difficulty {} outside 0-10", self.difficulty));
        }
        if !self.extra_cost.is_finite() || self.extra_cost < 0.0 {
            return invalid(format!("extra_cost {} is negative", self.extra_cost));
        }
        Ok(())
    }
}

/// External transcription and scoring service
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, audio_path: &Path, kind: ReviewKind) -> Result<Analysis, AnalysisError>;
}

/// Used when no API key is configured
pub struct DisabledAnalyzer;

#[async_trait]
impl Analyzer for DisabledAnalyzer {
    async fn analyze(&self, _audio_path: &Path, _kind: ReviewKind) -> Result<Analysis, AnalysisError> {
        Err(AnalysisError::Disabled)
    }
}

/// What happened to an uploaded voice note
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome {
    Created(Review),
    /// Analysis failed, nothing was stored
    Skipped(AnalysisError),
}

pub struct ReviewRecorder {
    store: Arc<dyn OrderStore>,
    analyzer: Arc<dyn Analyzer>,
}

impl ReviewRecorder {
    pub fn new(store: Arc<dyn OrderStore>, analyzer: Arc<dyn Analyzer>) -> Self {
        Self { store, analyzer }
    }

    /// Analyse a stored voice note and attach the result to the order
    ///
    /// Only a missing order or a store failure is an error.
    pub async fn record(
        &self,
        order_id: i64,
        kind: ReviewKind,
        audio_path: &Path,
    ) -> Result<ReviewOutcome, OrderError> {
        if self.store.get_order(order_id).await?.is_none() {
            return Err(OrderError::NotFound(format!("order {order_id}")));
        }

        let analysis = match self.analyzer.analyze(audio_path, kind).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(order_id, kind = kind.as_str(), error = %e, "Voice analysis failed, no review stored");
                return Ok(ReviewOutcome::Skipped(e));
            }
        };
        if let Err(e) = analysis.validate() {
            warn!(order_id, kind = kind.as_str(), error = %e, "Voice analysis rejected, no review stored");
            return Ok(ReviewOutcome::Skipped(e));
        }

        let review = self
            .attach(order_id, kind, &audio_path.to_string_lossy(), analysis)
            .await?;
        Ok(ReviewOutcome::Created(review))
    }

    /// Persist a completed analysis as a new review
    pub async fn attach(
        &self,
        order_id: i64,
        kind: ReviewKind,
        audio_file: &str,
        analysis: Analysis,
    ) -> Result<Review, OrderError> {
        let review = self
            .store
            .create_review(&NewReview {
                order_id,
                audio_file: audio_file.to_string(),
                kind,
                transcript: analysis.transcript,
                sentiment_score: analysis.sentiment_score,
                quality_score: analysis.quality_score,
                difficulty: analysis.difficulty,
                materials_used: analysis.materials_used,
                extra_cost: analysis.extra_cost,
                recommended: analysis.recommended,
                ai_summary: analysis.ai_summary,
            })
            .await?;
        info!(order_id, review_id = review.id, kind = kind.as_str(), "Review attached");
        Ok(review)
    }
}
