//! # Voice Analysis Module
//!
//! OpenAI-backed [`Analyzer`]: speech-to-text followed by a JSON-mode chat
//! completion that scores the transcript. The model reply is only ever parsed as
//! JSON into a typed struct and range-checked; anything else is `InvalidResponse`.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::AnalysisConfig;
use crate::errors::AnalysisError;
use crate::models::ReviewKind;
use crate::review::{Analysis, Analyzer};

const TRANSCRIPTION_MODEL: &str = "whisper-1";
const CHAT_MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f64 = 0.2;

const CLIENT_REVIEW_PROMPT: &str = "Quyidagi mijoz sharhini tahlil qil va faqat JSON qaytar.
Maydonlar: sentiment_score (0-100), quality_score (0-100), difficulty (har doim 0),
materials_used (matn), extra_cost (son, so'mda), recommended (matn), ai_summary (qisqa xulosa).";

const MASTER_REPORT_PROMPT: &str = "Quyidagi usta audio hisobotini tahlil qil va faqat JSON qaytar.
Maydonlar: sentiment_score (0-100), quality_score (0-100), difficulty (1-10),
materials_used (ishlatilgan materiallar), extra_cost (qo'shimcha xarajat, so'mda),
recommended (tavsiya), ai_summary (qisqa xulosa).";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// Scores the model must return, every field required
#[derive(Debug, Deserialize)]
struct ModelScores {
    sentiment_score: f64,
    quality_score: f64,
    difficulty: i32,
    materials_used: String,
    extra_cost: f64,
    recommended: String,
    ai_summary: String,
}

pub struct OpenAiAnalyzer {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    circuit_breaker: CircuitBreaker,
}

impl OpenAiAnalyzer {
    pub fn new(config: &AnalysisConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            circuit_breaker: CircuitBreaker::from_config(config),
        })
    }

    async fn transcribe(&self, api_key: &str, audio_path: &Path) -> Result<String, AnalysisError> {
        let bytes = tokio::fs::read(audio_path)
            .await
            .map_err(|e| AnalysisError::Transport(format!("cannot read {}: {e}", audio_path.display())))?;
        let file_name = audio_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.ogg".to_string());

        let form = Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response)?;

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;
        Ok(body.text.trim().to_string())
    }

    async fn score(
        &self,
        api_key: &str,
        transcript: &str,
        kind: ReviewKind,
    ) -> Result<ModelScores, AnalysisError> {
        let instructions = match kind {
            ReviewKind::Client => CLIENT_REVIEW_PROMPT,
            ReviewKind::Master => MASTER_REPORT_PROMPT,
        };
        let body = json!({
            "model": CHAT_MODEL,
            "temperature": TEMPERATURE,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": instructions },
                { "role": "user", "content": transcript },
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response)?;

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AnalysisError::InvalidResponse("no completion content".to_string()))?;

        parse_scores(&content)
    }

    async fn run(&self, api_key: &str, audio_path: &Path, kind: ReviewKind) -> Result<Analysis, AnalysisError> {
        let transcript = self.transcribe(api_key, audio_path).await?;
        if transcript.is_empty() {
            return Err(AnalysisError::EmptyTranscript);
        }
        debug!(chars = transcript.len(), "Transcription finished");

        let scores = self.score(api_key, &transcript, kind).await?;
        let analysis = Analysis {
            transcript,
            sentiment_score: scores.sentiment_score,
            quality_score: scores.quality_score,
            difficulty: scores.difficulty,
            materials_used: scores.materials_used,
            extra_cost: scores.extra_cost,
            recommended: scores.recommended,
            ai_summary: scores.ai_summary,
        };
        analysis.validate()?;
        Ok(analysis)
    }
}

#[async_trait]
impl Analyzer for OpenAiAnalyzer {
    async fn analyze(&self, audio_path: &Path, kind: ReviewKind) -> Result<Analysis, AnalysisError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AnalysisError::Disabled);
        };
        if self.circuit_breaker.is_open() {
            warn!("Analysis circuit breaker is open, skipping API call");
            return Err(AnalysisError::CircuitOpen);
        }

        match self.run(api_key, audio_path, kind).await {
            Ok(analysis) => {
                self.circuit_breaker.record_success();
                info!(kind = kind.as_str(), "Voice note analysed");
                Ok(analysis)
            }
            Err(e @ (AnalysisError::Transport(_) | AnalysisError::InvalidResponse(_))) => {
                self.circuit_breaker.record_failure();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

fn transport(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::Transport("request timed out".to_string())
    } else {
        AnalysisError::Transport(err.to_string())
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AnalysisError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(AnalysisError::Transport(format!("HTTP {status}")))
    }
}

/// Strip optional markdown fences around a JSON reply
fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let start = start + 7;
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    if let Some(start) = text.find("```") {
        let start = start + 3;
        let start = text[start..]
            .find('\n')
            .map(|i| start + i + 1)
            .unwrap_or(start);
        if let Some(end) = text[start..].find("```") {
            return text[start..start + end].trim();
        }
    }

    text
}

fn parse_scores(content: &str) -> Result<ModelScores, AnalysisError> {
    serde_json::from_str(extract_json(content))
        .map_err(|e| AnalysisError::InvalidResponse(format!("model output is not valid scores JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{"sentiment_score": 80, "quality_score": 75, "difficulty": 4,
        "materials_used": "kran, germetik", "extra_cost": 15000,
        "recommended": "ha", "ai_summary": "Ish sifatli bajarildi"}"#;

    #[test]
    fn test_extract_json_from_fences() {
        assert_eq!(extract_json("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(extract_json("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn test_parse_scores() {
        let scores = parse_scores(REPLY).unwrap();
        assert_eq!(scores.difficulty, 4);
        assert_eq!(scores.extra_cost, 15000.0);
        assert_eq!(scores.materials_used, "kran, germetik");

        let fenced = format!("```json\n{REPLY}\n```");
        assert!(parse_scores(&fenced).is_ok());
    }

    #[test]
    fn test_non_json_output_is_rejected() {
        let result = parse_scores("{'sentiment_score': 80, '__import__': 'os'}");
        assert!(matches!(result, Err(AnalysisError::InvalidResponse(_))));

        let result = parse_scores(r#"{"sentiment_score": 80}"#);
        assert!(matches!(result, Err(AnalysisError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_missing_key_disables_analysis() {
        let analyzer = OpenAiAnalyzer::new(&AnalysisConfig::default()).unwrap();
        let result = analyzer
            .analyze(Path::new("/nonexistent.ogg"), ReviewKind::Client)
            .await;
        assert_eq!(result, Err(AnalysisError::Disabled));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_transport_error() {
        let config = AnalysisConfig {
            api_key: Some("sk-test".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            ..AnalysisConfig::default()
        };
        let analyzer = OpenAiAnalyzer::new(&config).unwrap();
        let result = analyzer
            .analyze(Path::new("/nonexistent/voice.ogg"), ReviewKind::Master)
            .await;
        assert!(matches!(result, Err(AnalysisError::Transport(_))));
    }
}
