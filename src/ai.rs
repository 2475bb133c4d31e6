//! AI invocation adapter.
//!
//! Wraps the upstream generative endpoint behind a call that never
//! fails: every upstream problem is absorbed into a fixed advisory
//! string so a triggering message always produces exactly one assistant
//! reply. No retries — one upstream call per triggering message.

use serde::{Deserialize, Serialize};

/// Advisory returned when the upstream model reports overload (HTTP 503).
pub const OVERLOAD_ADVISORY: &str =
    "AI service is temporarily unavailable. Please try again later.";

/// Advisory returned for every other upstream failure.
pub const FAILURE_ADVISORY: &str = "An error occurred while processing your request.";

/// Instruction forwarded with every prompt. Directs the model to answer
/// code requests as a JSON object with `fileTree` / `buildCommand` /
/// `startCommand` fields and no formatting fences, so consumers can lift
/// the envelope straight out of the reply.
pub const SYSTEM_INSTRUCTION: &str = r#"You are a senior full-stack developer with 10+ years of experience. You write clean, modular, and scalable code that follows industry best practices, handles edge cases gracefully, and avoids runtime errors. Keep answers short unless the user asks for detail.

When asked to produce code, respond with a single JSON object of the shape
{"text": "...", "fileTree": {"<filename>": {"content": "<file text>"}}, "buildCommand": {"mainItem": "...", "commands": ["..."]}, "startCommand": {"mainItem": "...", "commands": ["..."]}}
where every file appears once under its filename and content holds the literal file text. Never use backticks or code fences anywhere in the response. For conversational questions, respond with {"text": "..."} alone."#;

// ---------------------------------------------------------------------------
// Upstream request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GeneratePart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerateContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: GenerateContent,
    generation_config: GenerationConfig,
    contents: Vec<GenerateContent>,
}

#[derive(Debug, Deserialize)]
struct ReplyPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}

#[derive(Debug, Deserialize)]
struct ReplyCandidate {
    content: Option<ReplyContent>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ReplyCandidate>,
}

impl GenerateResponse {
    /// Text of the first candidate's first part, if any.
    fn into_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .and_then(|p| p.text)
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy (internal — absorbed before it reaches the caller)
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum GenerateFailure {
    /// Upstream signalled overload (HTTP 503).
    Overloaded,
    /// Anything else: transport error, non-2xx status, malformed body.
    Other(String),
}

impl GenerateFailure {
    fn advisory(&self) -> &'static str {
        match self {
            GenerateFailure::Overloaded => OVERLOAD_ADVISORY,
            GenerateFailure::Other(_) => FAILURE_ADVISORY,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the upstream generative endpoint.
///
/// Deliberately carries no request timeout: a slow upstream call delays
/// that one assistant reply and nothing else.
pub struct AiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        AiClient {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Generate a reply for `prompt`. Never raises: on success this is
    /// the model's raw text, otherwise one of the fixed advisories.
    pub async fn generate(&self, prompt: &str) -> String {
        match self.request(prompt).await {
            Ok(text) => text,
            Err(failure) => {
                tracing::warn!(?failure, "assistant call degraded");
                failure.advisory().to_string()
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<String, GenerateFailure> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );
        let body = build_request(prompt);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|err| GenerateFailure::Other(err.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(GenerateFailure::Overloaded);
        }
        if !status.is_success() {
            return Err(GenerateFailure::Other(format!("HTTP {}", status)));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|err| GenerateFailure::Other(err.to_string()))?;
        parsed
            .into_text()
            .ok_or_else(|| GenerateFailure::Other("empty candidate list".to_string()))
    }
}

/// Assemble the upstream request body: system instruction, JSON response
/// mime type, and the cleaned prompt as a single user turn.
fn build_request(prompt: &str) -> GenerateRequest {
    GenerateRequest {
        system_instruction: GenerateContent {
            role: None,
            parts: vec![GeneratePart {
                text: SYSTEM_INSTRUCTION.to_string(),
            }],
        },
        generation_config: GenerationConfig {
            response_mime_type: "application/json".to_string(),
        },
        contents: vec![GenerateContent {
            role: Some("user".to_string()),
            parts: vec![GeneratePart {
                text: format!("User: {}", prompt.trim()),
            }],
        }],
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- advisories ----------------------------------------------------------

    #[test]
    fn test_overload_maps_to_temporary_advisory() {
        assert_eq!(
            GenerateFailure::Overloaded.advisory(),
            "AI service is temporarily unavailable. Please try again later."
        );
    }

    #[test]
    fn test_other_failures_map_to_generic_advisory() {
        let failure = GenerateFailure::Other("HTTP 500".to_string());
        assert_eq!(
            failure.advisory(),
            "An error occurred while processing your request."
        );
    }

    #[test]
    fn test_advisories_are_distinct() {
        assert_ne!(OVERLOAD_ADVISORY, FAILURE_ADVISORY);
    }

    // -- request body shape --------------------------------------------------

    #[test]
    fn test_request_body_uses_camel_case_fields() {
        let body = build_request("make a server");
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("systemInstruction").is_some());
        assert!(json.get("generationConfig").is_some());
        assert_eq!(
            json["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_request_prompt_is_prefixed_and_trimmed() {
        let body = build_request("  make a server  ");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["contents"][0]["parts"][0]["text"],
            "User: make a server"
        );
        assert_eq!(json["contents"][0]["role"], "user");
    }

    #[test]
    fn test_request_carries_system_instruction() {
        let body = build_request("hello");
        let json = serde_json::to_value(&body).unwrap();
        let text = json["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap();
        assert!(text.contains("fileTree"));
        assert!(text.contains("Never use backticks"));
    }

    #[test]
    fn test_system_instruction_has_no_role() {
        let body = build_request("hello");
        let json = serde_json::to_value(&body).unwrap();
        assert!(json["systemInstruction"].get("role").is_none());
    }

    // -- response extraction -------------------------------------------------

    #[test]
    fn test_response_first_candidate_text() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hello there"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("hello there"));
    }

    #[test]
    fn test_response_empty_candidates_yields_none() {
        let raw = r#"{"candidates":[]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.into_text().is_none());
    }

    #[test]
    fn test_response_missing_candidates_yields_none() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.into_text().is_none());
    }

    #[test]
    fn test_response_candidate_without_content_yields_none() {
        let raw = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.into_text().is_none());
    }

    #[test]
    fn test_response_takes_first_of_multiple_candidates() {
        let raw = r#"{"candidates":[
            {"content":{"parts":[{"text":"first"}]}},
            {"content":{"parts":[{"text":"second"}]}}
        ]}"#;
        let parsed: GenerateResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("first"));
    }

    // -- generate degradation ------------------------------------------------

    #[tokio::test]
    async fn test_generate_unreachable_upstream_degrades() {
        // Nothing listens on port 1; the transport error must surface as
        // the generic advisory, not an Err.
        let client = AiClient::new("key", "test-model").with_base_url("http://127.0.0.1:1");
        let result = client.generate("do something").await;
        assert_eq!(result, FAILURE_ADVISORY);
    }
}
