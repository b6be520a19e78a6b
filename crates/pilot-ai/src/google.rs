use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use async_trait::async_trait;

use crate::{
    retry::{new_request_id, parse_retry_after_ms, RetryPolicy},
    AiError, CompletionRequest, CompletionResponse, CompletionUsage, LlmClient, Message,
    MessageRole,
};

#[derive(Debug, Clone)]
/// Public struct `GoogleConfig` used across pilot components.
pub struct GoogleConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_budget_ms: u64,
    pub retry_jitter: bool,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            request_timeout_ms: 60_000,
            max_retries: 2,
            retry_budget_ms: 30_000,
            retry_jitter: true,
        }
    }
}

#[derive(Debug, Clone)]
/// Public struct `GoogleClient` used across pilot components.
pub struct GoogleClient {
    client: reqwest::Client,
    config: GoogleConfig,
}

impl GoogleClient {
    pub fn new(config: GoogleConfig) -> Result<Self, AiError> {
        if config.api_key.trim().is_empty() {
            return Err(AiError::MissingApiKey);
        }

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn generate_content_url(&self, model: &str) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.contains(":generateContent") {
            return base.replace("{model}", model);
        }

        format!("{base}/models/{model}:generateContent")
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            budget_ms: self.config.retry_budget_ms,
            jitter: self.config.retry_jitter,
        }
    }
}

#[async_trait]
impl LlmClient for GoogleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AiError> {
        let body = build_generate_content_body(&request);
        let url = self.generate_content_url(&request.model);
        let started = std::time::Instant::now();
        let policy = self.retry_policy();

        for attempt in 0..=policy.max_retries {
            let request_id = new_request_id();
            let response = self
                .client
                .post(&url)
                .header("x-pilot-request-id", request_id)
                .header("x-pilot-retry-attempt", attempt.to_string())
                .query(&[("key", self.config.api_key.as_str())])
                .json(&body)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let raw = response.text().await?;
                        return parse_generate_content_response(&raw);
                    }

                    let retry_after_ms = parse_retry_after_ms(response.headers());
                    let raw = response.text().await?;
                    if attempt < policy.max_retries
                        && RetryPolicy::retryable_status(status.as_u16())
                    {
                        let delay_ms = policy.delay_ms(attempt, retry_after_ms);
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        if policy.allows(elapsed_ms, delay_ms) {
                            sleep(std::time::Duration::from_millis(delay_ms)).await;
                            continue;
                        }
                    }

                    return Err(AiError::HttpStatus {
                        status: status.as_u16(),
                        body: raw,
                    });
                }
                Err(error) => {
                    if attempt < policy.max_retries
                        && RetryPolicy::retryable_transport_error(&error)
                    {
                        let delay_ms = policy.delay_ms(attempt, None);
                        let elapsed_ms = started.elapsed().as_millis() as u64;
                        if policy.allows(elapsed_ms, delay_ms) {
                            sleep(std::time::Duration::from_millis(delay_ms)).await;
                            continue;
                        }
                    }
                    return Err(AiError::Http(error));
                }
            }
        }

        Err(AiError::InvalidResponse(
            "request retry loop terminated unexpectedly".to_string(),
        ))
    }
}

fn build_generate_content_body(request: &CompletionRequest) -> Value {
    let system = extract_system_text(&request.messages);
    let contents = to_google_contents(&request.messages);

    let mut body = json!({
        "contents": contents,
    });

    if !system.is_empty() {
        body["systemInstruction"] = json!({
            "parts": [{ "text": system }],
        });
    }

    if request.temperature.is_some() || request.max_tokens.is_some() || request.json_mode {
        let mut generation_config = json!({});
        if request.json_mode {
            generation_config["responseMimeType"] = json!("application/json");
        }
        if let Some(temperature) = request.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        body["generationConfig"] = generation_config;
    }

    body
}

fn extract_system_text(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|message| message.role == MessageRole::System)
        .map(|message| message.content.as_str())
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn to_google_contents(messages: &[Message]) -> Value {
    Value::Array(
        messages
            .iter()
            .filter_map(|message| {
                let role = match message.role {
                    MessageRole::System => return None,
                    MessageRole::User => "user",
                    MessageRole::Assistant => "model",
                };
                if message.content.trim().is_empty() {
                    return None;
                }
                Some(json!({
                    "role": role,
                    "parts": [{ "text": message.content }],
                }))
            })
            .collect(),
    )
}

fn parse_generate_content_response(raw: &str) -> Result<CompletionResponse, AiError> {
    let parsed: GenerateContentResponse = serde_json::from_str(raw)?;
    let candidate = parsed
        .candidates
        .and_then(|mut candidates| candidates.drain(..).next())
        .ok_or_else(|| AiError::InvalidResponse("response contained no candidates".to_string()))?;

    let parts = candidate
        .content
        .and_then(|content| content.parts)
        .unwrap_or_default();
    let text = parts
        .into_iter()
        .filter_map(|part| part.text)
        .filter(|text| !text.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let usage = parsed
        .usage_metadata
        .map(|usage| CompletionUsage {
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            total_tokens: usage.total_token_count.unwrap_or(0),
        })
        .unwrap_or_default();

    Ok(CompletionResponse {
        text,
        finish_reason: candidate.finish_reason,
        usage,
    })
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<GenerateContentCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GenerateContentUsage>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentCandidate {
    content: Option<GenerateContentContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentContent {
    parts: Option<Vec<GenerateContentPart>>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::{build_generate_content_body, parse_generate_content_response, GoogleClient};
    use crate::{AiError, CompletionRequest, GoogleConfig, Message};

    fn sample_request() -> CompletionRequest {
        CompletionRequest {
            model: "gemini-2.5-flash".to_string(),
            messages: vec![
                Message::system("You generate browser test scripts"),
                Message::user("Test the login page"),
            ],
            json_mode: true,
            max_tokens: Some(2048),
            temperature: Some(0.2),
        }
    }

    #[test]
    fn unit_generate_content_body_includes_system_instruction_and_json_mode() {
        let body = build_generate_content_body(&sample_request());
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "You generate browser test scripts"
        );
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "Test the login page"
        );
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn unit_generate_content_body_skips_blank_and_system_messages_in_contents() {
        let mut request = sample_request();
        request.messages.push(Message::assistant("   "));
        let body = build_generate_content_body(&request);
        let contents = body["contents"].as_array().expect("contents array");
        assert_eq!(contents.len(), 1);
    }

    #[test]
    fn functional_parses_text_and_usage_from_response() {
        let raw = r#"{
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "{\"schema_version\":1,\"steps\":[]}"}
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 7,
                "totalTokenCount": 19
            }
        }"#;

        let response = parse_generate_content_response(raw).expect("response must parse");
        assert_eq!(response.text, "{\"schema_version\":1,\"steps\":[]}");
        assert_eq!(response.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(response.usage.total_tokens, 19);
    }

    #[test]
    fn regression_empty_candidates_is_invalid_response() {
        let error = parse_generate_content_response(r#"{"candidates": []}"#)
            .expect_err("no candidates should fail");
        assert!(error.to_string().contains("no candidates"));
    }

    #[test]
    fn unit_client_rejects_missing_api_key() {
        let error = GoogleClient::new(GoogleConfig::default()).expect_err("blank key should fail");
        assert!(matches!(error, AiError::MissingApiKey));
    }

    #[test]
    fn unit_generate_content_url_supports_template_bases() {
        let client = GoogleClient::new(GoogleConfig {
            api_key: "test-key".to_string(),
            api_base: "https://proxy.local/{model}:generateContent".to_string(),
            ..GoogleConfig::default()
        })
        .expect("client");
        assert_eq!(
            client.generate_content_url("gemini-2.5-flash"),
            "https://proxy.local/gemini-2.5-flash:generateContent"
        );

        let default_client = GoogleClient::new(GoogleConfig {
            api_key: "test-key".to_string(),
            ..GoogleConfig::default()
        })
        .expect("client");
        assert_eq!(
            default_client.generate_content_url("gemini-2.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}
