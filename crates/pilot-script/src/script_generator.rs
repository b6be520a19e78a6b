use std::sync::Arc;

use pilot_ai::{CompletionRequest, LlmClient, Message};
use pilot_events::{EventSink, TestEvent};

use crate::script_contract::{parse_script_document, ScriptError};
use crate::script_store::{SavedScript, ScriptStore};

#[derive(Debug, Clone)]
/// Public struct `ScriptGeneratorConfig` used across pilot components.
pub struct ScriptGeneratorConfig {
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for ScriptGeneratorConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            max_output_tokens: 4_096,
            temperature: 0.2,
        }
    }
}

/// Turns a free-text scenario description into a persisted script artifact.
pub struct ScriptGenerator {
    client: Arc<dyn LlmClient>,
    store: ScriptStore,
    config: ScriptGeneratorConfig,
}

impl ScriptGenerator {
    pub fn new(client: Arc<dyn LlmClient>, store: ScriptStore, config: ScriptGeneratorConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    pub fn store(&self) -> &ScriptStore {
        &self.store
    }

    /// Generates, validates, and persists one script artifact.
    ///
    /// Nothing is persisted unless the model output survives the same
    /// structural validation that load-time enforces.
    pub async fn generate(
        &self,
        description: &str,
        sink: &dyn EventSink,
    ) -> Result<SavedScript, ScriptError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ScriptError::Generation(
                "test description is required".to_string(),
            ));
        }

        sink.emit(TestEvent::info(format!(
            "generating test script for: {description}"
        )));

        match self.generate_inner(description).await {
            Ok(saved) => {
                tracing::info!(artifact = %saved.name, "test script generated");
                sink.emit(TestEvent::success(format!(
                    "test script generated: {}",
                    saved.name
                )));
                Ok(saved)
            }
            Err(error) => {
                tracing::warn!(%error, "test script generation failed");
                sink.emit(TestEvent::error(format!(
                    "error generating test script: {error}"
                )));
                Err(error)
            }
        }
    }

    async fn generate_inner(&self, description: &str) -> Result<SavedScript, ScriptError> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message::system(generation_system_prompt(self.store.policy().max_steps)),
                Message::user(description),
            ],
            json_mode: true,
            max_tokens: Some(self.config.max_output_tokens),
            temperature: Some(self.config.temperature),
        };

        let response = self
            .client
            .complete(request)
            .await
            .map_err(|error| ScriptError::Generation(error.to_string()))?;

        let document = extract_script_document(&response.text);
        let script = parse_script_document(&document, self.store.policy())
            .map_err(|error| ScriptError::Generation(format!("model returned an invalid script: {error}")))?;

        self.store.save(&script)
    }
}

fn generation_system_prompt(max_steps: usize) -> String {
    format!(
        "You write browser automation test scripts as JSON.\n\
         Reply with exactly one JSON object, no prose and no markdown fences:\n\
         {{\"schema_version\": 1, \"description\": \"...\", \"steps\": [...]}}\n\
         Each step is an object with an \"op\" field. Supported ops:\n\
         - {{\"op\":\"navigate\",\"url\":\"https://...\"}} (http or https only)\n\
         - {{\"op\":\"wait_for\",\"selector\":\"css\",\"timeout_ms\":5000}}\n\
         - {{\"op\":\"click\",\"selector\":\"css\"}}\n\
         - {{\"op\":\"type\",\"selector\":\"css\",\"text\":\"...\"}}\n\
         - {{\"op\":\"screenshot\",\"label\":\"kebab-case-label\"}}\n\
         - {{\"op\":\"assert_title_contains\",\"expected\":\"...\"}}\n\
         - {{\"op\":\"assert_url_contains\",\"expected\":\"...\"}}\n\
         - {{\"op\":\"assert_text_contains\",\"selector\":\"css\",\"expected\":\"...\"}}\n\
         - {{\"op\":\"log\",\"kind\":\"info\",\"message\":\"...\"}}\n\
         Use only these ops; there is no other capability. Start with a log\n\
         step, include at least one assertion, and wait for dynamic content\n\
         with wait_for and an explicit timeout_ms instead of fixed delays.\n\
         Use at most {max_steps} steps."
    )
}

/// Salvages the JSON document from a reply an unreliable generator may have
/// wrapped in markdown fences and prose.
///
/// Takes the first fenced block wherever it sits; an unclosed fence keeps
/// everything after it. Fence-free replies pass through trimmed.
pub fn extract_script_document(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed.to_string();
    };

    let rest = &trimmed[open + 3..];
    // Drop an optional language tag on the fence line.
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("javascript"))
        .or_else(|| rest.strip_prefix("js"))
        .unwrap_or(rest);
    let body = match rest.find("```") {
        Some(close) => &rest[..close],
        None => rest,
    };
    body.trim().to_string()
}
