use async_trait::async_trait;

use super::{GenerationError, Generator, Prompt};
use crate::config::Settings;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

const DEFAULT_INSTRUCTIONS: &str = "Você é um escritor profissional de livros de não ficção.";

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

/// OpenAI Responses API backend.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiGenerator {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: responses_endpoint(base_url),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
        }
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| anyhow::anyhow!("{API_KEY_ENV} is required for the openai engine"))?;
        Ok(Self::new(
            &settings.openai_base_url,
            api_key,
            settings.openai_model.clone(),
            settings.openai_temperature,
        ))
    }

    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        let format = if prompt.json { "json_object" } else { "text" };
        let mut body = serde_json::json!({
            "model": self.model,
            "instructions": prompt.system.as_deref().unwrap_or(DEFAULT_INSTRUCTIONS),
            "input": prompt.user,
            "text": { "format": { "type": format } },
            "store": false,
        });

        // GPT-5 models reject sampling params like `temperature`.
        if !self.model.starts_with("gpt-5")
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert("temperature".to_owned(), serde_json::json!(self.temperature));
        }
        body
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate_text(&self, prompt: &Prompt) -> Result<String, GenerationError> {
        let body = self.request_body(prompt);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| GenerationError::Provider(format!("POST {}: {err}", self.endpoint)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| GenerationError::Provider(format!("read response body: {err}")))?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            tracing::warn!(task = %prompt.task, %status, "OpenAI request failed");
            return Err(GenerationError::Provider(format!(
                "OpenAI API error ({status}): {message}"
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| GenerationError::Malformed(format!("parse OpenAI response: {err}")))?;
        extract_output_text(&value)
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> Result<String, GenerationError> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GenerationError::Malformed("missing `output` array in response".to_owned()))?;

    let text: String = output
        .iter()
        .filter(|item| item.get("type").and_then(|v| v.as_str()) == Some("message"))
        .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
        .flatten()
        .filter(|part| part.get("type").and_then(|v| v.as_str()) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect();

    if text.trim().is_empty() {
        return Err(GenerationError::Empty);
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::generation::Task;

    #[test]
    fn endpoint_trims_trailing_slash() {
        assert_eq!(
            responses_endpoint("http://localhost:1/v1/"),
            "http://localhost:1/v1/responses"
        );
    }

    #[test]
    fn json_prompts_request_json_format() {
        let generator = OpenAiGenerator::new("http://x/v1", "k", "gpt-4o-mini", 0.2);
        let body = generator.request_body(&Prompt::new(Task::Marketing, "m").expect_json());
        assert_eq!(body.pointer("/text/format/type"), Some(&json!("json_object")));
        assert!(body.get("temperature").is_some());

        let generator = OpenAiGenerator::new("http://x/v1", "k", "gpt-5-mini", 0.2);
        let body = generator.request_body(&Prompt::new(Task::Chapter, "c").with_system("s"));
        assert_eq!(body["instructions"], "s");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn output_text_is_concatenated_across_parts() {
        let value = json!({
            "output": [
                {"type": "reasoning"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Olá, "},
                    {"type": "output_text", "text": "mundo"}
                ]}
            ]
        });
        assert_eq!(extract_output_text(&value).unwrap(), "Olá, mundo");
        assert_eq!(
            extract_output_text(&json!({"output": []})).unwrap_err(),
            GenerationError::Empty
        );
    }

    #[test]
    fn error_message_is_pulled_from_error_body() {
        let raw = r#"{"error": {"message": "rate limited", "type": "requests"}}"#;
        assert_eq!(parse_error_message(raw).as_deref(), Some("rate limited"));
        assert_eq!(parse_error_message("<html>"), None);
    }
}
