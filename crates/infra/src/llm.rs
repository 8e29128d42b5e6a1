use std::time::Duration;

use cornerstone_domain::DomainResult;
use cornerstone_domain::error::DomainError;
use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::models::{ChatReply, EmbeddingModel, TextModel, VisionModel};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::AppConfig;
use crate::http::{
    HttpError, RetrySettings, build_client, endpoint_url, error_for_status, send_with_retry,
};

const CHAT_PATH: &str = "chat/completions";
const EMBEDDINGS_PATH: &str = "embeddings";

/// Vendor-private request fields, keyed by endpoint path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VendorProfile {
    pub thinking_mode: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<u32>,
}

impl VendorProfile {
    pub fn from_config(config: &AppConfig) -> Self {
        let non_empty = |value: &str| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        };
        Self {
            thinking_mode: non_empty(&config.llm_thinking_mode),
            embedding_model: non_empty(&config.llm_embedding_model),
            embedding_dimensions: (config.llm_embedding_dimensions > 0)
                .then_some(config.llm_embedding_dimensions),
        }
    }

    pub fn rewrite(&self, url: &str, body: &mut Value) {
        let Some(object) = body.as_object_mut() else {
            return;
        };
        let path = url.split('?').next().unwrap_or_default();
        if path.ends_with("/chat/completions") {
            if let Some(mode) = &self.thinking_mode {
                object.insert("thinking".to_string(), json!({ "type": mode }));
            }
        } else if path.ends_with("/embeddings") {
            if let Some(model) = &self.embedding_model {
                object.insert("model".to_string(), json!(model));
            }
            if let Some(dimensions) = self.embedding_dimensions {
                object.insert("dimensions".to_string(), json!(dimensions));
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

fn parse_chat(body: Value) -> DomainResult<ChatReply> {
    let response: ChatResponse = serde_json::from_value(body)
        .map_err(|err| DomainError::Upstream(format!("invalid chat response: {err}")))?;
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| DomainError::Upstream("chat response had no choices".to_string()))?;
    Ok(ChatReply {
        content: choice.message.content.unwrap_or_default(),
        finish_reason: choice.finish_reason,
    })
}

fn parse_embedding(body: Value) -> DomainResult<Vec<f32>> {
    let response: EmbeddingResponse = serde_json::from_value(body)
        .map_err(|err| DomainError::Upstream(format!("invalid embedding response: {err}")))?;
    response
        .data
        .into_iter()
        .next()
        .map(|row| row.embedding)
        .ok_or_else(|| DomainError::Upstream("embedding response was empty".to_string()))
}

fn vision_content(prompt: &str, image_urls: &[String]) -> Value {
    let mut parts = vec![json!({ "type": "text", "text": prompt })];
    parts.extend(
        image_urls
            .iter()
            .map(|url| json!({ "type": "image_url", "image_url": { "url": url } })),
    );
    Value::Array(parts)
}

/// OpenAI-compatible client serving the text, vision and embedding ports.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    text_model: String,
    vision_model: String,
    vendor: VendorProfile,
    retry: RetrySettings,
}

impl OpenAiClient {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            http: build_client(Duration::from_millis(config.llm_timeout_ms.max(1))),
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key: config.llm_api_key.trim().to_string(),
            text_model: config.llm_text_model.clone(),
            vision_model: config.llm_vision_model.clone(),
            vendor: VendorProfile::from_config(config),
            retry: RetrySettings::default(),
        }
    }

    async fn post_json(&self, path: &str, mut body: Value) -> DomainResult<Value> {
        let url = endpoint_url(&self.base_url, path);
        self.vendor.rewrite(&url, &mut body);
        let response = send_with_retry(self.retry, || {
            let request = self.http.post(&url).json(&body);
            if self.api_key.is_empty() {
                request
            } else {
                request.bearer_auth(&self.api_key)
            }
        })
        .await?;
        let value = error_for_status(response)
            .await?
            .json::<Value>()
            .await
            .map_err(|err| HttpError::InvalidResponse(err.to_string()))?;
        Ok(value)
    }

    async fn chat(&self, model: &str, system: &str, user: Value) -> DomainResult<ChatReply> {
        let body = json!({
            "model": model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });
        let reply = parse_chat(self.post_json(CHAT_PATH, body).await?)?;
        tracing::debug!(
            model,
            finish_reason = reply.finish_reason.as_deref().unwrap_or("none"),
            "chat completion returned"
        );
        Ok(reply)
    }
}

impl TextModel for OpenAiClient {
    fn complete(&self, system: &str, user: &str) -> BoxFuture<'_, DomainResult<ChatReply>> {
        let system = system.to_string();
        let user = json!(user);
        Box::pin(async move { self.chat(&self.text_model, &system, user).await })
    }
}

impl VisionModel for OpenAiClient {
    fn complete_with_images(
        &self,
        system: &str,
        prompt: &str,
        image_urls: &[String],
    ) -> BoxFuture<'_, DomainResult<ChatReply>> {
        let system = system.to_string();
        let content = vision_content(prompt, image_urls);
        Box::pin(async move { self.chat(&self.vision_model, &system, content).await })
    }
}

impl EmbeddingModel for OpenAiClient {
    fn embed(&self, text: &str) -> BoxFuture<'_, DomainResult<Vec<f32>>> {
        let body = json!({ "input": text, "encoding_format": "float" });
        Box::pin(async move { parse_embedding(self.post_json(EMBEDDINGS_PATH, body).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> VendorProfile {
        VendorProfile {
            thinking_mode: Some("disabled".into()),
            embedding_model: Some("embed-v3".into()),
            embedding_dimensions: Some(1024),
        }
    }

    #[test]
    fn chat_requests_get_the_thinking_switch() {
        let mut body = json!({"model": "m", "messages": []});
        profile().rewrite("http://llm/v1/chat/completions", &mut body);
        assert_eq!(body["thinking"], json!({"type": "disabled"}));
        assert!(body.get("dimensions").is_none());
    }

    #[test]
    fn embedding_requests_get_model_and_dimensions() {
        let mut body = json!({"input": "hello"});
        profile().rewrite("http://llm/v1/embeddings?trace=1", &mut body);
        assert_eq!(body["model"], json!("embed-v3"));
        assert_eq!(body["dimensions"], json!(1024));
        assert!(body.get("thinking").is_none());
    }

    #[test]
    fn other_paths_are_left_alone() {
        let mut body = json!({"input": "hello"});
        profile().rewrite("http://llm/v1/models", &mut body);
        assert_eq!(body, json!({"input": "hello"}));
    }

    #[test]
    fn chat_reply_keeps_the_finish_reason() {
        let reply = parse_chat(json!({
            "choices": [{
                "message": {"role": "assistant", "content": "{\"status\":\"1\"}"},
                "finish_reason": "sensitive"
            }]
        }))
        .unwrap();
        assert_eq!(reply.content, "{\"status\":\"1\"}");
        assert_eq!(reply.finish_reason.as_deref(), Some("sensitive"));
        assert!(parse_chat(json!({"choices": []})).is_err());
    }

    #[test]
    fn vision_prompt_lists_every_image_after_the_text() {
        let content = vision_content("check", &["a.jpg".into(), "b.jpg".into()]);
        assert_eq!(content[0]["type"], json!("text"));
        assert_eq!(content[2]["image_url"]["url"], json!("b.jpg"));
    }

    #[test]
    fn embedding_reads_the_first_vector() {
        let vector = parse_embedding(json!({"data": [{"embedding": [0.5, 0.25]}]})).unwrap();
        assert_eq!(vector, vec![0.5, 0.25]);
    }
}
