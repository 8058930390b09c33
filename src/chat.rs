//! Chat-completion backends.
//!
//! [`ChatModel`] takes a list of role-tagged messages and returns the
//! assistant's reply. [`OllamaChat`] implements it over Ollama's
//! non-streaming `/api/chat` endpoint.

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::Settings;
use crate::ollama::OllamaClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

pub trait ChatModel {
    fn model_name(&self) -> &str;

    /// Return the assistant reply to `messages`.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Sampling options forwarded to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f64,
    pub max_new_tokens: u32,
    pub n_ctx: u32,
    pub n_gpu_layers: u32,
}

impl GenerationOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            temperature: settings.temperature,
            max_new_tokens: settings.max_new_tokens,
            n_ctx: settings.n_ctx,
            n_gpu_layers: settings.n_gpu_layers,
        }
    }

    fn to_ollama(&self) -> serde_json::Value {
        let mut options = serde_json::json!({
            "temperature": self.temperature,
            "num_predict": self.max_new_tokens,
            "num_ctx": self.n_ctx,
        });
        // 0 leaves GPU placement to the server.
        if self.n_gpu_layers > 0 {
            options["num_gpu"] = serde_json::json!(self.n_gpu_layers);
        }
        options
    }
}

pub struct OllamaChat {
    client: OllamaClient,
    model: String,
    options: GenerationOptions,
}

impl OllamaChat {
    pub fn new(client: OllamaClient, model: &str, options: GenerationOptions) -> Self {
        Self {
            client,
            model: model.to_string(),
            options,
        }
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": self.options.to_ollama(),
        })
    }
}

impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        debug!(
            model = %self.model,
            url = %self.client.base_url(),
            messages = messages.len(),
            "chat request"
        );
        let json = self
            .client
            .post_json("/api/chat", &self.request_body(messages))?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn chat(n_gpu_layers: u32) -> OllamaChat {
        let client =
            OllamaClient::new("http://localhost:11434/", Duration::from_secs(1), 0).unwrap();
        OllamaChat::new(
            client,
            "gemma3:270m",
            GenerationOptions {
                temperature: 0.2,
                max_new_tokens: 64,
                n_ctx: 2048,
                n_gpu_layers,
            },
        )
    }

    #[test]
    fn request_body_carries_messages_and_options() {
        let body = chat(0).request_body(&[
            ChatMessage::system("be brief"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);
        assert_eq!(body["model"], "gemma3:270m");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["role"], "assistant");
        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["options"]["num_ctx"], 2048);
        assert!(body["options"].get("num_gpu").is_none());
    }

    #[test]
    fn gpu_layers_are_forwarded_when_set() {
        let body = chat(20).request_body(&[ChatMessage::user("hi")]);
        assert_eq!(body["options"]["num_gpu"], 20);
    }

    #[test]
    fn parses_message_content() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "Paris."}});
        assert_eq!(parse_chat_response(&json).unwrap(), "Paris.");
        assert!(parse_chat_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn client_trims_trailing_slash() {
        assert_eq!(chat(0).client.base_url(), "http://localhost:11434");
    }
}
