use crate::config::LlmConfig;
use crate::llm::models::ChatMessage;
use crate::llm::{CompletionProvider, LlmError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

pub struct OllamaProvider {
    client: reqwest::Client,
    api_url: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Debug)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: Option<bool>,
}

#[derive(Deserialize, Debug)]
struct OllamaMessage {
    content: String,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_url = config
            .api_url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434/api/chat".to_string());

        let client = reqwest::Client::builder()
            .timeout(config.timeout() + std::time::Duration::from_secs(5))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            api_url,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// `/api/tags` on the same host lists local models and is cheap to call.
    fn tags_url(&self) -> String {
        match self.api_url.find("/api/") {
            Some(idx) => format!("{}/api/tags", &self.api_url[..idx]),
            None => format!("{}/api/tags", self.api_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl CompletionProvider for OllamaProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        info!("Sending request to Ollama with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let request = OllamaRequest {
            model: &self.model,
            messages,
            stream: false, // Explicitly disable streaming
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            // Try to get the error message from the response body
            let error_body = match response.text().await {
                Ok(body) => format!(" - Response body: {}", body),
                Err(_) => String::new(),
            };

            error!("Ollama API responded with status code: {}{}", status, error_body);
            return Err(LlmError::ResponseError(format!(
                "Ollama API responded with status code: {}{}",
                status, error_body
            )));
        }

        // Get the raw text response first for diagnostics
        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        debug!("Raw response from Ollama: {}", response_text);

        let ollama_response = serde_json::from_str::<OllamaResponse>(&response_text).map_err(|e| {
            error!("Failed to parse Ollama response: {} - Response was: {}", e, response_text);
            LlmError::ResponseError(format!("Failed to parse Ollama response: {}", e))
        })?;

        if ollama_response.done == Some(false) {
            debug!("Ollama reported an unfinished response");
        }

        ollama_response
            .message
            .map(|m| m.content)
            .ok_or_else(|| LlmError::ResponseError("Ollama response has no message".to_string()))
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let response = self
            .client
            .get(self.tags_url())
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LlmError::ResponseError(format!(
                "Ollama health check returned {}",
                response.status()
            )))
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_with_url(url: Option<&str>) -> OllamaProvider {
        let config = LlmConfig {
            backend: "ollama".to_string(),
            api_url: url.map(str::to_string),
            ..LlmConfig::default()
        };
        OllamaProvider::new(&config).unwrap()
    }

    #[test]
    fn defaults_to_local_chat_endpoint() {
        let provider = provider_with_url(None);
        assert_eq!(provider.api_url, "http://localhost:11434/api/chat");
        assert_eq!(provider.tags_url(), "http://localhost:11434/api/tags");
    }

    #[test]
    fn tags_url_follows_custom_host() {
        let provider = provider_with_url(Some("http://gpu-box:8080/api/chat"));
        assert_eq!(provider.tags_url(), "http://gpu-box:8080/api/tags");
    }

    #[test]
    fn parses_chat_response() {
        let raw = r#"{"model":"sqlcoder","message":{"role":"assistant","content":"SELECT 1"},"done":true}"#;
        let parsed: OllamaResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.message.unwrap().content, "SELECT 1");
    }
}
