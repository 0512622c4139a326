use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::ClassifierError;
use crate::config::ClassifierConfig;

const HF_INFERENCE_URL: &str = "https://api-inference.huggingface.co/models";

/// Label and confidence returned by a text classifier.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifierOutput {
    pub label: String,
    pub score: f32,
}

#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassifierOutput, ClassifierError>;

    fn name(&self) -> &str;
}

/// Used when no classification model is configured; keyword rules decide alone.
pub struct DisabledClassifier;

#[async_trait]
impl TextClassifier for DisabledClassifier {
    async fn classify(&self, _text: &str) -> Result<ClassifierOutput, ClassifierError> {
        Err(ClassifierError::Disabled)
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Hugging Face Inference API text-classification pipeline.
pub struct HuggingFaceClassifier {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Nested(Vec<Vec<ClassifierOutput>>),
    Flat(Vec<ClassifierOutput>),
}

impl InferenceResponse {
    /// Highest scoring label, whichever shape the endpoint used.
    fn best(self) -> Option<ClassifierOutput> {
        let outputs = match self {
            InferenceResponse::Nested(nested) => nested.into_iter().flatten().collect(),
            InferenceResponse::Flat(flat) => flat,
        };
        outputs
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

impl HuggingFaceClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let url = config
            .api_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", HF_INFERENCE_URL, config.model));

        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ClassifierError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl TextClassifier for HuggingFaceClassifier {
    async fn classify(&self, text: &str) -> Result<ClassifierOutput, ClassifierError> {
        let mut request = self.client.post(&self.url).json(&InferenceRequest { inputs: text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClassifierError::Request(e.without_url().to_string()))?;

        if !response.status().is_success() {
            return Err(ClassifierError::Request(format!(
                "classifier responded with status code: {}",
                response.status()
            )));
        }

        let body: InferenceResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Response(e.to_string()))?;

        let best = body
            .best()
            .ok_or_else(|| ClassifierError::Response("empty classification result".to_string()))?;
        debug!("Classifier returned {} ({:.3})", best.label, best.score);
        Ok(best)
    }

    fn name(&self) -> &str {
        "huggingface"
    }
}

/// Builds the classifier selected by `classifier.backend`.
pub fn build_classifier(
    config: &ClassifierConfig,
) -> Result<Arc<dyn TextClassifier>, ClassifierError> {
    match config.backend.as_str() {
        "huggingface" => Ok(Arc::new(HuggingFaceClassifier::new(config)?)),
        "none" => Ok(Arc::new(DisabledClassifier)),
        other => Err(ClassifierError::Config(format!(
            "Unsupported classifier backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_best_label_from_nested_response() {
        let raw = r#"[[{"label":"LABEL_0","score":0.3},{"label":"LABEL_1","score":0.7}]]"#;
        let parsed: InferenceResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.best().unwrap().label, "LABEL_1");
    }

    #[test]
    fn accepts_flat_response() {
        let raw = r#"[{"label":"POSITIVE","score":0.9}]"#;
        let parsed: InferenceResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.best().unwrap().score, 0.9);
    }

    #[test]
    fn default_url_uses_model_name() {
        let config = ClassifierConfig {
            backend: "huggingface".to_string(),
            ..ClassifierConfig::default()
        };
        let classifier = HuggingFaceClassifier::new(&config).unwrap();
        assert_eq!(
            classifier.url,
            "https://api-inference.huggingface.co/models/distilbert-base-uncased"
        );
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = ClassifierConfig {
            backend: "magic".to_string(),
            ..ClassifierConfig::default()
        };
        assert!(matches!(
            build_classifier(&config),
            Err(ClassifierError::Config(_))
        ));
    }
}
