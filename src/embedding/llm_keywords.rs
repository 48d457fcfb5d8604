//! LLM-backed keyword extraction, modeled on an OpenAI-compatible chat
//! completions call. Only active under the `llm` feature.

use super::KeywordExtractor;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiKeywordExtractor {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiKeywordExtractor {
    pub fn new(api_key: String, base_url: Option<String>, timeout_ms: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    async fn call(&self, text: &str) -> reqwest::Result<serde_json::Value> {
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{
                    "role": "user",
                    "content": format!(
                        "Extract 5 to 10 comma-separated keyword concepts from this text. \
                         Respond with only the comma-separated list.\n\n{text}"
                    ),
                }],
                "temperature": 0.0,
            }))
            .send()
            .await?
            .json()
            .await
    }
}

#[async_trait]
impl KeywordExtractor for OpenAiKeywordExtractor {
    async fn extract_keywords(&self, text: &str) -> Vec<String> {
        let response = match self.call(text).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "keyword extraction LLM call failed, using empty keyword set");
                return Vec::new();
            }
        };

        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default();

        content
            .split(',')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    }
}
