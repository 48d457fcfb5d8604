//! LLM-facing adapter for conversation analysis: extraction, summarization,
//! query suggestion. Never persists; callers route results through
//! [`crate::memory_store::MemoryStore`] themselves.

use crate::error::{EngineError, Result};
use crate::types::{ContextType, MemoryEntry};
use async_trait::async_trait;
use serde::Deserialize;
#[cfg(feature = "llm")]
use std::time::Duration;

/// One extracted memory candidate, pre-persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMemory {
    pub content: String,
    pub context_type: ContextType,
    pub importance: u8,
    pub tags: Vec<String>,
    pub summary: String,
}

#[async_trait]
pub trait ConversationAnalyzer: Send + Sync {
    async fn analyze_conversation(&self, text: &str) -> Result<Vec<ExtractedMemory>>;
    async fn summarize_session(&self, memories: &[MemoryEntry]) -> Result<String>;
    async fn enhance_query(&self, task: &str, query: Option<&str>) -> Result<String>;
}

/// Maps loose type labels an LLM might emit onto the canonical set.
fn normalize_context_type(raw: &str) -> ContextType {
    match raw.to_lowercase().as_str() {
        "directive" | "instruction" => ContextType::Directive,
        "information" | "info" => ContextType::Information,
        "heading" | "header" => ContextType::Heading,
        "decision" => ContextType::Decision,
        "code_pattern" | "pattern" => ContextType::CodePattern,
        "requirement" | "spec" => ContextType::Requirement,
        "error" | "bug" => ContextType::Error,
        "todo" | "task" => ContextType::Todo,
        "insight" => ContextType::Insight,
        "preference" => ContextType::Preference,
        _ => ContextType::Information,
    }
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    content: String,
    #[serde(default)]
    context_type: String,
    #[serde(default)]
    importance: Option<i64>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Parses one JSON object per line; malformed lines are dropped rather
/// than failing the whole batch.
fn parse_extraction_lines(raw: &str) -> Vec<ExtractedMemory> {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            serde_json::from_str::<RawExtraction>(line).ok()
        })
        .map(|r| {
            let importance = r.importance.unwrap_or(5).clamp(1, 10) as u8;
            let summary = r
                .summary
                .unwrap_or_else(|| r.content.chars().take(50).collect());
            let summary = summary.chars().take(50).collect();
            ExtractedMemory {
                content: r.content,
                context_type: normalize_context_type(&r.context_type),
                importance,
                tags: r.tags,
                summary,
            }
        })
        .collect()
}

/// OpenAI-compatible chat completions backend, mirroring the HTTP shape
/// used by [`crate::embedding::llm_keywords::OpenAiKeywordExtractor`].
#[cfg(feature = "llm")]
pub struct OpenAiConversationAnalyzer {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

#[cfg(feature = "llm")]
impl OpenAiConversationAnalyzer {
    pub fn new(api_key: Option<String>, base_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        }
    }

    fn require_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| EngineError::Misconfigured("llm_api_key is not set".into()))
    }

    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let api_key = self.require_key()?;
        let body = serde_json::json!({
            "model": "gpt-4o-mini",
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": 0.2,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        #[derive(Deserialize)]
        struct Choice {
            message: Message,
        }
        #[derive(Deserialize)]
        struct Message {
            content: String,
        }
        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Internal("empty LLM response".into()))
    }
}

#[cfg(feature = "llm")]
#[async_trait]
impl ConversationAnalyzer for OpenAiConversationAnalyzer {
    async fn analyze_conversation(&self, text: &str) -> Result<Vec<ExtractedMemory>> {
        self.require_key()?;
        let system = "Extract durable facts from this conversation. Respond with one JSON \
            object per line: {\"content\":..,\"context_type\":..,\"importance\":1-10,\
            \"tags\":[..],\"summary\":..}. No prose, no markdown fences.";
        let raw = self.chat(system, text).await?;
        Ok(parse_extraction_lines(&raw))
    }

    async fn summarize_session(&self, memories: &[MemoryEntry]) -> Result<String> {
        self.require_key()?;
        let joined = memories
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let system = "Summarize this session's memories in two to three sentences.";
        match self.chat(system, &joined).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                tracing::warn!(error = %err, "session summarization failed");
                Ok("Session summary unavailable".to_string())
            }
        }
    }

    async fn enhance_query(&self, task: &str, query: Option<&str>) -> Result<String> {
        self.require_key()?;
        Ok(match query {
            Some(q) => format!("{task} {q}"),
            None => task.to_string(),
        })
    }
}

/// No-credential stub: every call fails `Misconfigured` the moment it is
/// invoked, matching the contract for a deployment with no LLM configured.
pub struct UnconfiguredConversationAnalyzer;

#[async_trait]
impl ConversationAnalyzer for UnconfiguredConversationAnalyzer {
    async fn analyze_conversation(&self, _text: &str) -> Result<Vec<ExtractedMemory>> {
        Err(EngineError::Misconfigured("llm_api_key is not set".into()))
    }

    async fn summarize_session(&self, _memories: &[MemoryEntry]) -> Result<String> {
        Err(EngineError::Misconfigured("llm_api_key is not set".into()))
    }

    async fn enhance_query(&self, _task: &str, _query: Option<&str>) -> Result<String> {
        Err(EngineError::Misconfigured("llm_api_key is not set".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_extraction_lines_drops_malformed_and_normalizes_type() {
        let raw = "{\"content\":\"use snake_case\",\"context_type\":\"pattern\",\"importance\":12,\"tags\":[\"style\"]}\n\
                   not json at all\n\
                   {\"content\":\"remember the deadline\",\"context_type\":\"instruction\"}\n";
        let parsed = parse_extraction_lines(raw);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].context_type, ContextType::CodePattern);
        assert_eq!(parsed[0].importance, 10);
        assert_eq!(parsed[1].context_type, ContextType::Directive);
        assert_eq!(parsed[1].importance, 5);
    }

    #[test]
    fn unknown_type_label_falls_back_to_information() {
        assert_eq!(normalize_context_type("banana"), ContextType::Information);
    }

    #[tokio::test]
    async fn unconfigured_analyzer_fails_misconfigured() {
        let analyzer = UnconfiguredConversationAnalyzer;
        let err = analyzer.analyze_conversation("hi").await.unwrap_err();
        assert!(matches!(err, EngineError::Misconfigured(_)));
    }

    #[cfg(feature = "llm")]
    #[tokio::test]
    async fn enhance_query_concatenates_task_and_query() {
        let analyzer = OpenAiConversationAnalyzer::new(
            Some("test-key".into()),
            None,
            Duration::from_secs(1),
        );
        let out = analyzer.enhance_query("find bugs", Some("in parser")).await.unwrap();
        assert_eq!(out, "find bugs in parser");
    }
}
