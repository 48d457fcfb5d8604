//! Runtime configuration, layered compiled-in defaults < `ENGINE_*` env vars
//! < explicit constructor arguments.

use crate::types::WorkspaceMode;
use serde::{Deserialize, Serialize};

/// Recognized engine configuration, with every option carrying a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend_url: String,
    pub workspace_path: String,
    pub workspace_mode: WorkspaceMode,
    pub llm_api_key: Option<String>,
    pub embedding_vector_size: usize,

    pub log_level: String,
    pub log_format: LogFormat,

    pub backend_connect_timeout_ms: u64,
    pub backend_retry_base_ms: u64,
    pub backend_retry_max_ms: u64,
    pub backend_retry_attempts: u32,

    pub llm_request_timeout_ms: u64,
    pub llm_base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Pretty
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "redis://127.0.0.1:6379".to_string(),
            workspace_path: std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            workspace_mode: WorkspaceMode::Isolated,
            llm_api_key: None,
            embedding_vector_size: crate::types::EMBEDDING_VECTOR_SIZE,

            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,

            backend_connect_timeout_ms: 5_000,
            backend_retry_base_ms: 50,
            backend_retry_max_ms: 2_000,
            backend_retry_attempts: 3,

            llm_request_timeout_ms: 10_000,
            llm_base_url: None,
        }
    }
}

impl Config {
    /// Overlay values from `ENGINE_*` environment variables onto the
    /// compiled-in defaults. Unset variables leave the existing value.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("ENGINE_BACKEND_URL") {
            cfg.backend_url = v;
        }
        if let Ok(v) = std::env::var("ENGINE_WORKSPACE_PATH") {
            cfg.workspace_path = v;
        }
        if let Ok(v) = std::env::var("ENGINE_WORKSPACE_MODE") {
            if let Ok(mode) = v.parse() {
                cfg.workspace_mode = mode;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_LLM_API_KEY") {
            cfg.llm_api_key = Some(v);
        }
        if let Ok(v) = std::env::var("ENGINE_LOG") {
            cfg.log_level = v;
        }
        if let Ok(v) = std::env::var("ENGINE_LOG_FORMAT") {
            if v.eq_ignore_ascii_case("json") {
                cfg.log_format = LogFormat::Json;
            }
        }
        if let Ok(v) = std::env::var("ENGINE_LLM_BASE_URL") {
            cfg.llm_base_url = Some(v);
        }
        cfg
    }
}
