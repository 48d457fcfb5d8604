//! Recursive execution chain coordinator: strategy selection, subtask
//! lifecycle, context snippet extraction, result aggregation.

use crate::error::{EngineError, Result};
use crate::keys::{self, Scope};
use crate::storage::{Pipeline, StorageClient};
use crate::types::{
    ChainStatus, ExecutionContext, MergedResults, Strategy, Subtask, SubtaskStatus,
};
use regex::RegexBuilder;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_AVG_TOKENS: f64 = 4000.0;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    format!("{:013}{}", now_ms(), uuid::Uuid::new_v4().simple())
}

/// Count of subtasks per status plus a remaining-token estimate, returned
/// by [`RLMCoordinator::chain_summary`].
#[derive(Debug, Clone)]
pub struct ChainSummary {
    pub pending: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub failed: u32,
    pub estimated_remaining_tokens: u64,
}

pub struct RLMCoordinator {
    storage: Arc<dyn StorageClient>,
    workspace_id: String,
}

impl RLMCoordinator {
    pub fn new(storage: Arc<dyn StorageClient>, workspace_id: String) -> Self {
        Self {
            storage,
            workspace_id,
        }
    }

    fn scope(&self) -> Scope<'_> {
        Scope::Workspace(&self.workspace_id)
    }

    fn select_strategy(task: &str, estimated_tokens: u64) -> Strategy {
        let lower = task.to_lowercase();
        if ["find", "search", "extract", "error", "warning"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            Strategy::Filter
        } else if ["summarize", "combine", "aggregate", "overview"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            Strategy::Aggregate
        } else if estimated_tokens > 50_000 || lower.contains("analyze") {
            Strategy::Recursive
        } else {
            Strategy::Chunk
        }
    }

    /// Create a new execution chain; context is stored out-of-band as a
    /// plain string value so subtasks can request slices of it later.
    pub async fn create_chain(
        &self,
        task: String,
        context: String,
        parent_chain_id: Option<String>,
    ) -> Result<ExecutionContext> {
        let estimated_tokens = ((context.len() as f64) / 4.0).ceil() as u64;
        let strategy = Self::select_strategy(&task, estimated_tokens);
        let depth = match &parent_chain_id {
            Some(parent_id) => {
                let parent = self
                    .get_chain(parent_id)
                    .await?
                    .ok_or_else(|| EngineError::NotFound(format!("chain {parent_id}")))?;
                parent.depth + 1
            }
            None => 0,
        };
        if depth > 3 {
            return Err(EngineError::InvalidInput("max_depth exceeded (>3)".into()));
        }

        let now = now_ms();
        let chain = ExecutionContext {
            chain_id: new_id(),
            parent_chain_id,
            depth,
            status: ChainStatus::Active,
            original_task: task,
            context_ref: format!("ctx:{}", uuid::Uuid::new_v4()),
            strategy,
            estimated_tokens,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
        };

        let scope = self.scope();
        let mut pipeline = Pipeline::new();
        pipeline.hset(keys::rlm_chain(scope, &chain.chain_id), Self::hash_of(&chain));
        pipeline.set(keys::rlm_context(scope, &chain.chain_id), context);
        pipeline.sadd(keys::rlm_executions(scope), vec![chain.chain_id.clone()]);
        pipeline.sadd(keys::rlm_executions_active(scope), vec![chain.chain_id.clone()]);
        self.storage.exec(pipeline).await?;

        Ok(chain)
    }

    fn hash_of(chain: &ExecutionContext) -> Vec<(String, String)> {
        vec![
            ("chain_id".into(), chain.chain_id.clone()),
            (
                "parent_chain_id".into(),
                chain.parent_chain_id.clone().unwrap_or_default(),
            ),
            ("depth".into(), chain.depth.to_string()),
            (
                "status".into(),
                match chain.status {
                    ChainStatus::Active => "active",
                    ChainStatus::Completed => "completed",
                    ChainStatus::Failed => "failed",
                }
                .to_string(),
            ),
            ("original_task".into(), chain.original_task.clone()),
            ("context_ref".into(), chain.context_ref.clone()),
            ("strategy".into(), chain.strategy.as_str().to_string()),
            ("estimated_tokens".into(), chain.estimated_tokens.to_string()),
            ("created_at".into(), chain.created_at.to_string()),
            ("updated_at".into(), chain.updated_at.to_string()),
            (
                "completed_at".into(),
                chain.completed_at.map(|v| v.to_string()).unwrap_or_default(),
            ),
            (
                "error_message".into(),
                chain.error_message.clone().unwrap_or_default(),
            ),
        ]
    }

    fn chain_from_hash(fields: &HashMap<String, String>) -> Result<ExecutionContext> {
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        Ok(ExecutionContext {
            chain_id: get("chain_id"),
            parent_chain_id: fields
                .get("parent_chain_id")
                .cloned()
                .filter(|s| !s.is_empty()),
            depth: get("depth").parse().unwrap_or(0),
            status: match get("status").as_str() {
                "completed" => ChainStatus::Completed,
                "failed" => ChainStatus::Failed,
                _ => ChainStatus::Active,
            },
            original_task: get("original_task"),
            context_ref: get("context_ref"),
            strategy: match get("strategy").as_str() {
                "filter" => Strategy::Filter,
                "recursive" => Strategy::Recursive,
                "aggregate" => Strategy::Aggregate,
                _ => Strategy::Chunk,
            },
            estimated_tokens: get("estimated_tokens").parse().unwrap_or(0),
            created_at: get("created_at").parse().unwrap_or(0),
            updated_at: get("updated_at").parse().unwrap_or(0),
            completed_at: fields.get("completed_at").and_then(|v| v.parse().ok()),
            error_message: fields.get("error_message").cloned().filter(|s| !s.is_empty()),
        })
    }

    pub async fn get_chain(&self, chain_id: &str) -> Result<Option<ExecutionContext>> {
        match self.storage.hgetall(&keys::rlm_chain(self.scope(), chain_id)).await? {
            Some(fields) if !fields.is_empty() => Ok(Some(Self::chain_from_hash(&fields)?)),
            _ => Ok(None),
        }
    }

    pub async fn list_chains(&self) -> Result<Vec<ExecutionContext>> {
        let ids = self.storage.smembers(&keys::rlm_executions(self.scope())).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chain) = self.get_chain(&id).await? {
                out.push(chain);
            }
        }
        Ok(out)
    }

    /// Insert an ordered list of subtasks; position becomes the zset score.
    pub async fn decompose(
        &self,
        chain_id: &str,
        subtasks: Vec<(String, Option<String>)>,
    ) -> Result<Vec<Subtask>> {
        self.get_chain(chain_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("chain {chain_id}")))?;

        let scope = self.scope();
        let mut out = Vec::with_capacity(subtasks.len());
        let mut pipeline = Pipeline::new();
        for (order, (description, query)) in subtasks.into_iter().enumerate() {
            let subtask = Subtask {
                id: new_id(),
                chain_id: chain_id.to_string(),
                order: order as u32,
                description,
                status: SubtaskStatus::Pending,
                query,
                result: None,
                memory_ids: Vec::new(),
                tokens_used: None,
                created_at: now_ms(),
                completed_at: None,
            };
            pipeline.hset(
                keys::rlm_subtask(scope, chain_id, &subtask.id),
                Self::subtask_hash(&subtask),
            );
            pipeline.zadd(
                keys::rlm_subtasks(scope, chain_id),
                vec![(subtask.order as f64, subtask.id.clone())],
            );
            out.push(subtask);
        }
        self.storage.exec(pipeline).await?;
        Ok(out)
    }

    fn subtask_hash(subtask: &Subtask) -> Vec<(String, String)> {
        vec![
            ("id".into(), subtask.id.clone()),
            ("chain_id".into(), subtask.chain_id.clone()),
            ("order".into(), subtask.order.to_string()),
            ("description".into(), subtask.description.clone()),
            (
                "status".into(),
                match subtask.status {
                    SubtaskStatus::Pending => "pending",
                    SubtaskStatus::InProgress => "in_progress",
                    SubtaskStatus::Completed => "completed",
                    SubtaskStatus::Failed => "failed",
                }
                .to_string(),
            ),
            ("query".into(), subtask.query.clone().unwrap_or_default()),
            ("result".into(), subtask.result.clone().unwrap_or_default()),
            (
                "memory_ids".into(),
                serde_json::to_string(&subtask.memory_ids).unwrap_or_else(|_| "[]".into()),
            ),
            (
                "tokens_used".into(),
                subtask.tokens_used.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("created_at".into(), subtask.created_at.to_string()),
            (
                "completed_at".into(),
                subtask.completed_at.map(|v| v.to_string()).unwrap_or_default(),
            ),
        ]
    }

    fn subtask_from_hash(fields: &HashMap<String, String>) -> Subtask {
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        Subtask {
            id: get("id"),
            chain_id: get("chain_id"),
            order: get("order").parse().unwrap_or(0),
            description: get("description"),
            status: match get("status").as_str() {
                "in_progress" => SubtaskStatus::InProgress,
                "completed" => SubtaskStatus::Completed,
                "failed" => SubtaskStatus::Failed,
                _ => SubtaskStatus::Pending,
            },
            query: fields.get("query").cloned().filter(|s| !s.is_empty()),
            result: fields.get("result").cloned().filter(|s| !s.is_empty()),
            memory_ids: serde_json::from_str(&get("memory_ids")).unwrap_or_default(),
            tokens_used: fields.get("tokens_used").and_then(|v| v.parse().ok()),
            created_at: get("created_at").parse().unwrap_or(0),
            completed_at: fields.get("completed_at").and_then(|v| v.parse().ok()),
        }
    }

    pub async fn list_subtasks(&self, chain_id: &str) -> Result<Vec<Subtask>> {
        let scope = self.scope();
        let ids = self
            .storage
            .zrange(&keys::rlm_subtasks(scope, chain_id), 0, -1)
            .await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(fields) = self
                .storage
                .hgetall(&keys::rlm_subtask(scope, chain_id, &id))
                .await?
            {
                out.push(Self::subtask_from_hash(&fields));
            }
        }
        Ok(out)
    }

    /// Treat `query` as a case-insensitive regex (plain substring on
    /// compile failure); pack matching lines from the chain's stored
    /// context into a buffer of at most `max_tokens * 4` characters.
    pub async fn inject_snippet(
        &self,
        chain_id: &str,
        query: &str,
        max_tokens: u64,
    ) -> Result<crate::types::ContextSnippet> {
        let context = self
            .storage
            .get(&keys::rlm_context(self.scope(), chain_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("chain {chain_id} context")))?;

        let max_chars = (max_tokens * 4) as usize;
        let lines: Vec<&str> = context.lines().collect();

        let regex = RegexBuilder::new(query).case_insensitive(true).build().ok();
        let matches = |line: &str| -> bool {
            match &regex {
                Some(re) => re.is_match(line),
                None => line.to_lowercase().contains(&query.to_lowercase()),
            }
        };

        let matched_lines: Vec<&str> = lines.iter().copied().filter(|l| matches(l)).collect();

        if matched_lines.is_empty() {
            let snippet: String = context.chars().take(max_chars).collect();
            let tokens_used = ((snippet.len() as f64) / 4.0).ceil() as u64;
            return Ok(crate::types::ContextSnippet {
                snippet,
                relevance_score: 0.1,
                tokens_used,
            });
        }

        let mut buffer = String::new();
        for line in &matched_lines {
            if buffer.len() + line.len() + 1 > max_chars {
                break;
            }
            if !buffer.is_empty() {
                buffer.push('\n');
            }
            buffer.push_str(line);
        }

        let relevance_score = matched_lines.len() as f32 / lines.len().max(1) as f32;
        let tokens_used = ((buffer.len() as f64) / 4.0).ceil() as u64;

        Ok(crate::types::ContextSnippet {
            snippet: buffer,
            relevance_score,
            tokens_used,
        })
    }

    pub async fn update_subtask_result(
        &self,
        chain_id: &str,
        subtask_id: &str,
        result: String,
        status: Option<SubtaskStatus>,
        tokens_used: Option<u64>,
        memory_ids: Option<Vec<String>>,
    ) -> Result<Subtask> {
        let scope = self.scope();
        let fields = self
            .storage
            .hgetall(&keys::rlm_subtask(scope, chain_id, subtask_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("subtask {subtask_id}")))?;
        let mut subtask = Self::subtask_from_hash(&fields);

        subtask.result = Some(result);
        subtask.status = status.unwrap_or(SubtaskStatus::Completed);
        if let Some(t) = tokens_used {
            subtask.tokens_used = Some(t);
        }
        if let Some(ids) = memory_ids {
            subtask.memory_ids = ids;
        }
        subtask.completed_at = Some(now_ms());

        self.storage
            .hset(
                &keys::rlm_subtask(scope, chain_id, subtask_id),
                Self::subtask_hash(&subtask),
            )
            .await?;
        Ok(subtask)
    }

    pub async fn chain_summary(&self, chain_id: &str) -> Result<ChainSummary> {
        let subtasks = self.list_subtasks(chain_id).await?;
        let mut pending = 0;
        let mut in_progress = 0;
        let mut completed = 0;
        let mut failed = 0;
        let mut completed_tokens = Vec::new();

        for s in &subtasks {
            match s.status {
                SubtaskStatus::Pending => pending += 1,
                SubtaskStatus::InProgress => in_progress += 1,
                SubtaskStatus::Completed => {
                    completed += 1;
                    if let Some(t) = s.tokens_used {
                        completed_tokens.push(t as f64);
                    }
                }
                SubtaskStatus::Failed => failed += 1,
            }
        }

        let avg_tokens = if completed_tokens.is_empty() {
            DEFAULT_AVG_TOKENS
        } else {
            completed_tokens.iter().sum::<f64>() / completed_tokens.len() as f64
        };
        let estimated_remaining_tokens =
            ((pending + in_progress) as f64 * avg_tokens).round() as u64;

        Ok(ChainSummary {
            pending,
            in_progress,
            completed,
            failed,
            estimated_remaining_tokens,
        })
    }

    pub async fn store_merged_results(
        &self,
        chain_id: &str,
        aggregated_result: String,
        confidence: f32,
        source_coverage: f32,
    ) -> Result<MergedResults> {
        let subtasks = self.list_subtasks(chain_id).await?;
        let subtasks_total = subtasks.len() as u32;
        let subtasks_completed = subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count() as u32;

        let merged = MergedResults {
            aggregated_result,
            confidence,
            source_coverage,
            subtasks_completed,
            subtasks_total,
        };

        self.storage
            .hset(
                &keys::rlm_results(self.scope(), chain_id),
                vec![
                    ("aggregated_result".into(), merged.aggregated_result.clone()),
                    ("confidence".into(), merged.confidence.to_string()),
                    ("source_coverage".into(), merged.source_coverage.to_string()),
                    ("subtasks_completed".into(), merged.subtasks_completed.to_string()),
                    ("subtasks_total".into(), merged.subtasks_total.to_string()),
                ],
            )
            .await?;

        Ok(merged)
    }

    pub async fn get_merged_results(&self, chain_id: &str) -> Result<Option<MergedResults>> {
        let fields = match self.storage.hgetall(&keys::rlm_results(self.scope(), chain_id)).await? {
            Some(f) if !f.is_empty() => f,
            _ => return Ok(None),
        };
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        Ok(Some(MergedResults {
            aggregated_result: get("aggregated_result"),
            confidence: get("confidence").parse().unwrap_or(0.0),
            source_coverage: get("source_coverage").parse().unwrap_or(0.0),
            subtasks_completed: get("subtasks_completed").parse().unwrap_or(0),
            subtasks_total: get("subtasks_total").parse().unwrap_or(0),
        }))
    }

    /// Move a chain into `completed` or `failed`; terminal states leave
    /// the `…:executions` index but are dropped from `…:executions:active`.
    pub async fn update_status(
        &self,
        chain_id: &str,
        status: ChainStatus,
        error_message: Option<String>,
    ) -> Result<ExecutionContext> {
        let mut chain = self
            .get_chain(chain_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("chain {chain_id}")))?;

        chain.status = status;
        chain.updated_at = now_ms();
        chain.error_message = error_message;
        if matches!(status, ChainStatus::Completed | ChainStatus::Failed) {
            chain.completed_at = Some(chain.updated_at);
        }

        let scope = self.scope();
        let mut pipeline = Pipeline::new();
        pipeline.hset(keys::rlm_chain(scope, chain_id), Self::hash_of(&chain));
        if matches!(status, ChainStatus::Completed | ChainStatus::Failed) {
            pipeline.srem(keys::rlm_executions_active(scope), vec![chain_id.to_string()]);
        }
        self.storage.exec(pipeline).await?;

        Ok(chain)
    }

    pub async fn delete_chain(&self, chain_id: &str) -> Result<bool> {
        if self.get_chain(chain_id).await?.is_none() {
            return Ok(false);
        }
        let scope = self.scope();
        let subtasks = self.list_subtasks(chain_id).await?;

        let mut pipeline = Pipeline::new();
        for subtask in &subtasks {
            pipeline.del(keys::rlm_subtask(scope, chain_id, &subtask.id));
        }
        pipeline.del(keys::rlm_subtasks(scope, chain_id));
        pipeline.del(keys::rlm_context(scope, chain_id));
        pipeline.del(keys::rlm_results(scope, chain_id));
        pipeline.del(keys::rlm_chain(scope, chain_id));
        pipeline.srem(keys::rlm_executions(scope), vec![chain_id.to_string()]);
        pipeline.srem(keys::rlm_executions_active(scope), vec![chain_id.to_string()]);
        self.storage.exec(pipeline).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    fn coordinator() -> RLMCoordinator {
        RLMCoordinator::new(Arc::new(InMemoryStorage::new()), "ws1".to_string())
    }

    #[tokio::test]
    async fn strategy_selection_matches_heuristic() {
        let c = coordinator();
        let chain = c
            .create_chain("Find all ERROR lines".into(), "x".repeat(100), None)
            .await
            .unwrap();
        assert_eq!(chain.strategy, Strategy::Filter);
    }

    #[tokio::test]
    async fn recursive_triggers_on_token_threshold() {
        let c = coordinator();
        let chain = c
            .create_chain("Process this".into(), "x".repeat(250_000), None)
            .await
            .unwrap();
        assert_eq!(chain.strategy, Strategy::Recursive);
    }

    #[tokio::test]
    async fn inject_snippet_returns_only_matching_lines() {
        let c = coordinator();
        let context = "line one\nERROR something broke\nline three\nWARN low disk";
        let chain = c.create_chain("scan".into(), context.into(), None).await.unwrap();
        let snippet = c.inject_snippet(&chain.chain_id, "ERROR|WARN", 1000).await.unwrap();
        assert!(snippet.snippet.contains("ERROR"));
        assert!(snippet.snippet.contains("WARN"));
        assert!(!snippet.snippet.contains("line one"));
        assert!(snippet.tokens_used <= 1000);
    }

    #[tokio::test]
    async fn chain_completion_clears_active_but_keeps_listed() {
        let c = coordinator();
        let chain = c.create_chain("summarize".into(), "ctx".into(), None).await.unwrap();
        c.update_status(&chain.chain_id, ChainStatus::Completed, None)
            .await
            .unwrap();
        let active = c
            .storage
            .smembers(&keys::rlm_executions_active(c.scope()))
            .await
            .unwrap();
        assert!(!active.contains(&chain.chain_id));
        let all = c.list_chains().await.unwrap();
        assert!(all.iter().any(|ch| ch.chain_id == chain.chain_id));
    }
}
