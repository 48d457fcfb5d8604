//! Memory lifecycle, indexing invariants, search, scope conversion, merge,
//! categories and templates. The largest component: almost every other
//! engine (`RelationshipEngine`, `VersionEngine`, `RLMCoordinator`) calls
//! back into this one to dereference ids into entries.

use crate::embedding::{cosine_similarity, EmbeddingBuilder};
use crate::error::{EngineError, Result};
use crate::keys::{self, Scope};
use crate::storage::{Pipeline, StorageClient};
use crate::types::{
    ContextType, CreateMemoryInput, MemoryEntry, MemoryTemplate, SessionInfo, SummaryStats,
    UpdateMemoryInput,
};
use crate::workspace::{ScopeId, ScopeRead, HYBRID_GLOBAL_BIAS};
use parking_lot::RwLock;
use regex::RegexBuilder;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    format!("{:013}{}", now_ms(), uuid::Uuid::new_v4().simple())
}

/// Parameters for [`MemoryStore::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: String,
    pub limit: usize,
    pub min_importance: Option<u8>,
    pub context_types: Option<Vec<ContextType>>,
    pub category: Option<String>,
    pub fuzzy: bool,
    pub regex: bool,
    /// Replacement for the source's "toggle global mode mid-search" hack:
    /// threaded explicitly instead of mutating process-wide state.
    pub scope_override: Option<ScopeRead>,
}

pub struct MemoryStore {
    storage: Arc<dyn StorageClient>,
    embedding: Arc<EmbeddingBuilder>,
    workspace_id: String,
    mode: RwLock<crate::types::WorkspaceMode>,
}

impl MemoryStore {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        embedding: Arc<EmbeddingBuilder>,
        workspace_id: String,
        mode: crate::types::WorkspaceMode,
    ) -> Self {
        Self {
            storage,
            embedding,
            workspace_id,
            mode: RwLock::new(mode),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Shared handle to the backend, for engines that compose with this
    /// store (`VersionEngine`, `RelationshipEngine`, `RLMCoordinator`) and
    /// need to issue their own commands against the same backend.
    pub fn storage(&self) -> &Arc<dyn StorageClient> {
        &self.storage
    }

    /// Read fresh at every call site — never memoized across operations.
    pub fn workspace_mode(&self) -> crate::types::WorkspaceMode {
        *self.mode.read()
    }

    pub fn set_workspace_mode(&self, mode: crate::types::WorkspaceMode) {
        *self.mode.write() = mode;
    }

    fn scope_read(&self, override_scope: Option<ScopeRead>) -> ScopeRead {
        override_scope.unwrap_or_else(|| self.workspace_mode().scope_read())
    }

    fn workspace_scope(&self) -> ScopeId {
        ScopeId::Workspace(self.workspace_id.clone())
    }

    // ---- serialization helpers -------------------------------------------------

    fn hash_of(entry: &MemoryEntry) -> Vec<(String, String)> {
        vec![
            ("id".into(), entry.id.clone()),
            ("timestamp".into(), entry.timestamp.to_string()),
            ("context_type".into(), entry.context_type.as_str().to_string()),
            ("content".into(), entry.content.clone()),
            (
                "summary".into(),
                entry.summary.clone().unwrap_or_default(),
            ),
            (
                "tags".into(),
                serde_json::to_string(&entry.tags).unwrap_or_else(|_| "[]".into()),
            ),
            ("importance".into(), entry.importance.to_string()),
            (
                "session_id".into(),
                entry.session_id.clone().unwrap_or_default(),
            ),
            (
                "embedding".into(),
                serde_json::to_string(&entry.embedding).unwrap_or_else(|_| "[]".into()),
            ),
            (
                "ttl_seconds".into(),
                entry.ttl_seconds.map(|v| v.to_string()).unwrap_or_default(),
            ),
            (
                "expires_at".into(),
                entry.expires_at.map(|v| v.to_string()).unwrap_or_default(),
            ),
            ("is_global".into(), entry.is_global.to_string()),
            ("workspace_id".into(), entry.workspace_id.clone()),
            (
                "category".into(),
                entry.category.clone().unwrap_or_default(),
            ),
        ]
    }

    fn entry_from_hash(fields: &HashMap<String, String>) -> Result<MemoryEntry> {
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        let tags: Vec<String> = serde_json::from_str(&get("tags")).unwrap_or_default();
        let embedding: Vec<f32> = serde_json::from_str(&get("embedding")).unwrap_or_default();
        let context_type = get("context_type")
            .parse()
            .map_err(EngineError::Internal)?;
        Ok(MemoryEntry {
            id: get("id"),
            timestamp: get("timestamp").parse().unwrap_or_default(),
            context_type,
            content: get("content"),
            summary: fields.get("summary").cloned().filter(|s| !s.is_empty()),
            tags,
            importance: get("importance").parse().unwrap_or(5),
            session_id: fields
                .get("session_id")
                .cloned()
                .filter(|s| !s.is_empty()),
            embedding,
            ttl_seconds: fields.get("ttl_seconds").and_then(|v| v.parse().ok()),
            expires_at: fields.get("expires_at").and_then(|v| v.parse().ok()),
            is_global: get("is_global") == "true",
            workspace_id: get("workspace_id"),
            category: fields.get("category").cloned().filter(|s| !s.is_empty()),
        })
    }

    async fn fetch(&self, scope: Scope<'_>, id: &str) -> Result<Option<MemoryEntry>> {
        match self.storage.hgetall(&keys::memory(scope, id)).await? {
            Some(fields) if !fields.is_empty() => Ok(Some(Self::entry_from_hash(&fields)?)),
            _ => Ok(None),
        }
    }

    fn stage_index_insert(pipeline: &mut Pipeline, scope: Scope<'_>, entry: &MemoryEntry) {
        pipeline.sadd(keys::memories_all(scope), vec![entry.id.clone()]);
        pipeline.zadd(
            keys::memories_timeline(scope),
            vec![(entry.timestamp as f64, entry.id.clone())],
        );
        pipeline.sadd(
            keys::memories_by_type(scope, entry.context_type.as_str()),
            vec![entry.id.clone()],
        );
        for tag in &entry.tags {
            pipeline.sadd(keys::memories_by_tag(scope, tag), vec![entry.id.clone()]);
        }
        if entry.importance >= 8 {
            pipeline.zadd(
                keys::memories_important(scope),
                vec![(entry.importance as f64, entry.id.clone())],
            );
        }
    }

    fn stage_index_remove(pipeline: &mut Pipeline, scope: Scope<'_>, entry: &MemoryEntry) {
        pipeline.srem(keys::memories_all(scope), vec![entry.id.clone()]);
        pipeline.zrem(keys::memories_timeline(scope), vec![entry.id.clone()]);
        pipeline.srem(
            keys::memories_by_type(scope, entry.context_type.as_str()),
            vec![entry.id.clone()],
        );
        for tag in &entry.tags {
            pipeline.srem(keys::memories_by_tag(scope, tag), vec![entry.id.clone()]);
        }
        pipeline.zrem(keys::memories_important(scope), vec![entry.id.clone()]);
    }

    // ---- CRUD -------------------------------------------------------------------

    pub async fn create(&self, input: CreateMemoryInput) -> Result<MemoryEntry> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InvalidInput("content must not be empty".into()));
        }
        if !(1..=10).contains(&input.importance) {
            return Err(EngineError::InvalidInput(
                "importance must be in 1..10".into(),
            ));
        }
        if let Some(ttl) = input.ttl_seconds {
            if ttl < 60 {
                return Err(EngineError::InvalidInput(
                    "ttl_seconds must be >= 60".into(),
                ));
            }
        }

        let embedding = self.embedding.embed(&input.content).await?;
        let timestamp = now_ms();
        let summary = input
            .summary
            .unwrap_or_else(|| MemoryEntry::derive_summary(&input.content));
        let expires_at = input.ttl_seconds.map(|ttl| timestamp + (ttl as i64) * 1000);

        let entry = MemoryEntry {
            id: new_id(),
            timestamp,
            context_type: input.context_type,
            content: input.content,
            summary: Some(summary),
            tags: input.tags,
            importance: input.importance,
            session_id: input.session_id,
            embedding,
            ttl_seconds: input.ttl_seconds,
            expires_at,
            is_global: false,
            workspace_id: self.workspace_id.clone(),
            category: input.category.clone(),
        };

        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let mut pipeline = Pipeline::new();
        pipeline.hset(keys::memory(scope, &entry.id), Self::hash_of(&entry));
        if let Some(ttl) = entry.ttl_seconds {
            pipeline.expire(keys::memory(scope, &entry.id), ttl);
        }
        Self::stage_index_insert(&mut pipeline, scope, &entry);
        if let Some(category) = &entry.category {
            pipeline.set(keys::memory_category(scope, &entry.id), category.clone());
            pipeline.sadd(keys::category(scope, category), vec![entry.id.clone()]);
            pipeline.zadd(keys::categories(scope), vec![(timestamp as f64, category.clone())]);
        }
        self.storage.exec(pipeline).await?;

        Ok(entry)
    }

    pub async fn batch_create(&self, inputs: Vec<CreateMemoryInput>) -> Result<Vec<MemoryEntry>> {
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            out.push(self.create(input).await?);
        }
        Ok(out)
    }

    /// When scope is unspecified: workspace first, then global.
    pub async fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        if let Some(entry) = self.fetch(Scope::Workspace(&self.workspace_id), id).await? {
            return Ok(Some(entry));
        }
        self.fetch(Scope::Global, id).await
    }

    pub async fn update(&self, id: &str, input: UpdateMemoryInput) -> Result<MemoryEntry> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))?;

        if let Some(importance) = input.importance {
            if !(1..=10).contains(&importance) {
                return Err(EngineError::InvalidInput(
                    "importance must be in 1..10".into(),
                ));
            }
        }

        let scope_id = ScopeId::of(existing.is_global, &existing.workspace_id);
        let scope = scope_id.as_scope();

        crate::version::snapshot(
            self.storage.as_ref(),
            scope,
            &existing,
            crate::types::VersionAuthor::User,
            Some("Memory updated".to_string()),
        )
        .await?;

        let mut updated = existing.clone();
        let content_changed = input
            .content
            .as_ref()
            .map(|c| c != &existing.content)
            .unwrap_or(false);

        if let Some(content) = input.content {
            updated.content = content;
        }
        if let Some(summary) = input.summary {
            updated.summary = Some(summary);
        }
        if let Some(tags) = input.tags {
            updated.tags = tags;
        }
        if let Some(importance) = input.importance {
            updated.importance = importance;
        }
        if let Some(context_type) = input.context_type {
            updated.context_type = context_type;
        }
        if let Some(category) = input.category {
            updated.category = Some(category);
        }

        if content_changed {
            updated.embedding = self.embedding.embed(&updated.content).await?;
        }

        let mut pipeline = Pipeline::new();

        if updated.context_type != existing.context_type {
            pipeline.srem(
                keys::memories_by_type(scope, existing.context_type.as_str()),
                vec![id.to_string()],
            );
            pipeline.sadd(
                keys::memories_by_type(scope, updated.context_type.as_str()),
                vec![id.to_string()],
            );
        }

        let old_tags: HashSet<&String> = existing.tags.iter().collect();
        let new_tags: HashSet<&String> = updated.tags.iter().collect();
        for removed in old_tags.difference(&new_tags) {
            pipeline.srem(keys::memories_by_tag(scope, removed), vec![id.to_string()]);
        }
        for added in new_tags.difference(&old_tags) {
            pipeline.sadd(keys::memories_by_tag(scope, added), vec![id.to_string()]);
        }

        let was_important = existing.importance >= 8;
        let is_important = updated.importance >= 8;
        if was_important && !is_important {
            pipeline.zrem(keys::memories_important(scope), vec![id.to_string()]);
        } else if is_important {
            pipeline.zadd(
                keys::memories_important(scope),
                vec![(updated.importance as f64, id.to_string())],
            );
        }

        pipeline.hset(keys::memory(scope, id), Self::hash_of(&updated));
        self.storage.exec(pipeline).await?;

        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let existing = match self.get(id).await? {
            Some(e) => e,
            None => return Ok(false),
        };
        let scope_id = ScopeId::of(existing.is_global, &existing.workspace_id);
        let scope = scope_id.as_scope();

        let mut pipeline = Pipeline::new();
        Self::stage_index_remove(&mut pipeline, scope, &existing);
        if let Some(category) = &existing.category {
            pipeline.srem(keys::category(scope, category), vec![id.to_string()]);
            pipeline.del(keys::memory_category(scope, id));
        }
        pipeline.del(keys::memory(scope, id));
        self.storage.exec(pipeline).await?;
        Ok(true)
    }

    // ---- search & index-driven reads ---------------------------------------------

    pub async fn search(&self, params: SearchParams) -> Result<Vec<(MemoryEntry, f32)>> {
        let qv = self.embedding.embed(&params.query).await?;
        let scope_read = self.scope_read(params.scope_override);

        let mut candidates: Vec<(MemoryEntry, bool)> = Vec::new(); // (entry, is_global_bias)
        for (scope_id, biased) in self.scopes_for(scope_read) {
            let scope = scope_id.as_scope();
            let ids = match &params.context_types {
                Some(types) if !types.is_empty() => {
                    let keys_list: Vec<String> = types
                        .iter()
                        .map(|t| keys::memories_by_type(scope, t.as_str()))
                        .collect();
                    self.storage.sunion(&keys_list).await?
                }
                _ => self.storage.smembers(&keys::memories_all(scope)).await?,
            };
            for id in ids {
                if let Some(entry) = self.fetch(scope, &id).await? {
                    candidates.push((entry, biased));
                }
            }
        }

        let regex = if params.regex {
            match RegexBuilder::new(&params.query).case_insensitive(true).build() {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(error = %e, "invalid regex filter, skipping");
                    None
                }
            }
        } else {
            None
        };

        let query_words: Vec<String> = params
            .query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        let mut scored = Vec::new();
        for (entry, biased) in candidates {
            if let Some(min) = params.min_importance {
                if entry.importance < min {
                    continue;
                }
            }
            if let Some(category) = &params.category {
                if entry.category.as_deref() != Some(category.as_str()) {
                    continue;
                }
            }
            if let Some(re) = &regex {
                if !re.is_match(&entry.content) {
                    continue;
                }
            }

            let mut similarity = cosine_similarity(&qv, &entry.embedding)?;
            if params.fuzzy && !query_words.is_empty() {
                let content_lower = entry.content.to_lowercase();
                let hits = query_words
                    .iter()
                    .filter(|w| content_lower.contains(w.as_str()))
                    .count();
                let fraction = hits as f32 / query_words.len() as f32;
                similarity = (similarity + fraction * 0.2).min(1.0);
            }
            if biased {
                similarity *= HYBRID_GLOBAL_BIAS;
            }
            scored.push((entry, similarity));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(params.limit);
        Ok(scored)
    }

    /// Scopes to read for a given mode, paired with whether hits from that
    /// scope get the hybrid global-downweight bias applied.
    fn scopes_for(&self, scope_read: ScopeRead) -> Vec<(ScopeId, bool)> {
        match scope_read {
            ScopeRead::WorkspaceOnly => vec![(self.workspace_scope(), false)],
            ScopeRead::GlobalOnly => vec![(ScopeId::Global, false)],
            ScopeRead::Both => vec![(self.workspace_scope(), false), (ScopeId::Global, true)],
        }
    }

    async fn dereference_sorted(&self, scope_ids: &[String], scope: Scope<'_>) -> Result<Vec<MemoryEntry>> {
        let mut out = Vec::with_capacity(scope_ids.len());
        for id in scope_ids {
            if let Some(entry) = self.fetch(scope, id).await? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let ids = self
            .storage
            .zrevrange(&keys::memories_timeline(scope), 0, limit as i64 - 1)
            .await?;
        self.dereference_sorted(&ids, scope).await
    }

    pub async fn by_type(&self, context_type: ContextType, limit: usize) -> Result<Vec<MemoryEntry>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let ids = self
            .storage
            .smembers(&keys::memories_by_type(scope, context_type.as_str()))
            .await?;
        let mut entries = self.dereference_sorted(&ids, scope).await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn by_tag(&self, tag: &str, limit: usize) -> Result<Vec<MemoryEntry>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let ids = self.storage.smembers(&keys::memories_by_tag(scope, tag)).await?;
        let mut entries = self.dereference_sorted(&ids, scope).await?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.truncate(limit);
        Ok(entries)
    }

    pub async fn important(&self, limit: usize) -> Result<Vec<MemoryEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let ids = self
            .storage
            .zrevrange(&keys::memories_important(scope), 0, limit as i64 - 1)
            .await?;
        self.dereference_sorted(&ids, scope).await
    }

    pub async fn by_time_window(
        &self,
        start_ms: i64,
        end_ms: i64,
        context_type: Option<ContextType>,
        min_importance: Option<u8>,
    ) -> Result<Vec<MemoryEntry>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let ids = self
            .storage
            .zrangebyscore(&keys::memories_timeline(scope), start_ms as f64, end_ms as f64)
            .await?;
        let mut entries = self.dereference_sorted(&ids, scope).await?;
        if let Some(ct) = context_type {
            entries.retain(|e| e.context_type == ct);
        }
        if let Some(min) = min_importance {
            entries.retain(|e| e.importance >= min);
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    // ---- merge & scope conversion -------------------------------------------------

    pub async fn merge(&self, ids: Vec<String>, keep_id: Option<String>) -> Result<MemoryEntry> {
        let mut loaded = Vec::new();
        for id in &ids {
            if let Some(entry) = self.get(id).await? {
                loaded.push(entry);
            }
        }
        if loaded.is_empty() {
            return Err(EngineError::NotFound("no memories to merge".into()));
        }

        let survivor_idx = if let Some(keep) = &keep_id {
            loaded
                .iter()
                .position(|e| &e.id == keep)
                .unwrap_or(0)
        } else {
            let mut best = 0usize;
            for (i, e) in loaded.iter().enumerate().skip(1) {
                if e.importance > loaded[best].importance {
                    best = i;
                }
            }
            best
        };

        let survivor_id = loaded[survivor_idx].id.clone();
        let mut content = loaded[survivor_idx].content.clone();
        let mut tags: HashSet<String> = loaded[survivor_idx].tags.iter().cloned().collect();
        let mut max_importance = loaded[survivor_idx].importance;

        for (i, entry) in loaded.iter().enumerate() {
            if i == survivor_idx {
                continue;
            }
            content.push_str("\n\n--- Merged content ---\n");
            content.push_str(&entry.content);
            tags.extend(entry.tags.iter().cloned());
            max_importance = max_importance.max(entry.importance);
        }

        let updated = self
            .update(
                &survivor_id,
                UpdateMemoryInput {
                    content: Some(content),
                    tags: Some(tags.into_iter().collect()),
                    importance: Some(max_importance),
                    ..Default::default()
                },
            )
            .await?;

        for (i, entry) in loaded.iter().enumerate() {
            if i != survivor_idx {
                self.delete(&entry.id).await?;
            }
        }

        Ok(updated)
    }

    async fn convert_scope(&self, id: &str, target_global: bool) -> Result<MemoryEntry> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))?;
        if existing.is_global == target_global {
            return Ok(existing);
        }

        let source_scope_id = ScopeId::of(existing.is_global, &existing.workspace_id);
        let target_scope_id = if target_global {
            ScopeId::Global
        } else {
            self.workspace_scope()
        };
        let source = source_scope_id.as_scope();
        let target = target_scope_id.as_scope();

        let mut updated = existing.clone();
        updated.is_global = target_global;
        updated.workspace_id = if target_global {
            String::new()
        } else {
            self.workspace_id.clone()
        };

        let mut pipeline = Pipeline::new();
        Self::stage_index_remove(&mut pipeline, source, &existing);
        pipeline.del(keys::memory(source, id));
        pipeline.hset(keys::memory(target, id), Self::hash_of(&updated));
        Self::stage_index_insert(&mut pipeline, target, &updated);
        if let Some(category) = &existing.category {
            pipeline.srem(keys::category(source, category), vec![id.to_string()]);
            pipeline.del(keys::memory_category(source, id));
            pipeline.set(keys::memory_category(target, id), category.clone());
            pipeline.sadd(keys::category(target, category), vec![id.to_string()]);
        }
        self.storage.exec(pipeline).await?;

        Ok(updated)
    }

    pub async fn convert_to_global(&self, id: &str) -> Result<MemoryEntry> {
        self.convert_scope(id, true).await
    }

    pub async fn convert_to_workspace(&self, id: &str) -> Result<MemoryEntry> {
        self.convert_scope(id, false).await
    }

    // ---- categories ---------------------------------------------------------------

    pub async fn set_category(&self, id: &str, category: &str) -> Result<()> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {id}")))?;
        let scope_id = ScopeId::of(existing.is_global, &existing.workspace_id);
        let scope = scope_id.as_scope();

        let prior = self.storage.get(&keys::memory_category(scope, id)).await?;

        let mut pipeline = Pipeline::new();
        if let Some(prior) = &prior {
            pipeline.srem(keys::category(scope, prior), vec![id.to_string()]);
        }
        pipeline.set(keys::memory_category(scope, id), category.to_string());
        pipeline.sadd(keys::category(scope, category), vec![id.to_string()]);
        pipeline.zadd(
            keys::categories(scope),
            vec![(now_ms() as f64, category.to_string())],
        );
        let mut hash = Self::hash_of(&existing);
        if let Some(field) = hash.iter_mut().find(|(k, _)| k == "category") {
            field.1 = category.to_string();
        }
        pipeline.hset(keys::memory(scope, id), hash);
        self.storage.exec(pipeline).await?;
        Ok(())
    }

    pub async fn list_categories(&self) -> Result<Vec<String>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        self.storage.zrevrange(&keys::categories(scope), 0, -1).await
    }

    pub async fn by_category(&self, category: &str) -> Result<Vec<MemoryEntry>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let ids = self.storage.smembers(&keys::category(scope, category)).await?;
        self.dereference_sorted(&ids, scope).await
    }

    // ---- sessions -------------------------------------------------------------------

    pub async fn create_session(&self, name: &str) -> Result<SessionInfo> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let session = SessionInfo {
            session_id: new_id(),
            session_name: name.to_string(),
            created_at: now_ms(),
            memory_count: 0,
            summary: None,
            memory_ids: Vec::new(),
        };
        let mut pipeline = Pipeline::new();
        pipeline.hset(
            keys::session(scope, &session.session_id),
            vec![
                ("session_id".into(), session.session_id.clone()),
                ("session_name".into(), session.session_name.clone()),
                ("created_at".into(), session.created_at.to_string()),
                ("memory_count".into(), "0".into()),
                ("summary".into(), String::new()),
                ("memory_ids".into(), "[]".into()),
            ],
        );
        pipeline.sadd(keys::sessions_all(scope), vec![session.session_id.clone()]);
        self.storage.exec(pipeline).await?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let fields = match self.storage.hgetall(&keys::session(scope, session_id)).await? {
            Some(f) if !f.is_empty() => f,
            _ => return Ok(None),
        };
        Ok(Some(Self::session_from_hash(&fields)))
    }

    fn session_from_hash(fields: &HashMap<String, String>) -> SessionInfo {
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        SessionInfo {
            session_id: get("session_id"),
            session_name: get("session_name"),
            created_at: get("created_at").parse().unwrap_or_default(),
            memory_count: get("memory_count").parse().unwrap_or_default(),
            summary: fields.get("summary").cloned().filter(|s| !s.is_empty()),
            memory_ids: serde_json::from_str(&get("memory_ids")).unwrap_or_default(),
        }
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let ids = self.storage.smembers(&keys::sessions_all(scope)).await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = self.get_session(&id).await? {
                out.push(session);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    // ---- templates --------------------------------------------------------------

    pub async fn create_template(&self, template: MemoryTemplate) -> Result<MemoryTemplate> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        let mut pipeline = Pipeline::new();
        pipeline.hset(
            keys::template(scope, &template.template_id),
            vec![
                ("template_id".into(), template.template_id.clone()),
                ("name".into(), template.name.clone()),
                (
                    "description".into(),
                    template.description.clone().unwrap_or_default(),
                ),
                (
                    "context_type".into(),
                    template.context_type.as_str().to_string(),
                ),
                ("content_template".into(), template.content_template.clone()),
                (
                    "default_tags".into(),
                    serde_json::to_string(&template.default_tags).unwrap_or_else(|_| "[]".into()),
                ),
                (
                    "default_importance".into(),
                    template.default_importance.to_string(),
                ),
                ("is_builtin".into(), template.is_builtin.to_string()),
                ("created_at".into(), template.created_at.to_string()),
            ],
        );
        self.storage.exec(pipeline).await?;
        Ok(template)
    }

    fn template_from_hash(fields: &HashMap<String, String>) -> Result<MemoryTemplate> {
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        Ok(MemoryTemplate {
            template_id: get("template_id"),
            name: get("name"),
            description: fields.get("description").cloned().filter(|s| !s.is_empty()),
            context_type: get("context_type").parse().map_err(EngineError::Internal)?,
            content_template: get("content_template"),
            default_tags: serde_json::from_str(&get("default_tags")).unwrap_or_default(),
            default_importance: get("default_importance").parse().unwrap_or(5),
            is_builtin: get("is_builtin") == "true",
            created_at: get("created_at").parse().unwrap_or_default(),
        })
    }

    pub async fn get_template(&self, template_id: &str) -> Result<Option<MemoryTemplate>> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        match self.storage.hgetall(&keys::template(scope, template_id)).await? {
            Some(fields) if !fields.is_empty() => Ok(Some(Self::template_from_hash(&fields)?)),
            _ => Ok(None),
        }
    }

    pub async fn delete_template(&self, template_id: &str) -> Result<bool> {
        let template = match self.get_template(template_id).await? {
            Some(t) => t,
            None => return Ok(false),
        };
        if template.is_builtin {
            return Err(EngineError::Conflict(
                "built-in templates cannot be deleted".into(),
            ));
        }
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();
        self.storage.del(&keys::template(scope, template_id)).await?;
        Ok(true)
    }

    pub async fn create_from_template(
        &self,
        template_id: &str,
        variables: &HashMap<String, String>,
        extra_tags: Vec<String>,
        importance_override: Option<u8>,
    ) -> Result<MemoryEntry> {
        let template = self
            .get_template(template_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("template {template_id}")))?;

        let mut content = template.content_template.clone();
        for (key, value) in variables {
            content = content.replace(&format!("{{{{{key}}}}}"), value);
        }
        if content.contains("{{") && content.contains("}}") {
            return Err(EngineError::InvalidInput(format!(
                "template {template_id} has unresolved variables"
            )));
        }

        let mut tags = template.default_tags.clone();
        tags.extend(extra_tags);

        self.create(CreateMemoryInput {
            content,
            context_type: template.context_type,
            summary: None,
            tags,
            importance: importance_override.unwrap_or(template.default_importance),
            session_id: None,
            ttl_seconds: None,
            category: None,
        })
        .await
    }

    // ---- stats ----------------------------------------------------------------------

    pub async fn summary_stats(&self) -> Result<SummaryStats> {
        let scope_id = self.workspace_scope();
        let scope = scope_id.as_scope();

        let workspace_ids = self.storage.smembers(&keys::memories_all(scope)).await?;
        let global_ids = self.storage.smembers(&keys::memories_all(Scope::Global)).await?;

        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut tags: HashSet<String> = HashSet::new();
        for id in workspace_ids.iter().chain(global_ids.iter()) {
            let s = if workspace_ids.contains(id) {
                scope
            } else {
                Scope::Global
            };
            if let Some(entry) = self.fetch(s, id).await? {
                *by_type.entry(entry.context_type.as_str().to_string()).or_insert(0) += 1;
                tags.extend(entry.tags.iter().cloned());
            }
        }

        let relationship_count = self.storage.scard(&keys::relationships_all(scope)).await?;

        let mut version_count = 0u64;
        for id in workspace_ids.iter() {
            version_count += self.storage.zcard(&keys::memory_versions(scope, id)).await?;
        }
        for id in global_ids.iter() {
            version_count += self.storage.zcard(&keys::memory_versions(Scope::Global, id)).await?;
        }

        Ok(SummaryStats {
            total_memories: (workspace_ids.len() + global_ids.len()) as u64,
            workspace_memories: workspace_ids.len() as u64,
            global_memories: global_ids.len() as u64,
            by_type,
            distinct_tags: tags.len() as u64,
            relationship_count,
            version_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingBuilder, NoopKeywordExtractor};
    use crate::storage::InMemoryStorage;

    fn store() -> MemoryStore {
        MemoryStore::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(EmbeddingBuilder::new(Box::new(NoopKeywordExtractor))),
            "abc123".to_string(),
            crate::types::WorkspaceMode::Isolated,
        )
    }

    fn create_input(content: &str, importance: u8, tags: Vec<&str>) -> CreateMemoryInput {
        CreateMemoryInput {
            content: content.to_string(),
            context_type: ContextType::Directive,
            summary: None,
            tags: tags.into_iter().map(String::from).collect(),
            importance,
            session_id: None,
            ttl_seconds: None,
            category: None,
        }
    }

    #[tokio::test]
    async fn create_rejects_empty_content() {
        let s = store();
        let err = s
            .create(create_input("", 5, vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }

    #[tokio::test]
    async fn create_indexes_tag_type_and_importance() {
        let s = store();
        let entry = s
            .create(create_input("Always use ULIDs for IDs", 9, vec!["id", "conv"]))
            .await
            .unwrap();
        assert!(!entry.is_global);
        assert_eq!(entry.workspace_id, "abc123");

        let important = s.important(10).await.unwrap();
        assert!(important.iter().any(|e| e.id == entry.id));

        let by_type = s.by_type(ContextType::Directive, 10).await.unwrap();
        assert!(by_type.iter().any(|e| e.id == entry.id));

        let by_tag = s.by_tag("id", 10).await.unwrap();
        assert!(by_tag.iter().any(|e| e.id == entry.id));
    }

    #[tokio::test]
    async fn delete_removes_from_every_index() {
        let s = store();
        let entry = s
            .create(create_input("Always use ULIDs for IDs", 9, vec!["id"]))
            .await
            .unwrap();
        assert!(s.delete(&entry.id).await.unwrap());
        assert!(s.get(&entry.id).await.unwrap().is_none());
        assert!(s.important(10).await.unwrap().is_empty());
        assert!(s.by_tag("id", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scope_round_trip_preserves_timestamp() {
        let s = store();
        let entry = s.create(create_input("content", 5, vec![])).await.unwrap();
        let global = s.convert_to_global(&entry.id).await.unwrap();
        assert!(global.is_global);
        assert_eq!(global.workspace_id, "");
        let back = s.convert_to_workspace(&entry.id).await.unwrap();
        assert!(!back.is_global);
        assert_eq!(back.timestamp, entry.timestamp);
    }

    #[tokio::test]
    async fn merge_chooses_highest_importance_survivor() {
        let s = store();
        let m1 = s.create(create_input("one", 5, vec!["a"])).await.unwrap();
        let m2 = s.create(create_input("two", 8, vec!["b"])).await.unwrap();
        let m3 = s.create(create_input("three", 3, vec!["a", "c"])).await.unwrap();

        let survivor = s
            .merge(vec![m1.id.clone(), m2.id.clone(), m3.id.clone()], None)
            .await
            .unwrap();

        assert_eq!(survivor.id, m2.id);
        assert!(survivor.content.contains("one"));
        assert!(survivor.content.contains("three"));
        let mut tags = survivor.tags.clone();
        tags.sort();
        assert_eq!(tags, vec!["a", "b", "c"]);
        assert!(s.get(&m1.id).await.unwrap().is_none());
        assert!(s.get(&m3.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn time_window_returns_ascending_order() {
        let s = store();
        let a = s.create(create_input("a", 5, vec![])).await.unwrap();
        let b = s.create(create_input("b", 5, vec![])).await.unwrap();
        let entries = s.by_time_window(0, now_ms() + 10_000, None, None).await.unwrap();
        let pos_a = entries.iter().position(|e| e.id == a.id);
        let pos_b = entries.iter().position(|e| e.id == b.id);
        assert!(pos_a.is_some() && pos_b.is_some());
        assert!(pos_a < pos_b);
    }
}
