//! Append-only version log per memory: capped retention, rollback.

use crate::error::{EngineError, Result};
use crate::keys::{self, Scope};
use crate::memory_store::MemoryStore;
use crate::storage::{Pipeline, StorageClient};
use crate::types::{MemoryEntry, MemoryVersion, UpdateMemoryInput, VersionAuthor};
use crate::workspace::ScopeId;
use std::collections::HashMap;

/// Versions beyond this many (by recency) are pruned after every append.
const MAX_VERSIONS: i64 = 50;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_version_id() -> String {
    format!("{:013}{}", now_ms(), uuid::Uuid::new_v4().simple())
}

/// Snapshot `entry`'s current mutable fields into its version log, then
/// cap retention to the most recent 50. Called by [`MemoryStore::update`]
/// before applying a mutation, and twice by [`rollback`].
pub async fn snapshot(
    storage: &dyn StorageClient,
    scope: Scope<'_>,
    entry: &MemoryEntry,
    created_by: VersionAuthor,
    change_reason: Option<String>,
) -> Result<MemoryVersion> {
    let version = MemoryVersion {
        version_id: new_version_id(),
        memory_id: entry.id.clone(),
        created_at: now_ms(),
        created_by,
        change_reason,
        content: entry.content.clone(),
        context_type: entry.context_type,
        importance: entry.importance,
        tags: entry.tags.clone(),
        summary: entry.summary.clone(),
    };

    let mut pipeline = Pipeline::new();
    pipeline.hset(
        keys::memory_version(scope, &entry.id, &version.version_id),
        hash_of(&version),
    );
    pipeline.zadd(
        keys::memory_versions(scope, &entry.id),
        vec![(version.created_at as f64, version.version_id.clone())],
    );
    pipeline.zremrangebyrank(keys::memory_versions(scope, &entry.id), 0, -(MAX_VERSIONS + 1));
    storage.exec(pipeline).await?;

    Ok(version)
}

fn hash_of(version: &MemoryVersion) -> Vec<(String, String)> {
    vec![
        ("version_id".into(), version.version_id.clone()),
        ("memory_id".into(), version.memory_id.clone()),
        ("created_at".into(), version.created_at.to_string()),
        (
            "created_by".into(),
            match version.created_by {
                VersionAuthor::User => "user".to_string(),
                VersionAuthor::System => "system".to_string(),
            },
        ),
        (
            "change_reason".into(),
            version.change_reason.clone().unwrap_or_default(),
        ),
        ("content".into(), version.content.clone()),
        ("context_type".into(), version.context_type.as_str().to_string()),
        ("importance".into(), version.importance.to_string()),
        (
            "tags".into(),
            serde_json::to_string(&version.tags).unwrap_or_else(|_| "[]".into()),
        ),
        (
            "summary".into(),
            version.summary.clone().unwrap_or_default(),
        ),
    ]
}

fn version_from_hash(fields: &HashMap<String, String>) -> Result<MemoryVersion> {
    let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
    Ok(MemoryVersion {
        version_id: get("version_id"),
        memory_id: get("memory_id"),
        created_at: get("created_at").parse().unwrap_or_default(),
        created_by: if get("created_by") == "system" {
            VersionAuthor::System
        } else {
            VersionAuthor::User
        },
        change_reason: fields.get("change_reason").cloned().filter(|s| !s.is_empty()),
        content: get("content"),
        context_type: get("context_type").parse().map_err(EngineError::Internal)?,
        importance: get("importance").parse().unwrap_or(5),
        tags: serde_json::from_str(&get("tags")).unwrap_or_default(),
        summary: fields.get("summary").cloned().filter(|s| !s.is_empty()),
    })
}

/// History engine: reads/rolls back the version log for memories owned by
/// a given [`MemoryStore`].
pub struct VersionEngine<'a> {
    store: &'a MemoryStore,
}

impl<'a> VersionEngine<'a> {
    pub fn new(store: &'a MemoryStore) -> Self {
        Self { store }
    }

    fn storage(&self) -> &dyn StorageClient {
        self.store.storage().as_ref()
    }

    /// Newest-first, capped at 50 entries by construction (the log itself
    /// never grows past that bound).
    pub async fn history(&self, memory_id: &str) -> Result<Vec<MemoryVersion>> {
        let entry = self
            .store
            .get(memory_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {memory_id}")))?;
        let scope_id = ScopeId::of(entry.is_global, &entry.workspace_id);
        let scope = scope_id.as_scope();

        let ids = self
            .storage()
            .zrevrange(&keys::memory_versions(scope, memory_id), 0, -1)
            .await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(fields) = self
                .storage()
                .hgetall(&keys::memory_version(scope, memory_id, &id))
                .await?
            {
                out.push(version_from_hash(&fields)?);
            }
        }
        Ok(out)
    }

    /// Apply a version snapshot back onto the live memory via the normal
    /// update path, bracketed by a pre- and post-rollback system version —
    /// exactly two new version entries, regardless of `preserve_relationships`
    /// (accepted but not acted on; relationships are never touched here).
    pub async fn rollback(
        &self,
        memory_id: &str,
        version_id: &str,
        _preserve_relationships: bool,
    ) -> Result<MemoryEntry> {
        let entry = self
            .store
            .get(memory_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {memory_id}")))?;
        let scope_id = ScopeId::of(entry.is_global, &entry.workspace_id);
        let scope = scope_id.as_scope();

        let fields = self
            .storage()
            .hgetall(&keys::memory_version(scope, memory_id, version_id))
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("version {version_id}")))?;
        let version = version_from_hash(&fields)?;

        // `store.update` snapshots `entry`'s pre-rollback state itself (reason
        // "Memory updated") before applying the restored fields below — that
        // snapshot IS the pre-rollback entry, so we don't take a second one.
        let updated = self
            .store
            .update(
                memory_id,
                UpdateMemoryInput {
                    content: Some(version.content.clone()),
                    context_type: Some(version.context_type),
                    importance: Some(version.importance),
                    tags: Some(version.tags.clone()),
                    summary: version.summary.clone(),
                    category: None,
                },
            )
            .await?;

        // `update` already snapshotted the pre-rollback state with reason
        // "Memory updated"; append the system-authored post-rollback marker.
        snapshot(
            self.storage(),
            scope,
            &updated,
            crate::types::VersionAuthor::System,
            Some(format!("Rolled back to {version_id}")),
        )
        .await?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingBuilder, NoopKeywordExtractor};
    use crate::storage::InMemoryStorage;
    use crate::types::{ContextType, CreateMemoryInput};
    use std::sync::Arc;

    fn store() -> MemoryStore {
        MemoryStore::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(EmbeddingBuilder::new(Box::new(NoopKeywordExtractor))),
            "ws1".to_string(),
            crate::types::WorkspaceMode::Isolated,
        )
    }

    #[tokio::test]
    async fn rollback_restores_content_and_adds_two_versions() {
        let s = store();
        let entry = s
            .create(CreateMemoryInput {
                content: "v1".into(),
                context_type: ContextType::Information,
                summary: None,
                tags: vec![],
                importance: 5,
                session_id: None,
                ttl_seconds: None,
                category: None,
            })
            .await
            .unwrap();

        s.update(
            &entry.id,
            UpdateMemoryInput {
                content: Some("v2".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        s.update(
            &entry.id,
            UpdateMemoryInput {
                content: Some("v3".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let engine = VersionEngine::new(&s);
        let history_before = engine.history(&entry.id).await.unwrap();
        assert_eq!(history_before.len(), 2);

        let v1_id = history_before.last().unwrap().version_id.clone();
        let rolled_back = engine.rollback(&entry.id, &v1_id, false).await.unwrap();
        assert_eq!(rolled_back.content, "v1");

        let history_after = engine.history(&entry.id).await.unwrap();
        assert_eq!(history_after.len(), 4);
    }
}
