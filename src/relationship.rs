//! Typed directed edges between memories; bounded breadth-first traversal.

use crate::error::{EngineError, Result};
use crate::keys::{self, Scope};
use crate::memory_store::MemoryStore;
use crate::storage::{Pipeline, StorageClient};
use crate::types::{MemoryEntry, MemoryRelationship, RelationshipType, TraverseDirection};
use crate::workspace::ScopeId;
use std::collections::{HashMap, HashSet, VecDeque};

const MAX_TRAVERSE_DEPTH: u8 = 5;
const MAX_GRAPH_NODES: usize = 100;

fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// One hop recorded during [`RelationshipEngine::traverse`].
#[derive(Debug, Clone)]
pub struct TraversalHit {
    pub memory: MemoryEntry,
    pub edge: MemoryRelationship,
    pub depth: u8,
}

/// One visited node recorded during [`RelationshipEngine::graph`].
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub memory: MemoryEntry,
    pub edges: Vec<MemoryRelationship>,
    pub depth: u8,
}

/// Result of [`RelationshipEngine::graph`].
#[derive(Debug, Clone)]
pub struct Graph {
    pub root: String,
    pub nodes: HashMap<String, GraphNode>,
    pub total_nodes: usize,
    pub max_depth_reached: u8,
}

pub struct RelationshipEngine<'a> {
    store: &'a MemoryStore,
}

impl<'a> RelationshipEngine<'a> {
    pub fn new(store: &'a MemoryStore) -> Self {
        Self { store }
    }

    fn storage(&self) -> &dyn StorageClient {
        self.store.storage().as_ref()
    }

    fn hash_of(rel: &MemoryRelationship) -> Vec<(String, String)> {
        vec![
            ("id".into(), rel.id.clone()),
            ("from_memory_id".into(), rel.from_memory_id.clone()),
            ("to_memory_id".into(), rel.to_memory_id.clone()),
            (
                "relationship_type".into(),
                rel.relationship_type.as_str().to_string(),
            ),
            ("created_at".into(), rel.created_at.clone()),
            (
                "metadata".into(),
                rel.metadata
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            ),
        ]
    }

    fn rel_from_hash(fields: &HashMap<String, String>) -> Result<MemoryRelationship> {
        let get = |k: &str| fields.get(k).cloned().unwrap_or_default();
        let metadata_raw = get("metadata");
        let metadata = if metadata_raw.is_empty() {
            None
        } else {
            serde_json::from_str(&metadata_raw).ok()
        };
        Ok(MemoryRelationship {
            id: get("id"),
            from_memory_id: get("from_memory_id"),
            to_memory_id: get("to_memory_id"),
            relationship_type: get("relationship_type")
                .parse()
                .map_err(EngineError::Internal)?,
            created_at: get("created_at"),
            metadata,
        })
    }

    async fn fetch_edge(&self, scope: Scope<'_>, id: &str) -> Result<Option<MemoryRelationship>> {
        match self.storage().hgetall(&keys::relationship(scope, id)).await? {
            Some(fields) if !fields.is_empty() => Ok(Some(Self::rel_from_hash(&fields)?)),
            _ => Ok(None),
        }
    }

    /// Create a typed edge. Idempotent: an existing edge with the same
    /// `(from, to, type)` is returned unchanged.
    pub async fn create(
        &self,
        from: &str,
        to: &str,
        relationship_type: RelationshipType,
        metadata: Option<serde_json::Value>,
    ) -> Result<MemoryRelationship> {
        if from == to {
            return Err(EngineError::InvalidInput(
                "relationship endpoints must differ".into(),
            ));
        }
        let from_entry = self
            .store
            .get(from)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {from}")))?;
        let to_entry = self
            .store
            .get(to)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {to}")))?;

        let is_global = from_entry.is_global && to_entry.is_global;
        let scope_id = ScopeId::of(is_global, self.store.workspace_id());
        let scope = scope_id.as_scope();

        if let Some(existing) = self.find_duplicate(scope, from, to, relationship_type).await? {
            return Ok(existing);
        }

        let edge = MemoryRelationship {
            id: new_id(),
            from_memory_id: from.to_string(),
            to_memory_id: to.to_string(),
            relationship_type,
            created_at: now_iso(),
            metadata,
        };

        let mut pipeline = Pipeline::new();
        pipeline.hset(keys::relationship(scope, &edge.id), Self::hash_of(&edge));
        pipeline.sadd(keys::relationships_all(scope), vec![edge.id.clone()]);
        pipeline.sadd(keys::memory_relationships_out(scope, from), vec![edge.id.clone()]);
        pipeline.sadd(keys::memory_relationships_in(scope, to), vec![edge.id.clone()]);
        self.storage().exec(pipeline).await?;

        Ok(edge)
    }

    async fn find_duplicate(
        &self,
        scope: Scope<'_>,
        from: &str,
        to: &str,
        relationship_type: RelationshipType,
    ) -> Result<Option<MemoryRelationship>> {
        let out_ids = self
            .storage()
            .smembers(&keys::memory_relationships_out(scope, from))
            .await?;
        for id in out_ids {
            if let Some(edge) = self.fetch_edge(scope, &id).await? {
                if edge.to_memory_id == to && edge.relationship_type == relationship_type {
                    return Ok(Some(edge));
                }
            }
        }
        Ok(None)
    }

    /// Breadth-first traversal, bounded by `depth` (1..=5). The root is
    /// never emitted.
    pub async fn traverse(
        &self,
        root: &str,
        depth: u8,
        direction: TraverseDirection,
        types: Option<&[RelationshipType]>,
    ) -> Result<Vec<TraversalHit>> {
        let depth = depth.clamp(1, MAX_TRAVERSE_DEPTH);
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.to_string());
        let mut queue: VecDeque<(String, u8)> = VecDeque::new();
        queue.push_back((root.to_string(), 0));
        let mut hits = Vec::new();

        while let Some((current, level)) = queue.pop_front() {
            if level >= depth {
                continue;
            }
            let edges = self.incident_edges(&current, direction).await?;
            for (edge, neighbor) in edges {
                if let Some(types) = types {
                    if !types.contains(&edge.relationship_type) {
                        continue;
                    }
                }
                if visited.contains(&neighbor) {
                    continue;
                }
                visited.insert(neighbor.clone());
                if let Some(memory) = self.store.get(&neighbor).await? {
                    hits.push(TraversalHit {
                        memory,
                        edge,
                        depth: level + 1,
                    });
                    queue.push_back((neighbor, level + 1));
                }
            }
        }

        Ok(hits)
    }

    /// Same traversal, but records one node per visited id with every
    /// incident edge; stops early at `max_nodes`.
    pub async fn graph(&self, root: &str, max_depth: u8, max_nodes: usize) -> Result<Graph> {
        let max_depth = max_depth.clamp(1, 3);
        let max_nodes = max_nodes.clamp(1, MAX_GRAPH_NODES);

        let root_entry = self
            .store
            .get(root)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("memory {root}")))?;

        let mut nodes: HashMap<String, GraphNode> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.to_string());
        nodes.insert(
            root.to_string(),
            GraphNode {
                memory: root_entry,
                edges: Vec::new(),
                depth: 0,
            },
        );

        let mut queue: VecDeque<(String, u8)> = VecDeque::new();
        queue.push_back((root.to_string(), 0));
        let mut max_depth_reached = 0u8;

        while let Some((current, level)) = queue.pop_front() {
            if level >= max_depth || nodes.len() >= max_nodes {
                continue;
            }
            let edges = self.incident_edges(&current, TraverseDirection::Both).await?;
            if let Some(node) = nodes.get_mut(&current) {
                node.edges.extend(edges.iter().map(|(e, _)| e.clone()));
            }
            for (edge, neighbor) in edges {
                if nodes.len() >= max_nodes {
                    break;
                }
                if visited.contains(&neighbor) {
                    continue;
                }
                visited.insert(neighbor.clone());
                if let Some(memory) = self.store.get(&neighbor).await? {
                    let depth = level + 1;
                    max_depth_reached = max_depth_reached.max(depth);
                    nodes.insert(
                        neighbor.clone(),
                        GraphNode {
                            memory,
                            edges: vec![edge],
                            depth,
                        },
                    );
                    queue.push_back((neighbor, depth));
                }
            }
        }

        Ok(Graph {
            root: root.to_string(),
            total_nodes: nodes.len(),
            max_depth_reached,
            nodes,
        })
    }

    /// Edges incident to `memory_id`, read from **both** the workspace and
    /// global scope indices.
    ///
    /// An edge's scope is the conjunction of its endpoints' globality (see
    /// `create`): a cross-scope edge (one global endpoint, one workspace
    /// endpoint) lives entirely under the workspace scope, even though one
    /// of its endpoints is itself global. Deriving the read scope from the
    /// queried memory's own globality alone would make such an edge
    /// invisible from its global endpoint's side, so both candidate scopes
    /// are always checked and de-duplicated by edge id.
    async fn incident_edges(
        &self,
        memory_id: &str,
        direction: TraverseDirection,
    ) -> Result<Vec<(MemoryRelationship, String)>> {
        if self.store.get(memory_id).await?.is_none() {
            return Ok(Vec::new());
        }

        let candidate_scopes = [
            ScopeId::Workspace(self.store.workspace_id().to_string()),
            ScopeId::Global,
        ];

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for candidate_scope in candidate_scopes {
            let scope = candidate_scope.as_scope();
            if matches!(direction, TraverseDirection::Out | TraverseDirection::Both) {
                for id in self
                    .storage()
                    .smembers(&keys::memory_relationships_out(scope, memory_id))
                    .await?
                {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    if let Some(edge) = self.fetch_edge(scope, &id).await? {
                        let neighbor = edge.to_memory_id.clone();
                        out.push((edge, neighbor));
                    }
                }
            }
            if matches!(direction, TraverseDirection::In | TraverseDirection::Both) {
                for id in self
                    .storage()
                    .smembers(&keys::memory_relationships_in(scope, memory_id))
                    .await?
                {
                    if !seen.insert(id.clone()) {
                        continue;
                    }
                    if let Some(edge) = self.fetch_edge(scope, &id).await? {
                        let neighbor = edge.from_memory_id.clone();
                        out.push((edge, neighbor));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Remove an edge from every index; scope is determined by the
    /// **source** endpoint.
    pub async fn delete(&self, edge_id: &str) -> Result<bool> {
        for candidate_scope in [
            ScopeId::Workspace(self.store.workspace_id().to_string()),
            ScopeId::Global,
        ] {
            let scope = candidate_scope.as_scope();
            if let Some(edge) = self.fetch_edge(scope, edge_id).await? {
                let mut pipeline = Pipeline::new();
                pipeline.srem(keys::relationships_all(scope), vec![edge_id.to_string()]);
                pipeline.srem(
                    keys::memory_relationships_out(scope, &edge.from_memory_id),
                    vec![edge_id.to_string()],
                );
                pipeline.srem(
                    keys::memory_relationships_in(scope, &edge.to_memory_id),
                    vec![edge_id.to_string()],
                );
                pipeline.del(keys::relationship(scope, edge_id));
                self.storage().exec(pipeline).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
