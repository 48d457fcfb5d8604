//! Core data types for the memory engine.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fixed dimensionality of every stored embedding.
pub const EMBEDDING_VECTOR_SIZE: usize = 128;

/// Classification of a memory entry's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Directive,
    Information,
    Heading,
    Decision,
    CodePattern,
    Requirement,
    Error,
    Todo,
    Insight,
    Preference,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Directive => "directive",
            ContextType::Information => "information",
            ContextType::Heading => "heading",
            ContextType::Decision => "decision",
            ContextType::CodePattern => "code_pattern",
            ContextType::Requirement => "requirement",
            ContextType::Error => "error",
            ContextType::Todo => "todo",
            ContextType::Insight => "insight",
            ContextType::Preference => "preference",
        }
    }
}

impl std::str::FromStr for ContextType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "directive" => Ok(ContextType::Directive),
            "information" => Ok(ContextType::Information),
            "heading" => Ok(ContextType::Heading),
            "decision" => Ok(ContextType::Decision),
            "code_pattern" => Ok(ContextType::CodePattern),
            "requirement" => Ok(ContextType::Requirement),
            "error" => Ok(ContextType::Error),
            "todo" => Ok(ContextType::Todo),
            "insight" => Ok(ContextType::Insight),
            "preference" => Ok(ContextType::Preference),
            other => Err(format!("unknown context_type: {other}")),
        }
    }
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Visibility domain a memory or relationship belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    #[serde(rename = "isolated")]
    Isolated,
    Hybrid,
    Global,
}

impl Default for WorkspaceMode {
    fn default() -> Self {
        WorkspaceMode::Isolated
    }
}

impl std::str::FromStr for WorkspaceMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(WorkspaceMode::Isolated),
            "hybrid" => Ok(WorkspaceMode::Hybrid),
            "global" => Ok(WorkspaceMode::Global),
            other => Err(format!("unknown workspace_mode: {other}")),
        }
    }
}

/// A single structured memory: the unit persisted, indexed and searched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub timestamp: i64,
    pub context_type: ContextType,
    pub content: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub importance: u8,
    pub session_id: Option<String>,
    pub embedding: Vec<f32>,
    pub ttl_seconds: Option<u64>,
    pub expires_at: Option<i64>,
    pub is_global: bool,
    pub workspace_id: String,
    pub category: Option<String>,
}

impl MemoryEntry {
    pub fn derive_summary(content: &str) -> String {
        if content.chars().count() > 100 {
            let truncated: String = content.chars().take(100).collect();
            format!("{truncated}…")
        } else {
            content.to_string()
        }
    }
}

/// Input payload for creating a memory, before id/embedding/indices are derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub content: String,
    pub context_type: ContextType,
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: u8,
    pub session_id: Option<String>,
    pub ttl_seconds: Option<u64>,
    pub category: Option<String>,
}

fn default_importance() -> u8 {
    5
}

/// Fields a caller may change on an existing memory; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemoryInput {
    pub content: Option<String>,
    pub context_type: Option<ContextType>,
    pub summary: Option<String>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<u8>,
    pub category: Option<String>,
}

/// A named grouping of memories created during one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub session_name: String,
    pub created_at: i64,
    pub memory_count: u64,
    pub summary: Option<String>,
    pub memory_ids: Vec<String>,
}

/// Kind of typed directed edge between two memories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    RelatesTo,
    ParentOf,
    ChildOf,
    References,
    Supersedes,
    Implements,
    ExampleOf,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::RelatesTo => "relates_to",
            RelationshipType::ParentOf => "parent_of",
            RelationshipType::ChildOf => "child_of",
            RelationshipType::References => "references",
            RelationshipType::Supersedes => "supersedes",
            RelationshipType::Implements => "implements",
            RelationshipType::ExampleOf => "example_of",
        }
    }
}

impl std::str::FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "relates_to" => Ok(RelationshipType::RelatesTo),
            "parent_of" => Ok(RelationshipType::ParentOf),
            "child_of" => Ok(RelationshipType::ChildOf),
            "references" => Ok(RelationshipType::References),
            "supersedes" => Ok(RelationshipType::Supersedes),
            "implements" => Ok(RelationshipType::Implements),
            "example_of" => Ok(RelationshipType::ExampleOf),
            other => Err(format!("unknown relationship_type: {other}")),
        }
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed directed edge between two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRelationship {
    pub id: String,
    pub from_memory_id: String,
    pub to_memory_id: String,
    pub relationship_type: RelationshipType,
    pub created_at: String,
    pub metadata: Option<serde_json::Value>,
}

/// Direction to walk a relationship graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraverseDirection {
    Out,
    In,
    Both,
}

/// Who produced a version snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionAuthor {
    User,
    System,
}

/// Immutable snapshot of a memory's mutable fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryVersion {
    pub version_id: String,
    pub memory_id: String,
    pub created_at: i64,
    pub created_by: VersionAuthor,
    pub change_reason: Option<String>,
    pub content: String,
    pub context_type: ContextType,
    pub importance: u8,
    pub tags: Vec<String>,
    pub summary: Option<String>,
}

/// Parameterized content a new memory can be instantiated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTemplate {
    pub template_id: String,
    pub name: String,
    pub description: Option<String>,
    pub context_type: ContextType,
    pub content_template: String,
    pub default_tags: Vec<String>,
    pub default_importance: u8,
    pub is_builtin: bool,
    pub created_at: i64,
}

/// Status of an RLM execution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    Active,
    Completed,
    Failed,
}

/// Decomposition strategy selected for an RLM chain's task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Filter,
    Chunk,
    Recursive,
    Aggregate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Filter => "filter",
            Strategy::Chunk => "chunk",
            Strategy::Recursive => "recursive",
            Strategy::Aggregate => "aggregate",
        }
    }
}

/// A recursive analysis task whose oversized context is stored out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub chain_id: String,
    pub parent_chain_id: Option<String>,
    pub depth: u8,
    pub status: ChainStatus,
    pub original_task: String,
    pub context_ref: String,
    pub strategy: Strategy,
    pub estimated_tokens: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub error_message: Option<String>,
}

/// Status of one subtask within an RLM chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One ordered unit of work within an RLM chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub chain_id: String,
    pub order: u32,
    pub description: String,
    pub status: SubtaskStatus,
    pub query: Option<String>,
    pub result: Option<String>,
    pub memory_ids: Vec<String>,
    pub tokens_used: Option<u64>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Aggregated output of a completed RLM chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResults {
    pub aggregated_result: String,
    pub confidence: f32,
    pub source_coverage: f32,
    pub subtasks_completed: u32,
    pub subtasks_total: u32,
}

/// Relevant snippet extracted from a chain's stored context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub snippet: String,
    pub relevance_score: f32,
    pub tokens_used: u64,
}

/// Per-scope aggregate counters returned by `SummaryStats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_memories: u64,
    pub workspace_memories: u64,
    pub global_memories: u64,
    pub by_type: HashMap<String, u64>,
    pub distinct_tags: u64,
    pub relationship_count: u64,
    pub version_count: u64,
}
