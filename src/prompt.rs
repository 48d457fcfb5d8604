//! Composes "workspace context" prompt payloads from structured memory
//! sets — the text block a conversational agent prepends to its own
//! context window, grouped the same way [`crate::memory_store::MemoryStore`]
//! groups memories for retrieval (by type, then by recency within type).

use crate::types::{ContextType, MemoryEntry};
use std::collections::BTreeMap;

/// Caps how many memories of a single [`ContextType`] are rendered before
/// the section is truncated with a count of the remainder.
const MAX_PER_SECTION: usize = 10;

pub struct PromptFormatter;

impl PromptFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Render memories grouped by context type, most important first within
    /// each group, as a single Markdown-ish text block suitable for
    /// injection into an LLM system prompt.
    pub fn format_workspace_context(&self, memories: &[MemoryEntry]) -> String {
        if memories.is_empty() {
            return "No workspace memories recorded yet.".to_string();
        }

        let mut grouped: BTreeMap<ContextType, Vec<&MemoryEntry>> = BTreeMap::new();
        for m in memories {
            grouped.entry(m.context_type).or_default().push(m);
        }

        let mut out = String::from("## Workspace context\n");
        for (context_type, mut entries) in grouped {
            entries.sort_by(|a, b| b.importance.cmp(&a.importance).then(b.timestamp.cmp(&a.timestamp)));
            out.push_str(&format!("\n### {}\n", section_title(context_type)));
            for entry in entries.iter().take(MAX_PER_SECTION) {
                out.push_str(&format!(
                    "- {}\n",
                    entry.summary.clone().unwrap_or_else(|| entry.content.clone())
                ));
            }
            if entries.len() > MAX_PER_SECTION {
                out.push_str(&format!(
                    "- …and {} more\n",
                    entries.len() - MAX_PER_SECTION
                ));
            }
        }
        out
    }

    /// Short single-paragraph variant for contexts with tighter token
    /// budgets: one bullet per memory, no section headers.
    pub fn format_compact(&self, memories: &[MemoryEntry]) -> String {
        memories
            .iter()
            .map(|m| format!("- {}", m.summary.clone().unwrap_or_else(|| m.content.clone())))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for PromptFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn section_title(context_type: ContextType) -> &'static str {
    match context_type {
        ContextType::Directive => "Directives",
        ContextType::Information => "Information",
        ContextType::Heading => "Headings",
        ContextType::Decision => "Decisions",
        ContextType::CodePattern => "Code patterns",
        ContextType::Requirement => "Requirements",
        ContextType::Error => "Errors",
        ContextType::Todo => "Todos",
        ContextType::Insight => "Insights",
        ContextType::Preference => "Preferences",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryEntry;

    fn entry(content: &str, context_type: ContextType, importance: u8, ts: i64) -> MemoryEntry {
        MemoryEntry {
            id: format!("id-{ts}"),
            timestamp: ts,
            context_type,
            content: content.to_string(),
            summary: None,
            tags: vec![],
            importance,
            session_id: None,
            embedding: vec![],
            ttl_seconds: None,
            expires_at: None,
            is_global: false,
            workspace_id: "ws1".to_string(),
            category: None,
        }
    }

    #[test]
    fn empty_set_yields_placeholder_text() {
        let formatter = PromptFormatter::new();
        assert_eq!(
            formatter.format_workspace_context(&[]),
            "No workspace memories recorded yet."
        );
    }

    #[test]
    fn groups_by_type_and_orders_by_importance_then_recency() {
        let memories = vec![
            entry("low prio decision", ContextType::Decision, 3, 100),
            entry("high prio decision", ContextType::Decision, 9, 50),
            entry("a todo", ContextType::Todo, 5, 10),
        ];
        let formatter = PromptFormatter::new();
        let out = formatter.format_workspace_context(&memories);
        assert!(out.contains("### Decisions"));
        assert!(out.contains("### Todos"));
        let decision_pos = out.find("high prio decision").unwrap();
        let low_pos = out.find("low prio decision").unwrap();
        assert!(decision_pos < low_pos);
    }

    #[test]
    fn truncates_section_beyond_cap() {
        let memories: Vec<_> = (0..15)
            .map(|i| entry(&format!("item {i}"), ContextType::Information, 5, i))
            .collect();
        let formatter = PromptFormatter::new();
        let out = formatter.format_workspace_context(&memories);
        assert!(out.contains("…and 5 more"));
    }
}
