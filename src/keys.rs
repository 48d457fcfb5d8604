//! Canonical key construction for every index, per the backend key-value
//! protocol. Pure functions only — no state, no I/O.

/// Either a workspace-scoped or global key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope<'a> {
    Workspace(&'a str),
    Global,
}

impl<'a> Scope<'a> {
    fn prefix(&self) -> String {
        match self {
            Scope::Workspace(w) => format!("ws:{w}:"),
            Scope::Global => "global:".to_string(),
        }
    }
}

pub fn memory(scope: Scope, id: &str) -> String {
    format!("{}memory:{id}", scope.prefix())
}

pub fn memories_all(scope: Scope) -> String {
    format!("{}memories:all", scope.prefix())
}

pub fn memories_by_type(scope: Scope, context_type: &str) -> String {
    format!("{}memories:type:{context_type}", scope.prefix())
}

pub fn memories_by_tag(scope: Scope, tag: &str) -> String {
    format!("{}memories:tag:{tag}", scope.prefix())
}

pub fn memories_timeline(scope: Scope) -> String {
    format!("{}memories:timeline", scope.prefix())
}

pub fn memories_important(scope: Scope) -> String {
    format!("{}memories:important", scope.prefix())
}

pub fn session(scope: Scope, session_id: &str) -> String {
    format!("{}session:{session_id}", scope.prefix())
}

pub fn sessions_all(scope: Scope) -> String {
    format!("{}sessions:all", scope.prefix())
}

pub fn relationship(scope: Scope, rid: &str) -> String {
    format!("{}relationship:{rid}", scope.prefix())
}

pub fn relationships_all(scope: Scope) -> String {
    format!("{}relationships", scope.prefix())
}

pub fn memory_relationships_out(scope: Scope, id: &str) -> String {
    format!("{}memory:{id}:relationships/out", scope.prefix())
}

pub fn memory_relationships_in(scope: Scope, id: &str) -> String {
    format!("{}memory:{id}:relationships/in", scope.prefix())
}

pub fn memory_version(scope: Scope, id: &str, version_id: &str) -> String {
    format!("{}memory_version:{id}:{version_id}", scope.prefix())
}

pub fn memory_versions(scope: Scope, id: &str) -> String {
    format!("{}memory_version:versions:{id}", scope.prefix())
}

pub fn template(scope: Scope, template_id: &str) -> String {
    format!("{}template:{template_id}", scope.prefix())
}

pub fn category(scope: Scope, category: &str) -> String {
    format!("{}category:{category}", scope.prefix())
}

pub fn categories(scope: Scope) -> String {
    format!("{}categories", scope.prefix())
}

pub fn memory_category(scope: Scope, id: &str) -> String {
    format!("{}memory:{id}:category", scope.prefix())
}

pub fn rlm_chain(scope: Scope, chain_id: &str) -> String {
    format!("{}rlm:chain:{chain_id}", scope.prefix())
}

pub fn rlm_context(scope: Scope, chain_id: &str) -> String {
    format!("{}rlm:context:{chain_id}", scope.prefix())
}

pub fn rlm_subtasks(scope: Scope, chain_id: &str) -> String {
    format!("{}rlm:subtasks:{chain_id}", scope.prefix())
}

pub fn rlm_subtask(scope: Scope, chain_id: &str, subtask_id: &str) -> String {
    format!("{}rlm:subtask:{chain_id}:{subtask_id}", scope.prefix())
}

pub fn rlm_results(scope: Scope, chain_id: &str) -> String {
    format!("{}rlm:results:{chain_id}", scope.prefix())
}

pub fn rlm_executions(scope: Scope) -> String {
    format!("{}rlm:executions", scope.prefix())
}

pub fn rlm_executions_active(scope: Scope) -> String {
    format!("{}rlm:executions:active", scope.prefix())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_keys_carry_prefix() {
        assert_eq!(memory(Scope::Workspace("abc"), "m1"), "ws:abc:memory:m1");
        assert_eq!(memories_all(Scope::Workspace("abc")), "ws:abc:memories:all");
    }

    #[test]
    fn global_keys_omit_ws_prefix() {
        assert_eq!(memory(Scope::Global, "m1"), "global:memory:m1");
        assert_eq!(memories_all(Scope::Global), "global:memories:all");
    }

    #[test]
    fn rlm_keys_are_distinct() {
        let s = Scope::Workspace("w");
        let keys = [
            rlm_chain(s, "c1"),
            rlm_context(s, "c1"),
            rlm_subtasks(s, "c1"),
            rlm_results(s, "c1"),
            rlm_executions(s),
            rlm_executions_active(s),
        ];
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
    }
}
