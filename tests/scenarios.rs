//! End-to-end scenarios, one per documented acceptance case.

use memory_engine::embedding::{EmbeddingBuilder, NoopKeywordExtractor};
use memory_engine::relationship::RelationshipEngine;
use memory_engine::rlm::RLMCoordinator;
use memory_engine::storage::InMemoryStorage;
use memory_engine::types::{
    ChainStatus, ContextType, CreateMemoryInput, RelationshipType, Strategy, UpdateMemoryInput,
    WorkspaceMode,
};
use memory_engine::version::VersionEngine;
use memory_engine::workspace::{workspace_id_for_path, ScopeRead};
use memory_engine::{MemoryStore, SearchParams};
use std::sync::Arc;

fn store_for(workspace_path: &str, mode: WorkspaceMode) -> MemoryStore {
    MemoryStore::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(EmbeddingBuilder::new(Box::new(NoopKeywordExtractor))),
        workspace_id_for_path(workspace_path),
        mode,
    )
}

fn directive_input(content: &str, importance: u8, tags: Vec<&str>) -> CreateMemoryInput {
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

/// S1 — create, search, delete.
#[tokio::test]
async fn s1_create_search_delete() {
    let store = store_for("/tmp/proj", WorkspaceMode::Isolated);
    let entry = store
        .create(directive_input(
            "Always use ULIDs for IDs",
            9,
            vec!["id", "conv"],
        ))
        .await
        .unwrap();

    assert!(!entry.is_global);
    assert_eq!(entry.workspace_id, workspace_id_for_path("/tmp/proj"));

    assert!(store.important(8).await.unwrap().iter().any(|e| e.id == entry.id));
    assert!(store
        .by_type(ContextType::Directive, 10)
        .await
        .unwrap()
        .iter()
        .any(|e| e.id == entry.id));
    assert!(store.by_tag("id", 10).await.unwrap().iter().any(|e| e.id == entry.id));

    let hits = store
        .search(SearchParams {
            query: "use unique identifiers".to_string(),
            limit: 5,
            min_importance: None,
            context_types: None,
            category: None,
            fuzzy: false,
            regex: false,
            scope_override: None,
        })
        .await
        .unwrap();
    assert!(hits.iter().any(|(e, score)| e.id == entry.id && *score > 0.0));

    assert!(store.delete(&entry.id).await.unwrap());
    assert!(store.important(8).await.unwrap().is_empty());
    assert!(store.by_type(ContextType::Directive, 10).await.unwrap().is_empty());
    assert!(store.by_tag("id", 10).await.unwrap().is_empty());
    assert!(store.get(&entry.id).await.unwrap().is_none());
}

/// S2 — scope conversion round-trip.
#[tokio::test]
async fn s2_scope_conversion_round_trip() {
    let store = store_for("/tmp/proj", WorkspaceMode::Isolated);
    let entry = store
        .create(directive_input("Always use ULIDs for IDs", 9, vec!["id", "conv"]))
        .await
        .unwrap();

    let global = store.convert_to_global(&entry.id).await.unwrap();
    assert!(global.is_global);
    assert_eq!(global.workspace_id, "");

    let back = store.convert_to_workspace(&entry.id).await.unwrap();
    assert!(!back.is_global);
    assert_eq!(back.timestamp, entry.timestamp);
}

/// S3 — merge chooses the highest-importance survivor.
#[tokio::test]
async fn s3_merge_chooses_highest_importance() {
    let store = store_for("/tmp/proj", WorkspaceMode::Isolated);
    let m1 = store.create(directive_input("one", 5, vec!["a"])).await.unwrap();
    let m2 = store.create(directive_input("two", 8, vec!["b"])).await.unwrap();
    let m3 = store.create(directive_input("three", 3, vec!["a", "c"])).await.unwrap();

    let survivor = store
        .merge(vec![m1.id.clone(), m2.id.clone(), m3.id.clone()], None)
        .await
        .unwrap();

    assert_eq!(survivor.id, m2.id);
    assert!(survivor.content.contains("one"));
    assert!(survivor.content.contains("three"));
    assert!(survivor.content.contains("\n\n--- Merged content ---\n"));
    let mut tags = survivor.tags.clone();
    tags.sort();
    assert_eq!(tags, vec!["a", "b", "c"]);
    assert!(store.get(&m1.id).await.unwrap().is_none());
    assert!(store.get(&m3.id).await.unwrap().is_none());
}

/// S4 — hybrid mode biases global results down relative to workspace ones.
#[tokio::test]
async fn s4_hybrid_bias_favors_workspace() {
    let store = store_for("/tmp/proj", WorkspaceMode::Hybrid);
    let local = store
        .create(directive_input("shared wording about deployment", 5, vec![]))
        .await
        .unwrap();
    let global_candidate = store
        .create(directive_input("shared wording about deployment", 5, vec![]))
        .await
        .unwrap();
    let global = store.convert_to_global(&global_candidate.id).await.unwrap();

    let hits = store
        .search(SearchParams {
            query: "shared wording about deployment".to_string(),
            limit: 10,
            min_importance: None,
            context_types: None,
            category: None,
            fuzzy: false,
            regex: false,
            scope_override: Some(ScopeRead::Both),
        })
        .await
        .unwrap();

    let local_score = hits.iter().find(|(e, _)| e.id == local.id).unwrap().1;
    let global_score = hits.iter().find(|(e, _)| e.id == global.id).unwrap().1;
    assert!(local_score > global_score);
}

/// S5 — relationship graph traversal respects the depth cap.
#[tokio::test]
async fn s5_graph_depth_cap() {
    let store = store_for("/tmp/proj", WorkspaceMode::Isolated);
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(store.create(directive_input(&format!("m{i}"), 5, vec![])).await.unwrap());
    }
    let engine = RelationshipEngine::new(&store);
    for pair in ids.windows(2) {
        engine
            .create(&pair[0].id, &pair[1].id, RelationshipType::ParentOf, None)
            .await
            .unwrap();
    }

    let graph = engine.graph(&ids[0].id, 2, 50).await.unwrap();
    assert_eq!(graph.total_nodes, 3);
    assert_eq!(graph.max_depth_reached, 2);
    assert!(graph.nodes.contains_key(&ids[0].id));
    assert!(graph.nodes.contains_key(&ids[1].id));
    assert!(graph.nodes.contains_key(&ids[2].id));
    assert!(!graph.nodes.contains_key(&ids[3].id));
}

/// S6 — rollback restores content and grows history by exactly 2.
#[tokio::test]
async fn s6_rollback_history_growth() {
    let store = store_for("/tmp/proj", WorkspaceMode::Isolated);
    let entry = store
        .create(CreateMemoryInput {
            content: "v1".to_string(),
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

    store
        .update(&entry.id, UpdateMemoryInput { content: Some("v2".into()), ..Default::default() })
        .await
        .unwrap();
    store
        .update(&entry.id, UpdateMemoryInput { content: Some("v3".into()), ..Default::default() })
        .await
        .unwrap();

    let engine = VersionEngine::new(&store);
    let history = engine.history(&entry.id).await.unwrap();
    assert_eq!(history.len(), 2);

    let v1_version_id = history.last().unwrap().version_id.clone();
    let rolled_back = engine.rollback(&entry.id, &v1_version_id, false).await.unwrap();
    assert_eq!(rolled_back.content, "v1");

    let history_after = engine.history(&entry.id).await.unwrap();
    assert_eq!(history_after.len(), 4);
}

/// S7 — RLM chain strategy selection, decomposition, and completion.
#[tokio::test]
async fn s7_rlm_chain_lifecycle() {
    let coordinator = RLMCoordinator::new(Arc::new(InMemoryStorage::new()), "ws1".to_string());

    let context = "line with no match\n".repeat(500) + "ERROR one\nWARN two\n";
    let chain = coordinator
        .create_chain("Find all ERROR lines".to_string(), context, None)
        .await
        .unwrap();
    assert_eq!(chain.strategy, Strategy::Filter);

    let subtasks = coordinator
        .decompose(
            &chain.chain_id,
            vec![
                ("scan part 1".to_string(), Some("ERROR".to_string())),
                ("scan part 2".to_string(), Some("WARN".to_string())),
                ("summarize".to_string(), None),
            ],
        )
        .await
        .unwrap();
    assert_eq!(subtasks.len(), 3);

    let snippet = coordinator
        .inject_snippet(&chain.chain_id, "ERROR|WARN", 1000)
        .await
        .unwrap();
    assert!(snippet.snippet.contains("ERROR"));
    assert!(snippet.snippet.contains("WARN"));
    assert!(!snippet.snippet.contains("no match"));
    assert!(snippet.tokens_used <= 1000);

    for subtask in &subtasks {
        coordinator
            .update_subtask_result(
                &chain.chain_id,
                &subtask.id,
                "done".to_string(),
                None,
                Some(10),
                None,
            )
            .await
            .unwrap();
    }

    coordinator
        .store_merged_results(&chain.chain_id, "all errors found".to_string(), 0.9, 1.0)
        .await
        .unwrap();
    coordinator
        .update_status(&chain.chain_id, ChainStatus::Completed, None)
        .await
        .unwrap();

    let chains = coordinator.list_chains().await.unwrap();
    assert!(chains.iter().any(|c| c.chain_id == chain.chain_id));
    let refreshed = coordinator.get_chain(&chain.chain_id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, ChainStatus::Completed);
}
