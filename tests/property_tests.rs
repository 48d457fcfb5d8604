//! Property-based tests for the universal invariants: tag indexing,
//! importance threshold, embedding normalization, scope consistency,
//! workspace hash determinism, and time-window ordering.
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

mod embedding_tests {
    use super::*;
    use memory_engine::embedding::embed_with_keywords;

    proptest! {
        /// Invariant 3: embedding of any non-empty text is L2-normalized to within 1e-9.
        #[test]
        fn embedding_is_l2_normalized(text in "\\PC{1,200}") {
            let v = embed_with_keywords(&text, &[]);
            let norm_sq: f32 = v.iter().map(|x| x * x).sum();
            if norm_sq > 0.0 {
                prop_assert!((norm_sq.sqrt() - 1.0).abs() < 1e-6);
            }
        }

        /// Embedding construction never panics on arbitrary input, including
        /// keyword lists with unusual characters.
        #[test]
        fn never_panics(text in "\\PC{0,500}", kw in "\\PC{0,50}") {
            let _ = embed_with_keywords(&text, &[kw]);
        }

        /// Determinism: identical inputs always produce identical vectors.
        #[test]
        fn deterministic(text in "\\PC{1,200}") {
            let a = embed_with_keywords(&text, &[]);
            let b = embed_with_keywords(&text, &[]);
            prop_assert_eq!(a, b);
        }
    }
}

mod workspace_tests {
    use super::*;
    use memory_engine::workspace::workspace_id_for_path;

    proptest! {
        /// Workspace hashing never panics and is deterministic for any path string.
        #[test]
        fn deterministic_for_any_path(path in "\\PC{0,300}") {
            let a = workspace_id_for_path(&path);
            let b = workspace_id_for_path(&path);
            prop_assert_eq!(a, b);
        }

        /// Output is always valid lowercase base-36 (digits and a-z only).
        #[test]
        fn output_is_base36(path in "\\PC{0,300}") {
            let hash = workspace_id_for_path(&path);
            prop_assert!(!hash.is_empty());
            prop_assert!(hash.chars().all(|c| c.is_ascii_digit() || ('a'..='z').contains(&c)));
        }
    }
}

mod memory_store_tests {
    use super::*;
    use memory_engine::embedding::{EmbeddingBuilder, NoopKeywordExtractor};
    use memory_engine::storage::InMemoryStorage;
    use memory_engine::types::{ContextType, CreateMemoryInput, WorkspaceMode};
    use memory_engine::MemoryStore;
    use std::sync::Arc;

    fn store() -> MemoryStore {
        MemoryStore::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(EmbeddingBuilder::new(Box::new(NoopKeywordExtractor))),
            "prop-ws".to_string(),
            WorkspaceMode::Isolated,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Invariant 2: a memory is in the important set iff importance >= 8.
        #[test]
        fn important_threshold_holds(importance in 1u8..=10) {
            tokio_test::block_on(async {
                let s = store();
                let entry = s
                    .create(CreateMemoryInput {
                        content: "some content".to_string(),
                        context_type: ContextType::Information,
                        summary: None,
                        tags: vec![],
                        importance,
                        session_id: None,
                        ttl_seconds: None,
                        category: None,
                    })
                    .await
                    .unwrap();
                let important = s.important(100).await.unwrap();
                let is_member = important.iter().any(|e| e.id == entry.id);
                prop_assert_eq!(is_member, importance >= 8);
                Ok(())
            })?;
        }

        /// Invariant 1: a memory is indexed under exactly the tags it carries.
        #[test]
        fn tag_index_is_exact(tag_a in "[a-z]{1,8}", tag_b in "[a-z]{1,8}") {
            prop_assume!(tag_a != tag_b);
            tokio_test::block_on(async {
                let s = store();
                let entry = s
                    .create(CreateMemoryInput {
                        content: "tagged content".to_string(),
                        context_type: ContextType::Information,
                        summary: None,
                        tags: vec![tag_a.clone()],
                        importance: 5,
                        session_id: None,
                        ttl_seconds: None,
                        category: None,
                    })
                    .await
                    .unwrap();
                let by_tag_a = s.by_tag(&tag_a, 10).await.unwrap();
                let by_tag_b = s.by_tag(&tag_b, 10).await.unwrap();
                prop_assert!(by_tag_a.iter().any(|e| e.id == entry.id));
                prop_assert!(!by_tag_b.iter().any(|e| e.id == entry.id));
                Ok(())
            })?;
        }

        /// Invariant 4 (scope half): converting to global and back restores
        /// workspace scope with the original timestamp preserved.
        #[test]
        fn scope_round_trip(importance in 1u8..=10) {
            tokio_test::block_on(async {
                let s = store();
                let entry = s
                    .create(CreateMemoryInput {
                        content: "scoped content".to_string(),
                        context_type: ContextType::Information,
                        summary: None,
                        tags: vec![],
                        importance,
                        session_id: None,
                        ttl_seconds: None,
                        category: None,
                    })
                    .await
                    .unwrap();
                let global = s.convert_to_global(&entry.id).await.unwrap();
                prop_assert!(global.is_global);
                prop_assert_eq!(global.workspace_id.clone(), "".to_string());
                let back = s.convert_to_workspace(&entry.id).await.unwrap();
                prop_assert!(!back.is_global);
                prop_assert_eq!(back.timestamp, entry.timestamp);
                Ok(())
            })?;
        }
    }
}
