//! Benchmarks for `MemoryStore::search`, the hottest read path.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use memory_engine::embedding::{EmbeddingBuilder, NoopKeywordExtractor};
use memory_engine::storage::InMemoryStorage;
use memory_engine::types::{ContextType, CreateMemoryInput, WorkspaceMode};
use memory_engine::{MemoryStore, SearchParams};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn setup_store_with_data(rt: &Runtime, count: usize) -> MemoryStore {
    let store = MemoryStore::new(
        Arc::new(InMemoryStorage::new()),
        Arc::new(EmbeddingBuilder::new(Box::new(NoopKeywordExtractor))),
        "bench-ws".to_string(),
        WorkspaceMode::Isolated,
    );

    let sample_contents = [
        "Authentication using JWT tokens and refresh mechanism",
        "Database migration strategy for PostgreSQL",
        "React component lifecycle and hooks optimization",
        "API rate limiting implementation with Redis",
        "Docker container orchestration with Kubernetes",
        "GraphQL schema design best practices",
        "Microservices communication patterns",
        "CI/CD pipeline configuration with GitHub Actions",
        "Memory leak detection in Node.js applications",
        "Rust ownership and borrowing concepts",
    ];

    rt.block_on(async {
        for i in 0..count {
            let content = format!(
                "{} - variation {} with additional context about software development",
                sample_contents[i % sample_contents.len()],
                i
            );
            store
                .create(CreateMemoryInput {
                    content,
                    context_type: ContextType::Information,
                    summary: None,
                    tags: vec![format!("topic{}", i % 5), "development".to_string()],
                    importance: (i % 10) as u8 + 1,
                    session_id: None,
                    ttl_seconds: None,
                    category: None,
                })
                .await
                .unwrap();
        }
    });

    store
}

fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = setup_store_with_data(&rt, 1000);

    let mut group = c.benchmark_group("memory_search");
    let queries = [
        "authentication",
        "database migration",
        "React hooks optimization",
        "API rate limiting Redis",
    ];

    for query in queries {
        group.bench_with_input(BenchmarkId::new("query", query), &query, |b, query| {
            b.iter(|| {
                rt.block_on(async {
                    store
                        .search(SearchParams {
                            query: black_box(query).to_string(),
                            limit: 10,
                            min_importance: None,
                            context_types: None,
                            category: None,
                            fuzzy: false,
                            regex: false,
                            scope_override: None,
                        })
                        .await
                        .unwrap()
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
