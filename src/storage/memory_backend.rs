//! An in-process `StorageClient` implementation backed by `DashMap`s.
//!
//! This stands in for a Redis-protocol server in tests and in deployments
//! that don't need durability across process restarts — every command from
//! the trait is implemented directly, command-atomically, over in-memory
//! collections guarded by per-bucket locks.

use super::{Command, CommandResult, HealthStatus, Pipeline, StorageClient};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;

/// Newtype giving `f64` a total order (scores are never NaN in practice),
/// so scored members can live as `BTreeMap` keys without an extra crate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SortableScore(f64);

impl Eq for SortableScore {}

impl PartialOrd for SortableScore {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableScore {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Default)]
struct ZSet {
    scores: HashMap<String, f64>,
    by_score: BTreeMap<(SortableScore, String), ()>,
}

impl ZSet {
    fn insert(&mut self, member: String, score: f64) {
        if let Some(old) = self.scores.get(&member) {
            self.by_score.remove(&(SortableScore(*old), member.clone()));
        }
        self.by_score
            .insert((SortableScore(score), member.clone()), ());
        self.scores.insert(member, score);
    }

    fn remove(&mut self, member: &str) -> bool {
        if let Some(score) = self.scores.remove(member) {
            self.by_score
                .remove(&(SortableScore(score), member.to_string()));
            true
        } else {
            false
        }
    }

    fn range(&self, start: i64, stop: i64, rev: bool) -> Vec<String> {
        let members: Vec<&String> = if rev {
            self.by_score.keys().rev().map(|(_, m)| m).collect()
        } else {
            self.by_score.keys().map(|(_, m)| m).collect()
        };
        slice_by_rank(&members, start, stop)
            .into_iter()
            .cloned()
            .collect()
    }

    fn range_by_score(&self, min: f64, max: f64, rev: bool) -> Vec<String> {
        let mut out: Vec<String> = self
            .by_score
            .keys()
            .filter(|(s, _)| s.0 >= min && s.0 <= max)
            .map(|(_, m)| m.clone())
            .collect();
        if rev {
            out.reverse();
        }
        out
    }
}

fn slice_by_rank<'a, T>(items: &'a [T], start: i64, stop: i64) -> Vec<&'a T> {
    let len = items.len() as i64;
    if len == 0 {
        return Vec::new();
    }
    let norm = |i: i64| -> i64 {
        if i < 0 {
            (len + i).max(0)
        } else {
            i
        }
    };
    let start = norm(start).min(len - 1).max(0);
    let stop = norm(stop).min(len - 1);
    if stop < start {
        return Vec::new();
    }
    items[(start as usize)..=(stop as usize)].iter().collect()
}

/// In-memory `StorageClient`. Cheap to construct; intended for the default
/// deployment and for tests.
pub struct InMemoryStorage {
    hashes: DashMap<String, HashMap<String, String>>,
    sets: DashMap<String, HashSet<String>>,
    zsets: DashMap<String, ZSet>,
    strings: DashMap<String, String>,
    expirations: Mutex<HashMap<String, std::time::Instant>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            hashes: DashMap::new(),
            sets: DashMap::new(),
            zsets: DashMap::new(),
            strings: DashMap::new(),
            expirations: Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(&self, key: &str) -> bool {
        self.expirations
            .lock()
            .get(key)
            .map(|deadline| Instant::now() >= *deadline)
            .unwrap_or(false)
    }

    fn apply(&self, command: Command) -> CommandResult {
        match command {
            Command::HSet(key, fields) => {
                let mut entry = self.hashes.entry(key).or_default();
                for (f, v) in fields {
                    entry.insert(f, v);
                }
                CommandResult::Ok
            }
            Command::Del(key) => {
                let mut removed = 0;
                if self.hashes.remove(&key).is_some() {
                    removed += 1;
                }
                if self.sets.remove(&key).is_some() {
                    removed += 1;
                }
                if self.zsets.remove(&key).is_some() {
                    removed += 1;
                }
                if self.strings.remove(&key).is_some() {
                    removed += 1;
                }
                CommandResult::Count(removed)
            }
            Command::SAdd(key, members) => {
                let mut set = self.sets.entry(key).or_default();
                let mut added = 0;
                for m in members {
                    if set.insert(m) {
                        added += 1;
                    }
                }
                CommandResult::Count(added)
            }
            Command::SRem(key, members) => {
                if let Some(mut set) = self.sets.get_mut(&key) {
                    let mut removed = 0;
                    for m in members {
                        if set.remove(&m) {
                            removed += 1;
                        }
                    }
                    CommandResult::Count(removed)
                } else {
                    CommandResult::Count(0)
                }
            }
            Command::ZAdd(key, members) => {
                let mut zset = self.zsets.entry(key).or_default();
                for (score, member) in members {
                    zset.insert(member, score);
                }
                CommandResult::Ok
            }
            Command::ZRem(key, members) => {
                if let Some(mut zset) = self.zsets.get_mut(&key) {
                    let mut removed = 0;
                    for m in members {
                        if zset.remove(&m) {
                            removed += 1;
                        }
                    }
                    CommandResult::Count(removed)
                } else {
                    CommandResult::Count(0)
                }
            }
            Command::ZRemRangeByRank(key, start, stop) => {
                if let Some(mut zset) = self.zsets.get_mut(&key) {
                    let victims = zset.range(start, stop, false);
                    for v in &victims {
                        zset.remove(v);
                    }
                    CommandResult::Count(victims.len() as u64)
                } else {
                    CommandResult::Count(0)
                }
            }
            Command::Set(key, value) => {
                self.strings.insert(key, value);
                CommandResult::Ok
            }
            Command::Expire(key, ttl) => {
                self.expirations.lock().insert(
                    key,
                    Instant::now() + std::time::Duration::from_secs(ttl),
                );
                CommandResult::Ok
            }
        }
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<()> {
        self.apply(Command::HSet(key.to_string(), fields));
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        if self.is_expired(key) {
            return Ok(None);
        }
        Ok(self.hashes.get(key).map(|m| m.clone()))
    }

    async fn del(&self, key: &str) -> Result<u64> {
        Ok(match self.apply(Command::Del(key.to_string())) {
            CommandResult::Count(n) => n,
            CommandResult::Ok => 0,
        })
    }

    async fn sadd(&self, key: &str, members: Vec<String>) -> Result<u64> {
        Ok(match self.apply(Command::SAdd(key.to_string(), members)) {
            CommandResult::Count(n) => n,
            CommandResult::Ok => 0,
        })
    }

    async fn srem(&self, key: &str, members: Vec<String>) -> Result<u64> {
        Ok(match self.apply(Command::SRem(key.to_string(), members)) {
            CommandResult::Count(n) => n,
            CommandResult::Ok => 0,
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sunion(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut out: HashSet<String> = HashSet::new();
        for key in keys {
            if let Some(set) = self.sets.get(key) {
                out.extend(set.iter().cloned());
            }
        }
        Ok(out.into_iter().collect())
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        Ok(self.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, members: Vec<(f64, String)>) -> Result<u64> {
        let len = members.len() as u64;
        self.apply(Command::ZAdd(key.to_string(), members));
        Ok(len)
    }

    async fn zrem(&self, key: &str, members: Vec<String>) -> Result<u64> {
        Ok(match self.apply(Command::ZRem(key.to_string(), members)) {
            CommandResult::Count(n) => n,
            CommandResult::Ok => 0,
        })
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .zsets
            .get(key)
            .map(|z| z.range(start, stop, false))
            .unwrap_or_default())
    }

    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        Ok(self
            .zsets
            .get(key)
            .map(|z| z.range(start, stop, true))
            .unwrap_or_default())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        Ok(self
            .zsets
            .get(key)
            .map(|z| z.range_by_score(min, max, false))
            .unwrap_or_default())
    }

    async fn zrevrangebyscore(&self, key: &str, max: f64, min: f64) -> Result<Vec<String>> {
        Ok(self
            .zsets
            .get(key)
            .map(|z| z.range_by_score(min, max, true))
            .unwrap_or_default())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>> {
        Ok(self.zsets.get(key).and_then(|z| z.scores.get(member).copied()))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        Ok(self.zsets.get(key).map(|z| z.scores.len() as u64).unwrap_or(0))
    }

    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64> {
        Ok(
            match self.apply(Command::ZRemRangeByRank(key.to_string(), start, stop)) {
                CommandResult::Count(n) => n,
                CommandResult::Ok => 0,
            },
        )
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.is_expired(key) {
            return Ok(None);
        }
        Ok(self.strings.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.apply(Command::Set(key.to_string(), value.to_string()));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if self.is_expired(key) {
            return Ok(false);
        }
        Ok(self.hashes.contains_key(key)
            || self.sets.contains_key(key)
            || self.zsets.contains_key(key)
            || self.strings.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.apply(Command::Expire(key.to_string(), ttl_seconds));
        Ok(true)
    }

    async fn exec(&self, pipeline: Pipeline) -> Result<Vec<CommandResult>> {
        Ok(pipeline
            .commands()
            .iter()
            .cloned()
            .map(|c| self.apply(c))
            .collect())
    }

    async fn health_check(&self) -> HealthStatus {
        let start = Instant::now();
        let ok = true;
        HealthStatus {
            ok,
            latency_ms: start.elapsed().as_millis() as u64,
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_roundtrip() {
        let store = InMemoryStorage::new();
        store
            .hset("k", vec![("a".into(), "1".into())])
            .await
            .unwrap();
        let got = store.hgetall("k").await.unwrap().unwrap();
        assert_eq!(got.get("a"), Some(&"1".to_string()));
    }

    #[tokio::test]
    async fn zset_range_by_rank_and_score() {
        let store = InMemoryStorage::new();
        store
            .zadd("z", vec![(1.0, "a".into()), (2.0, "b".into()), (3.0, "c".into())])
            .await
            .unwrap();
        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            store.zrevrange("z", 0, -1).await.unwrap(),
            vec!["c", "b", "a"]
        );
        assert_eq!(
            store.zrangebyscore("z", 2.0, 3.0).await.unwrap(),
            vec!["b", "c"]
        );
    }

    #[tokio::test]
    async fn zremrangebyrank_caps_retention() {
        let store = InMemoryStorage::new();
        for i in 0..5 {
            store
                .zadd("z", vec![(i as f64, format!("m{i}"))])
                .await
                .unwrap();
        }
        store.zremrangebyrank("z", 0, -4).await.unwrap();
        assert_eq!(store.zcard("z").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn pipeline_executes_in_order() {
        let store = InMemoryStorage::new();
        let mut pipe = Pipeline::new();
        pipe.sadd("s", vec!["x".into()])
            .zadd("z", vec![(1.0, "x".into())]);
        let results = store.exec(pipe).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(store.smembers("s").await.unwrap(), vec!["x"]);
    }

    #[tokio::test]
    async fn del_removes_across_all_collection_kinds() {
        let store = InMemoryStorage::new();
        store.set("k", "v").await.unwrap();
        let removed = store.del("k").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
