//! Narrow capability interface over a sorted-set/hash-capable key-value
//! backend, and a staged pipeline abstraction over it.

mod memory_backend;

pub use memory_backend::InMemoryStorage;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// One staged command in a [`Pipeline`].
#[derive(Debug, Clone)]
pub enum Command {
    HSet(String, Vec<(String, String)>),
    Del(String),
    SAdd(String, Vec<String>),
    SRem(String, Vec<String>),
    ZAdd(String, Vec<(f64, String)>),
    ZRem(String, Vec<String>),
    ZRemRangeByRank(String, i64, i64),
    Set(String, String),
    Expire(String, u64),
}

/// Result of executing one staged [`Command`].
#[derive(Debug, Clone)]
pub enum CommandResult {
    Ok,
    Count(u64),
}

/// A batch of commands staged for single-shot execution.
///
/// Pipelines are **not** transactions: partial failure is possible, and
/// callers must tolerate indices that are merely best-effort consistent.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(Command::HSet(key.into(), fields));
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Del(key.into()));
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.commands.push(Command::SAdd(key.into(), members));
        self
    }

    pub fn srem(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.commands.push(Command::SRem(key.into(), members));
        self
    }

    pub fn zadd(&mut self, key: impl Into<String>, members: Vec<(f64, String)>) -> &mut Self {
        self.commands.push(Command::ZAdd(key.into(), members));
        self
    }

    pub fn zrem(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.commands.push(Command::ZRem(key.into(), members));
        self
    }

    pub fn zremrangebyrank(&mut self, key: impl Into<String>, start: i64, stop: i64) -> &mut Self {
        self.commands
            .push(Command::ZRemRangeByRank(key.into(), start, stop));
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Set(key.into(), value.into()));
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl_seconds: u64) -> &mut Self {
        self.commands.push(Command::Expire(key.into(), ttl_seconds));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

/// Capability interface over the key-value backend. Implementations may
/// wrap any Redis-protocol-compatible server; every command here must be
/// side-effect-atomic on its own.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn hset(&self, key: &str, fields: Vec<(String, String)>) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<Option<HashMap<String, String>>>;
    async fn del(&self, key: &str) -> Result<u64>;

    async fn sadd(&self, key: &str, members: Vec<String>) -> Result<u64>;
    async fn srem(&self, key: &str, members: Vec<String>) -> Result<u64>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn sunion(&self, keys: &[String]) -> Result<Vec<String>>;
    async fn scard(&self, key: &str) -> Result<u64>;

    async fn zadd(&self, key: &str, members: Vec<(f64, String)>) -> Result<u64>;
    async fn zrem(&self, key: &str, members: Vec<String>) -> Result<u64>;
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn zrevrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;
    async fn zrevrangebyscore(&self, key: &str, max: f64, min: f64) -> Result<Vec<String>>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    async fn zremrangebyrank(&self, key: &str, start: i64, stop: i64) -> Result<u64>;

    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool>;

    /// Issue every staged command in order, returning one result per
    /// command. No atomicity across commands is implied.
    async fn exec(&self, pipeline: Pipeline) -> Result<Vec<CommandResult>>;

    /// Latency-probing health check; never fails the caller's operation.
    async fn health_check(&self) -> HealthStatus;
}

/// Outcome of a [`StorageClient::health_check`] probe.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub ok: bool,
    pub latency_ms: u64,
    pub detail: Option<String>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            ok: true,
            latency_ms: 0,
            detail: None,
        }
    }
}
