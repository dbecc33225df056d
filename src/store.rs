//! Persistence interfaces for captures and schemas
//!
//! The engine treats persistence as an external collaborator. The in-memory
//! implementations below back the tests and embedders that do not bring
//! their own database.

use crate::capture::CapturedExchange;
use crate::error::Result;
use crate::schema::Schema;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Append-only persistence for captured exchanges.
#[async_trait]
pub trait TrafficStore: Send + Sync {
  /// Persists one exchange. Called exactly once per capture.
  async fn save(&self, exchange: &CapturedExchange) -> Result<()>;
  /// Fetches an exchange by id.
  async fn get(&self, id: &str) -> Result<Option<CapturedExchange>>;
  /// Lists exchanges newest-first; a zero limit means no limit.
  async fn list(&self, limit: usize) -> Result<Vec<CapturedExchange>>;
  /// Lists exchanges for one project tag, newest-first; a zero limit means
  /// no limit.
  async fn list_by_project(&self, tag: &str, limit: usize) -> Result<Vec<CapturedExchange>>;
  /// Deletes all stored exchanges.
  async fn clear(&self) -> Result<()>;
}

/// Persistence for reconstructed or imported schemas.
#[async_trait]
pub trait SchemaStore: Send + Sync {
  /// Persists a schema together with the raw bytes it was parsed from.
  async fn save(&self, schema: &Schema, raw: &[u8]) -> Result<()>;
  /// Fetches a schema by id.
  async fn get(&self, id: &str) -> Result<Option<Schema>>;
  /// Deletes a schema by id.
  async fn delete(&self, id: &str) -> Result<()>;
  /// Lists all schemas, newest-first.
  async fn list(&self) -> Result<Vec<Schema>>;
}

/// In-memory [`TrafficStore`] keeping exchanges in insertion order.
#[derive(Default)]
pub struct MemoryTrafficStore {
  exchanges: RwLock<Vec<CapturedExchange>>,
}

impl MemoryTrafficStore {
  /// Create an empty store.
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl TrafficStore for MemoryTrafficStore {
  async fn save(&self, exchange: &CapturedExchange) -> Result<()> {
    self.exchanges.write().await.push(exchange.clone());
    Ok(())
  }

  async fn get(&self, id: &str) -> Result<Option<CapturedExchange>> {
    Ok(self.exchanges.read().await.iter().find(|e| e.id == id).cloned())
  }

  async fn list(&self, limit: usize) -> Result<Vec<CapturedExchange>> {
    let mut all: Vec<CapturedExchange> = self.exchanges.read().await.clone();
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if limit > 0 {
      all.truncate(limit);
    }
    Ok(all)
  }

  async fn list_by_project(&self, tag: &str, limit: usize) -> Result<Vec<CapturedExchange>> {
    let mut matching: Vec<CapturedExchange> = self
      .exchanges
      .read()
      .await
      .iter()
      .filter(|e| e.project_tag.as_deref() == Some(tag))
      .cloned()
      .collect();
    matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if limit > 0 {
      matching.truncate(limit);
    }
    Ok(matching)
  }

  async fn clear(&self) -> Result<()> {
    self.exchanges.write().await.clear();
    Ok(())
  }
}

/// In-memory [`SchemaStore`].
#[derive(Default)]
pub struct MemorySchemaStore {
  schemas: RwLock<HashMap<String, (Schema, Vec<u8>)>>,
}

impl MemorySchemaStore {
  /// Create an empty store.
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
  async fn save(&self, schema: &Schema, raw: &[u8]) -> Result<()> {
    self
      .schemas
      .write()
      .await
      .insert(schema.id.clone(), (schema.clone(), raw.to_vec()));
    Ok(())
  }

  async fn get(&self, id: &str) -> Result<Option<Schema>> {
    Ok(self.schemas.read().await.get(id).map(|(s, _)| s.clone()))
  }

  async fn delete(&self, id: &str) -> Result<()> {
    self.schemas.write().await.remove(id);
    Ok(())
  }

  async fn list(&self) -> Result<Vec<Schema>> {
    let mut all: Vec<Schema> = self
      .schemas
      .read()
      .await
      .values()
      .map(|(s, _)| s.clone())
      .collect();
    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(all)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use bytes::Bytes;
  use time::OffsetDateTime;

  fn exchange(id: &str, tag: Option<&str>, seconds: i64) -> CapturedExchange {
    CapturedExchange {
      id: id.to_string(),
      timestamp: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds),
      method: "POST".to_string(),
      url: "https://api.example.com/graphql".to_string(),
      host: "api.example.com".to_string(),
      headers: HashMap::new(),
      operation_name: String::new(),
      query: "{ me { id } }".to_string(),
      variables: None,
      response_code: 200,
      response_body: Bytes::new(),
      fingerprint: String::new(),
      project_tag: tag.map(str::to_string),
    }
  }

  #[tokio::test]
  async fn lists_newest_first_with_limit() {
    let store = MemoryTrafficStore::new();
    store.save(&exchange("a", None, 1)).await.unwrap();
    store.save(&exchange("b", None, 3)).await.unwrap();
    store.save(&exchange("c", None, 2)).await.unwrap();

    let all = store.list(0).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["b", "c", "a"]);

    let top = store.list(2).await.unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].id, "b");
  }

  #[tokio::test]
  async fn filters_by_project_tag() {
    let store = MemoryTrafficStore::new();
    store.save(&exchange("a", Some("p1"), 1)).await.unwrap();
    store.save(&exchange("b", Some("p2"), 2)).await.unwrap();
    store.save(&exchange("c", Some("p1"), 3)).await.unwrap();

    let p1 = store.list_by_project("p1", 0).await.unwrap();
    let ids: Vec<&str> = p1.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["c", "a"]);

    assert!(store.get("b").await.unwrap().is_some());
    store.clear().await.unwrap();
    assert!(store.list(0).await.unwrap().is_empty());
  }
}
