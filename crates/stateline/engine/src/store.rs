//! External collaborator boundaries
//!
//! The engine never talks to real infrastructure directly. Item readers
//! and result writers go through [`ObjectStore`]; Task states go through
//! [`TaskInvoker`]. Both ship with in-process implementations used by
//! tests and embeddings that do not need real backends.

use async_trait::async_trait;
use serde_json::Value;
use stateline_types::StateError;
use std::collections::HashMap;
use std::sync::Mutex;

/// Failure talking to an object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("store failure: {0}")]
    Backend(String),
}

/// Byte-blob storage addressed by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;
}

/// In-process object store backed by a map.
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous insert for test setup.
    pub fn seed(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Synchronous read for assertions.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Keys currently stored under `bucket`, sorted.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .expect("store lock poisoned")
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.seed(bucket, key, body);
        Ok(())
    }
}

/// Dispatch of Task-state work to whatever owns the named resource.
///
/// A failed invocation reports a `StateError` whose name drives
/// Retry/Catch selection, exactly like engine-raised errors.
#[async_trait]
pub trait TaskInvoker: Send + Sync {
    async fn invoke(&self, resource: &str, input: Value) -> Result<Value, StateError>;
}

/// Closure-backed invoker for tests and embeddings.
///
/// Stateful behavior (fail once, then succeed) is expressed with
/// interior mutability inside the closure's captures.
pub struct FnInvoker<F>
where
    F: Fn(&str, Value) -> Result<Value, StateError> + Send + Sync,
{
    handler: F,
}

impl<F> FnInvoker<F>
where
    F: Fn(&str, Value) -> Result<Value, StateError> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> TaskInvoker for FnInvoker<F>
where
    F: Fn(&str, Value) -> Result<Value, StateError> + Send + Sync,
{
    async fn invoke(&self, resource: &str, input: Value) -> Result<Value, StateError> {
        (self.handler)(resource, input)
    }
}

/// Invoker that rejects every resource; the default when an embedding
/// runs definitions without Task states.
pub struct NullInvoker;

#[async_trait]
impl TaskInvoker for NullInvoker {
    async fn invoke(&self, resource: &str, _input: Value) -> Result<Value, StateError> {
        Err(StateError::task_failed(format!(
            "no invoker registered for resource '{}'",
            resource
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryStore::new();
        store.put("bucket", "key", b"payload".to_vec()).await.unwrap();
        assert_eq!(store.get("bucket", "key").await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get("bucket", "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fn_invoker_dispatch() {
        let invoker = FnInvoker::new(|resource, input| {
            assert_eq!(resource, "arn:test:double");
            Ok(json!(input.as_i64().unwrap() * 2))
        });
        let out = invoker.invoke("arn:test:double", json!(21)).await.unwrap();
        assert_eq!(out, json!(42));
    }

    #[tokio::test]
    async fn test_null_invoker_fails() {
        let err = NullInvoker.invoke("arn:any", json!({})).await.unwrap_err();
        assert_eq!(err.error, "States.TaskFailed");
    }
}
