use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;
use futures::{stream, stream::BoxStream, StreamExt};
use sha2::{Digest, Sha256};

use super::{ObjectRefStream, ProviderError};
use crate::{
    data_model::{ObjectRef, ProviderKind},
    utils::get_epoch_time_in_ms,
};

#[derive(Debug, Clone)]
struct MockObject {
    data: Bytes,
    storage_class: String,
    last_modified: u64,
    etag: String,
}

/// Adapter operation, for targeted failure injection in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Stat,
    Get,
    Put,
    Delete,
}

#[derive(Default)]
struct Inner {
    containers: HashMap<String, BTreeMap<String, MockObject>>,
    // Scripted failures, consumed one per call in FIFO order.
    failures: HashMap<(MockOp, String), VecDeque<ProviderError>>,
    put_latency: Option<Duration>,
}

/// In-memory provider used by the test suite. Behaves like a real backend:
/// enumerate is deterministic, delete is idempotent at the caller, etags are
/// content digests so copy verification is meaningful.
#[derive(Clone)]
pub struct MockAdapter {
    kind: ProviderKind,
    inner: Arc<Mutex<Inner>>,
}

impl MockAdapter {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn insert_object(
        &self,
        container: &str,
        key: &str,
        data: impl Into<Bytes>,
        storage_class: &str,
    ) {
        let data = data.into();
        let etag = format!("{:x}", Sha256::digest(&data));
        let object = MockObject {
            data,
            storage_class: storage_class.to_string(),
            last_modified: get_epoch_time_in_ms(),
            etag,
        };
        self.inner
            .lock()
            .unwrap()
            .containers
            .entry(container.to_string())
            .or_default()
            .insert(key.to_string(), object);
    }

    pub fn set_last_modified(&self, container: &str, key: &str, last_modified: u64) {
        if let Some(object) = self
            .inner
            .lock()
            .unwrap()
            .containers
            .get_mut(container)
            .and_then(|c| c.get_mut(key))
        {
            object.last_modified = last_modified;
        }
    }

    pub fn remove_object(&self, container: &str, key: &str) {
        if let Some(container) = self.inner.lock().unwrap().containers.get_mut(container) {
            container.remove(key);
        }
    }

    /// Slows every put down, for tests that need transfers to stay in
    /// flight long enough to race a cancellation.
    pub fn set_put_latency(&self, latency: Duration) {
        self.inner.lock().unwrap().put_latency = Some(latency);
    }

    /// Scripts the next failure for `(op, key)`; repeated pushes queue up
    /// and are consumed one per call, after which calls succeed again.
    pub fn push_failure(&self, op: MockOp, key: &str, err: ProviderError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .entry((op, key.to_string()))
            .or_default()
            .push_back(err);
    }

    fn take_failure(&self, op: MockOp, key: &str) -> Option<ProviderError> {
        self.inner
            .lock()
            .unwrap()
            .failures
            .get_mut(&(op, key.to_string()))
            .and_then(VecDeque::pop_front)
    }

    fn object_ref(&self, container: &str, key: &str, object: &MockObject) -> ObjectRef {
        ObjectRef {
            provider: self.kind,
            container: container.to_string(),
            key: key.to_string(),
            size_bytes: object.data.len() as u64,
            last_modified: object.last_modified,
            storage_class: object.storage_class.clone(),
            etag: Some(object.etag.clone()),
        }
    }

    pub fn enumerate(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<ObjectRefStream, ProviderError> {
        let inner = self.inner.lock().unwrap();
        let refs: Vec<Result<ObjectRef, ProviderError>> = inner
            .containers
            .get(container)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|(key, _)| prefix.map(|p| key.starts_with(p)).unwrap_or(true))
                    .map(|(key, object)| Ok(self.object_ref(container, key, object)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(stream::iter(refs).boxed())
    }

    pub fn stat(&self, container: &str, key: &str) -> Result<ObjectRef, ProviderError> {
        if let Some(err) = self.take_failure(MockOp::Stat, key) {
            return Err(err);
        }
        let inner = self.inner.lock().unwrap();
        inner
            .containers
            .get(container)
            .and_then(|c| c.get(key))
            .map(|object| self.object_ref(container, key, object))
            .ok_or_else(|| ProviderError::NotFound(format!("{}: {container}/{key}", self.kind)))
    }

    pub fn get_stream(
        &self,
        container: &str,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, ProviderError>>, ProviderError> {
        if let Some(err) = self.take_failure(MockOp::Get, key) {
            return Err(err);
        }
        let inner = self.inner.lock().unwrap();
        let data = inner
            .containers
            .get(container)
            .and_then(|c| c.get(key))
            .map(|object| object.data.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("{}: {container}/{key}", self.kind)))?;
        Ok(stream::once(async move { Ok(data) }).boxed())
    }

    pub async fn put(
        &self,
        container: &str,
        key: &str,
        mut data: BoxStream<'static, Result<Bytes, ProviderError>>,
    ) -> Result<u64, ProviderError> {
        if let Some(err) = self.take_failure(MockOp::Put, key) {
            return Err(err);
        }
        let latency = self.inner.lock().unwrap().put_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut buffer = Vec::new();
        while let Some(chunk) = data.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let size = buffer.len() as u64;
        self.insert_object(container, key, buffer, "STANDARD");
        Ok(size)
    }

    pub fn delete(&self, container: &str, key: &str) -> Result<(), ProviderError> {
        if let Some(err) = self.take_failure(MockOp::Delete, key) {
            return Err(err);
        }
        let mut inner = self.inner.lock().unwrap();
        let existed = inner
            .containers
            .get_mut(container)
            .map(|c| c.remove(key).is_some())
            .unwrap_or(false);
        if existed {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!(
                "{}: {container}/{key}",
                self.kind
            )))
        }
    }

    pub fn set_storage_class(
        &self,
        container: &str,
        key: &str,
        class: &str,
    ) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().unwrap();
        let object = inner
            .containers
            .get_mut(container)
            .and_then(|c| c.get_mut(key))
            .ok_or_else(|| ProviderError::NotFound(format!("{}: {container}/{key}", self.kind)))?;
        object.storage_class = class.to_string();
        Ok(())
    }

    pub fn presign_get(
        &self,
        container: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, ProviderError> {
        let inner = self.inner.lock().unwrap();
        if inner
            .containers
            .get(container)
            .map(|c| c.contains_key(key))
            .unwrap_or(false)
        {
            Ok(format!(
                "mock://{container}/{key}?expires={}",
                expires_in.as_secs()
            ))
        } else {
            Err(ProviderError::NotFound(format!(
                "{}: {container}/{key}",
                self.kind
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let mock = MockAdapter::new(ProviderKind::Aws);
        mock.insert_object("bucket", "flaky.bin", vec![1, 2, 3], "STANDARD");
        mock.push_failure(
            MockOp::Stat,
            "flaky.bin",
            ProviderError::Transient("blip".to_string()),
        );
        mock.push_failure(
            MockOp::Stat,
            "flaky.bin",
            ProviderError::Transient("blip again".to_string()),
        );

        assert!(mock.stat("bucket", "flaky.bin").is_err());
        assert!(mock.stat("bucket", "flaky.bin").is_err());
        assert!(mock.stat("bucket", "flaky.bin").is_ok());
    }

    #[tokio::test]
    async fn test_etag_tracks_content() {
        let mock = MockAdapter::new(ProviderKind::Gcp);
        mock.insert_object("b", "k", vec![1], "STANDARD");
        let first = mock.stat("b", "k").unwrap().etag;
        mock.insert_object("b", "k", vec![2], "STANDARD");
        let second = mock.stat("b", "k").unwrap().etag;
        assert_ne!(first, second);
    }
}
