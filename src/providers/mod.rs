use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::data_model::{ObjectRef, ProviderKind};

pub mod cloud;
pub mod mock;

use cloud::CloudAdapter;
use mock::MockAdapter;

/// Uniform error taxonomy across provider backends. Provider-native errors
/// are translated at the adapter boundary; nothing else crosses it.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("destination already exists: {0}")]
    DestExistsConflict(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient(_) | ProviderError::QuotaExceeded(_)
        )
    }
}

/// Overwrite policy for copies. `IfDifferent` is the engine's default: it
/// makes per-file copy idempotent, since a retry that finds an identical
/// destination object does not write again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteMode {
    IfDifferent,
    Never,
}

pub type ObjectRefStream = BoxStream<'static, Result<ObjectRef, ProviderError>>;

/// A provider backend with the uniform operation set. Variant construction
/// fixes adapter-local clients and connection pools; one instance is shared
/// by all workers.
pub enum ProviderAdapter {
    Aws(CloudAdapter),
    Azure(CloudAdapter),
    Gcp(CloudAdapter),
    Mock(MockAdapter),
}

impl ProviderAdapter {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderAdapter::Aws(_) => ProviderKind::Aws,
            ProviderAdapter::Azure(_) => ProviderKind::Azure,
            ProviderAdapter::Gcp(_) => ProviderKind::Gcp,
            ProviderAdapter::Mock(mock) => mock.kind(),
        }
    }

    fn cloud(&self) -> Option<&CloudAdapter> {
        match self {
            ProviderAdapter::Aws(c) | ProviderAdapter::Azure(c) | ProviderAdapter::Gcp(c) => {
                Some(c)
            }
            ProviderAdapter::Mock(_) => None,
        }
    }

    /// Enumerates a container as one flat sequence; pagination is handled
    /// inside the adapter. Ordering across pages is provider-defined.
    pub async fn enumerate(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<ObjectRefStream, ProviderError> {
        match self {
            ProviderAdapter::Mock(mock) => mock.enumerate(container, prefix),
            ProviderAdapter::Aws(cloud)
            | ProviderAdapter::Azure(cloud)
            | ProviderAdapter::Gcp(cloud) => cloud.enumerate(container, prefix).await,
        }
    }

    /// Fresh metadata for one object.
    pub async fn stat(&self, container: &str, key: &str) -> Result<ObjectRef, ProviderError> {
        match self {
            ProviderAdapter::Mock(mock) => mock.stat(container, key),
            ProviderAdapter::Aws(cloud)
            | ProviderAdapter::Azure(cloud)
            | ProviderAdapter::Gcp(cloud) => cloud.stat(container, key).await,
        }
    }

    pub async fn get_stream(
        &self,
        container: &str,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, ProviderError>>, ProviderError> {
        match self {
            ProviderAdapter::Mock(mock) => mock.get_stream(container, key),
            ProviderAdapter::Aws(cloud)
            | ProviderAdapter::Azure(cloud)
            | ProviderAdapter::Gcp(cloud) => cloud.get_stream(container, key).await,
        }
    }

    pub async fn put(
        &self,
        container: &str,
        key: &str,
        mut data: BoxStream<'static, Result<Bytes, ProviderError>>,
    ) -> Result<u64, ProviderError> {
        match self {
            ProviderAdapter::Mock(mock) => mock.put(container, key, data).await,
            ProviderAdapter::Aws(cloud)
            | ProviderAdapter::Azure(cloud)
            | ProviderAdapter::Gcp(cloud) => cloud.put(container, key, &mut data).await,
        }
    }

    /// Copies `src` into `dest_container/dest_key` on this adapter, reading
    /// through `source`. Same-provider same-container copies go server-side;
    /// everything else streams through the caller. Returns bytes copied; an
    /// identical pre-existing destination object short-circuits to success.
    pub async fn copy_object(
        &self,
        source: &ProviderAdapter,
        src: &ObjectRef,
        dest_container: &str,
        dest_key: &str,
        overwrite: OverwriteMode,
    ) -> Result<u64, ProviderError> {
        match self.stat(dest_container, dest_key).await {
            Ok(existing) => {
                if overwrite == OverwriteMode::Never {
                    return Err(ProviderError::DestExistsConflict(format!(
                        "{dest_container}/{dest_key}"
                    )));
                }
                if existing.size_bytes == src.size_bytes
                    && etags_match(existing.etag.as_deref(), src.etag.as_deref())
                {
                    return Ok(existing.size_bytes);
                }
            }
            Err(ProviderError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let same_provider = self.kind() == source.kind();
        if same_provider && src.container == dest_container {
            if let (Some(dest_cloud), Some(_)) = (self.cloud(), source.cloud()) {
                return dest_cloud
                    .server_side_copy(&src.container, &src.key, dest_key)
                    .await
                    .map(|_| src.size_bytes);
            }
        }

        let data = source.get_stream(&src.container, &src.key).await?;
        self.put(dest_container, dest_key, data).await
    }

    /// Idempotent delete: removing an object that is already gone succeeds.
    pub async fn delete(&self, container: &str, key: &str) -> Result<(), ProviderError> {
        let result = match self {
            ProviderAdapter::Mock(mock) => mock.delete(container, key),
            ProviderAdapter::Aws(cloud)
            | ProviderAdapter::Azure(cloud)
            | ProviderAdapter::Gcp(cloud) => cloud.delete(container, key).await,
        };
        match result {
            Err(ProviderError::NotFound(_)) => Ok(()),
            other => other,
        }
    }

    /// In-place tier change, where the backend supports it.
    pub async fn set_storage_class(
        &self,
        container: &str,
        key: &str,
        class: &str,
    ) -> Result<(), ProviderError> {
        match self {
            ProviderAdapter::Mock(mock) => mock.set_storage_class(container, key, class),
            _ => Err(ProviderError::Unavailable(
                "in-place storage class changes are not supported by this backend".to_string(),
            )),
        }
    }

    pub async fn presign_get(
        &self,
        container: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, ProviderError> {
        match self {
            ProviderAdapter::Mock(mock) => mock.presign_get(container, key, expires_in),
            ProviderAdapter::Aws(cloud)
            | ProviderAdapter::Azure(cloud)
            | ProviderAdapter::Gcp(cloud) => cloud.presign_get(container, key, expires_in).await,
        }
    }
}

fn etags_match(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        // Adapters do not always report comparable etags; when either side
        // is silent, size equality has to carry the comparison.
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Per-provider settings injected at adapter construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub enabled: bool,
    /// Opaque credential reference: a service-account path for GCP; AWS and
    /// Azure resolve credentials from the process environment.
    pub credentials_ref: Option<String>,
    pub default_container: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

/// The set of configured adapters, keyed by provider.
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: ProviderAdapter) {
        self.adapters.insert(adapter.kind(), Arc::new(adapter));
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<ProviderAdapter>, ProviderError> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            ProviderError::InvalidArgument(format!("provider {kind} is not configured"))
        })
    }

    pub fn is_configured(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    pub fn configured(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    fn mock_pair() -> (ProviderAdapter, ProviderAdapter) {
        let aws = MockAdapter::new(ProviderKind::Aws);
        aws.insert_object("bucket-a", "report.pdf", vec![7u8; 1024], "STANDARD");
        (
            ProviderAdapter::Mock(aws),
            ProviderAdapter::Mock(MockAdapter::new(ProviderKind::Azure)),
        )
    }

    #[tokio::test]
    async fn test_copy_object_streams_across_providers() {
        let (src, dst) = mock_pair();
        let src_ref = src.stat("bucket-a", "report.pdf").await.unwrap();
        let copied = dst
            .copy_object(&src, &src_ref, "bucket-b", "report.pdf", OverwriteMode::IfDifferent)
            .await
            .unwrap();
        assert_eq!(copied, 1024);

        let dest_ref = dst.stat("bucket-b", "report.pdf").await.unwrap();
        assert_eq!(dest_ref.size_bytes, 1024);
        assert_eq!(dest_ref.etag, src_ref.etag);
    }

    #[tokio::test]
    async fn test_copy_object_is_idempotent() {
        let (src, dst) = mock_pair();
        let src_ref = src.stat("bucket-a", "report.pdf").await.unwrap();
        for _ in 0..2 {
            let copied = dst
                .copy_object(
                    &src,
                    &src_ref,
                    "bucket-b",
                    "report.pdf",
                    OverwriteMode::IfDifferent,
                )
                .await
                .unwrap();
            assert_eq!(copied, 1024);
        }
        let first = dst.stat("bucket-b", "report.pdf").await.unwrap();
        assert_eq!(first.size_bytes, 1024);
    }

    #[tokio::test]
    async fn test_copy_object_no_overwrite_conflicts() {
        let (src, dst) = mock_pair();
        let src_ref = src.stat("bucket-a", "report.pdf").await.unwrap();
        dst.copy_object(&src, &src_ref, "bucket-b", "report.pdf", OverwriteMode::Never)
            .await
            .unwrap();
        let err = dst
            .copy_object(&src, &src_ref, "bucket-b", "report.pdf", OverwriteMode::Never)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DestExistsConflict(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_object_succeeds() {
        let (_, dst) = mock_pair();
        dst.delete("bucket-b", "never-there.bin").await.unwrap();
    }

    #[tokio::test]
    async fn test_enumerate_is_flat_and_prefix_filtered() {
        let mock = MockAdapter::new(ProviderKind::Gcp);
        mock.insert_object("data", "logs/a.log", vec![1], "STANDARD");
        mock.insert_object("data", "logs/b.log", vec![2], "STANDARD");
        mock.insert_object("data", "media/c.mp4", vec![3], "STANDARD");
        let adapter = ProviderAdapter::Mock(mock);

        let refs: Vec<_> = adapter
            .enumerate("data", Some("logs/"))
            .await
            .unwrap()
            .collect()
            .await;
        let keys: Vec<_> = refs
            .into_iter()
            .map(|r| r.unwrap().key)
            .collect();
        assert_eq!(keys, vec!["logs/a.log", "logs/b.log"]);
    }

    #[test]
    fn test_registry_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.get(ProviderKind::Gcp).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidArgument(_)));
    }
}
