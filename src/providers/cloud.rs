use std::{collections::HashMap, sync::Arc, sync::RwLock, time::Duration};

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use object_store::{
    aws::AmazonS3Builder,
    azure::MicrosoftAzureBuilder,
    gcp::GoogleCloudStorageBuilder,
    path::Path,
    signer::Signer,
    ObjectMeta,
    ObjectStore,
    WriteMultipart,
};

use super::{ObjectRefStream, ProviderError, ProviderSettings};
use crate::data_model::{ObjectRef, ProviderKind};

/// An object_store-backed provider. The crate binds a client to a single
/// container, so the adapter keeps one lazily-built client per container;
/// connection pooling lives inside those clients.
pub struct CloudAdapter {
    kind: ProviderKind,
    settings: ProviderSettings,
    stores: RwLock<HashMap<String, StoreHandle>>,
}

#[derive(Clone)]
struct StoreHandle {
    store: Arc<dyn ObjectStore>,
    signer: Arc<dyn Signer>,
}

impl CloudAdapter {
    pub fn new(kind: ProviderKind, settings: ProviderSettings) -> Self {
        Self {
            kind,
            settings,
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn store_for(&self, container: &str) -> Result<StoreHandle, ProviderError> {
        if let Some(handle) = self
            .stores
            .read()
            .expect("provider store lock poisoned")
            .get(container)
        {
            return Ok(handle.clone());
        }

        let handle = self.build_store(container)?;
        self.stores
            .write()
            .expect("provider store lock poisoned")
            .entry(container.to_string())
            .or_insert(handle.clone());
        Ok(handle)
    }

    fn build_store(&self, container: &str) -> Result<StoreHandle, ProviderError> {
        match self.kind {
            ProviderKind::Aws => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(container);
                if let Some(region) = &self.settings.region {
                    builder = builder.with_region(region.as_str());
                }
                if let Some(endpoint) = &self.settings.endpoint {
                    builder = builder.with_endpoint(endpoint.as_str()).with_allow_http(true);
                }
                let store = Arc::new(
                    builder
                        .build()
                        .map_err(|e| classify_error(self.kind, container, e.into()))?,
                );
                Ok(StoreHandle {
                    signer: store.clone(),
                    store,
                })
            }
            ProviderKind::Azure => {
                let builder = MicrosoftAzureBuilder::from_env().with_container_name(container);
                let store = Arc::new(
                    builder
                        .build()
                        .map_err(|e| classify_error(self.kind, container, e.into()))?,
                );
                Ok(StoreHandle {
                    signer: store.clone(),
                    store,
                })
            }
            ProviderKind::Gcp => {
                let mut builder = GoogleCloudStorageBuilder::from_env().with_bucket_name(container);
                if let Some(credentials) = &self.settings.credentials_ref {
                    builder = builder.with_service_account_path(credentials.as_str());
                }
                let store = Arc::new(
                    builder
                        .build()
                        .map_err(|e| classify_error(self.kind, container, e.into()))?,
                );
                Ok(StoreHandle {
                    signer: store.clone(),
                    store,
                })
            }
        }
    }

    fn to_object_ref(&self, container: &str, meta: &ObjectMeta) -> ObjectRef {
        ObjectRef {
            provider: self.kind,
            container: container.to_string(),
            key: meta.location.to_string(),
            size_bytes: meta.size as u64,
            last_modified: meta.last_modified.timestamp_millis().max(0) as u64,
            // The listing API does not surface per-object storage classes;
            // the provider's default class stands in until it does.
            storage_class: default_storage_class(self.kind).to_string(),
            etag: meta.e_tag.clone(),
        }
    }

    pub async fn enumerate(
        &self,
        container: &str,
        prefix: Option<&str>,
    ) -> Result<ObjectRefStream, ProviderError> {
        let handle = self.store_for(container)?;
        let kind = self.kind;
        let container = container.to_string();
        let prefix = prefix.map(Path::from);
        let settings_class = default_storage_class(kind).to_string();

        let stream = async_stream::stream! {
            let mut listing = handle.store.list(prefix.as_ref());
            while let Some(item) = listing.next().await {
                match item {
                    Ok(meta) => {
                        yield Ok(ObjectRef {
                            provider: kind,
                            container: container.clone(),
                            key: meta.location.to_string(),
                            size_bytes: meta.size as u64,
                            last_modified: meta.last_modified.timestamp_millis().max(0) as u64,
                            storage_class: settings_class.clone(),
                            etag: meta.e_tag.clone(),
                        });
                    }
                    Err(err) => {
                        yield Err(classify_error(kind, &container, err));
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    pub async fn stat(&self, container: &str, key: &str) -> Result<ObjectRef, ProviderError> {
        let handle = self.store_for(container)?;
        let meta = handle
            .store
            .head(&Path::from(key))
            .await
            .map_err(|e| classify_error(self.kind, key, e))?;
        Ok(self.to_object_ref(container, &meta))
    }

    pub async fn get_stream(
        &self,
        container: &str,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, ProviderError>>, ProviderError> {
        let handle = self.store_for(container)?;
        let kind = self.kind;
        let key_owned = key.to_string();
        let result = handle
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| classify_error(kind, key, e))?;
        let stream = result
            .into_stream()
            .map(move |chunk| chunk.map_err(|e| classify_error(kind, &key_owned, e)));
        Ok(Box::pin(stream))
    }

    pub async fn put(
        &self,
        container: &str,
        key: &str,
        data: &mut BoxStream<'static, Result<Bytes, ProviderError>>,
    ) -> Result<u64, ProviderError> {
        let handle = self.store_for(container)?;
        let path = Path::from(key);
        let upload = handle
            .store
            .put_multipart(&path)
            .await
            .map_err(|e| classify_error(self.kind, key, e))?;
        let mut writer = WriteMultipart::new(upload);
        let mut size_bytes = 0u64;
        while let Some(chunk) = data.next().await {
            writer
                .wait_for_capacity(1)
                .await
                .map_err(|e| classify_error(self.kind, key, e))?;
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer
            .finish()
            .await
            .map_err(|e| classify_error(self.kind, key, e))?;
        Ok(size_bytes)
    }

    pub async fn server_side_copy(
        &self,
        container: &str,
        src_key: &str,
        dest_key: &str,
    ) -> Result<(), ProviderError> {
        let handle = self.store_for(container)?;
        handle
            .store
            .copy(&Path::from(src_key), &Path::from(dest_key))
            .await
            .map_err(|e| classify_error(self.kind, src_key, e))
    }

    pub async fn delete(&self, container: &str, key: &str) -> Result<(), ProviderError> {
        let handle = self.store_for(container)?;
        handle
            .store
            .delete(&Path::from(key))
            .await
            .map_err(|e| classify_error(self.kind, key, e))
    }

    pub async fn presign_get(
        &self,
        container: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, ProviderError> {
        let handle = self.store_for(container)?;
        let url = handle
            .signer
            .signed_url(http::Method::GET, &Path::from(key), expires_in)
            .await
            .map_err(|e| classify_error(self.kind, key, e))?;
        Ok(url.to_string())
    }
}

fn default_storage_class(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Aws | ProviderKind::Gcp => "STANDARD",
        ProviderKind::Azure => "HOT",
    }
}

/// Translates object_store errors into the uniform taxonomy. The crate
/// reports most backend rejections as `Generic`, so HTTP status markers in
/// the source text decide between permission, throttling and transient
/// failures; anything unrecognized maps to Unavailable rather than
/// retrying blind.
fn classify_error(kind: ProviderKind, subject: &str, err: object_store::Error) -> ProviderError {
    match err {
        object_store::Error::NotFound { .. } => {
            ProviderError::NotFound(format!("{kind}: {subject}"))
        }
        object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. } => {
            ProviderError::DestExistsConflict(format!("{kind}: {subject}"))
        }
        object_store::Error::InvalidPath { .. } => {
            ProviderError::InvalidArgument(format!("{kind}: invalid path {subject}"))
        }
        object_store::Error::NotImplemented => ProviderError::Unavailable(format!(
            "{kind}: operation not implemented for {subject}"
        )),
        other => {
            let text = other.to_string();
            if mentions_any(&text, &["403", "accessdenied", "permission", "forbidden", "401"]) {
                ProviderError::PermissionDenied(format!("{kind}: {text}"))
            } else if mentions_any(&text, &["429", "slowdown", "quota", "too many requests"]) {
                ProviderError::QuotaExceeded(format!("{kind}: {text}"))
            } else if mentions_any(
                &text,
                &["timed out", "timeout", "connection", "reset", "500", "502", "503", "504"],
            ) {
                ProviderError::Transient(format!("{kind}: {text}"))
            } else {
                ProviderError::Unavailable(format!("{kind}: {text}"))
            }
        }
    }
}

fn mentions_any(text: &str, needles: &[&str]) -> bool {
    let lowered = text.to_ascii_lowercase();
    needles.iter().any(|needle| lowered.contains(needle))
}
