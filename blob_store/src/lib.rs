use std::{env, fmt::Debug, sync::Arc};

use anyhow::{anyhow, Result};
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};
use object_store::{
    aws::{AmazonS3Builder, AmazonS3ConfigKey},
    parse_url,
    parse_url_opts,
    path::Path,
    Attribute,
    AttributeValue,
    Attributes,
    ObjectStore,
    ObjectStoreScheme,
    PutMultipartOpts,
    WriteMultipart,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::info;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    pub path: Option<String>,
    /// Base URL under which stored objects are publicly resolvable, e.g. a
    /// bucket's public HTTP endpoint. Falls back to the store path itself.
    pub public_url_base: Option<String>,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        BlobStorageConfig {
            path: Some(format!("file://{}", path)),
            public_url_base: None,
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = format!(
            "file://{}",
            env::current_dir()
                .unwrap()
                .join("dbhive_storage/blobs")
                .to_str()
                .unwrap()
        );
        info!("using blob store path: {}", blob_store_path);
        BlobStorageConfig {
            path: Some(blob_store_path),
            public_url_base: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    path: Path,
    public_url_base: Option<String>,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self> {
        let url = config
            .path
            .clone()
            .ok_or_else(|| anyhow!("blob storage path is required"))?;
        let (object_store, path) = Self::build_object_store(&url)?;
        Ok(Self {
            object_store: Arc::new(object_store),
            path,
            public_url_base: config.public_url_base,
        })
    }

    pub fn build_object_store(url_str: &str) -> Result<(Box<dyn ObjectStore>, Path)> {
        let url = &url_str.parse::<Url>()?;
        let (scheme, _) = ObjectStoreScheme::parse(url)?;
        match scheme {
            ObjectStoreScheme::AmazonS3 => {
                // inject AWS environment variables to prioritize keys over instance metadata
                // credentials.
                let opts: Vec<(AmazonS3ConfigKey, String)> = std::env::vars_os()
                    .filter_map(|(os_key, os_value)| {
                        if let (Some(key), Some(value)) = (os_key.to_str(), os_value.to_str()) {
                            if key.starts_with("AWS_") {
                                if let Ok(config_key) = key.to_ascii_lowercase().parse() {
                                    return Some((config_key, String::from(value)));
                                }
                            }
                        }
                        None
                    })
                    .collect();

                let mut s3_builder = AmazonS3Builder::new().with_url(url_str);
                for (key, value) in opts.iter() {
                    s3_builder = s3_builder.with_config(*key, value.clone());
                }
                let s3_builder = s3_builder.build()?;
                let (_, path) = parse_url_opts(url, opts)?;
                Ok((Box::new(s3_builder), path))
            }
            // gs:// and file:// URLs; GCS picks up service account
            // credentials from the environment.
            _ => Ok(parse_url(url)?),
        }
    }

    pub fn get_object_store(&self) -> Arc<dyn ObjectStore> {
        self.object_store.clone()
    }

    pub fn get_path(&self) -> Path {
        self.path.clone()
    }

    /// The publicly resolvable reference for an object stored under `path`.
    fn public_url(&self, path: &Path) -> String {
        match &self.public_url_base {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), path),
            None => path.to_string(),
        }
    }

    pub async fn put(
        &self,
        key: &str,
        data: impl futures::Stream<Item = Result<Bytes>> + Send + Unpin,
        content_type: &str,
    ) -> Result<PutResult, anyhow::Error> {
        let mut hasher = Sha256::new();
        let mut hashed_stream = data.map(|item| {
            item.map(|bytes| {
                hasher.update(&bytes);
                bytes
            })
        });

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        let opts = PutMultipartOpts {
            attributes,
            ..Default::default()
        };
        // keys may contain `/` separators, so they are appended as a raw
        // path rather than a single child segment
        let path = Path::from(format!("{}/{}", self.path, key));
        let m = self.object_store.put_multipart_opts(&path, opts).await?;
        let mut w = WriteMultipart::new(m);
        let mut size_bytes = 0;
        while let Some(chunk) = hashed_stream.next().await {
            w.wait_for_capacity(1).await?;
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            w.write(&chunk);
        }
        w.finish().await?;

        let hash = format!("{:x}", hasher.finalize());
        Ok(PutResult {
            url: self.public_url(&path),
            size_bytes,
            sha256_hash: hash,
        })
    }

    pub async fn get(&self, path: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let client_clone = self.object_store.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let get_result = client_clone
            .get(&path.into())
            .await
            .map_err(|e| anyhow!("can't get object {:?}: {:?}", path, e))?;
        let path = path.to_string();
        tokio::spawn(async move {
            let mut stream = get_result.into_stream();
            while let Some(chunk) = stream.next().await {
                let _ = tx.send(
                    chunk.map_err(|e| anyhow!("error reading object {:?}: {:?}", path.clone(), e)),
                );
            }
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.object_store
            .delete(&object_store::path::Path::from(key))
            .await?;
        Ok(())
    }

    pub async fn read_bytes(&self, key: &str) -> Result<Bytes> {
        let mut reader = self.get(key).await?;
        let mut bytes = BytesMut::new();
        while let Some(chunk) = reader.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes.into())
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn disk_storage(dir: &tempfile::TempDir) -> BlobStorage {
        let config = BlobStorageConfig::new(dir.path().to_str().unwrap());
        BlobStorage::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_put_reports_exact_size() {
        let dir = tempfile::tempdir().unwrap();
        let storage = disk_storage(&dir);
        let payload = Bytes::from(vec![7u8; 1024]);
        let stream = stream::iter(vec![Ok(payload)]);
        let result = storage
            .put("datasets/u1/file.bin", Box::pin(stream), "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(result.size_bytes, 1024);
        assert!(result.url.ends_with("datasets/u1/file.bin"));
    }

    #[tokio::test]
    async fn test_put_empty_payload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = disk_storage(&dir);
        let stream = stream::iter(Vec::<Result<Bytes>>::new());
        let result = storage
            .put("datasets/u1/empty", Box::pin(stream), "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(result.size_bytes, 0);
    }

    #[tokio::test]
    async fn test_put_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let storage = disk_storage(&dir);
        let payload = Bytes::from_static(b"hello dataset");
        let stream = stream::iter(vec![Ok(payload.clone())]);
        let result = storage
            .put("datasets/u1/hello.txt", Box::pin(stream), "text/plain")
            .await
            .unwrap();
        let read = storage.read_bytes(&result.url).await.unwrap();
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn test_public_url_base_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BlobStorageConfig::new(dir.path().to_str().unwrap());
        config.public_url_base = Some("https://blobs.example.com/".to_string());
        let storage = BlobStorage::new(config).unwrap();
        let stream = stream::iter(vec![Ok(Bytes::from_static(b"x"))]);
        let result = storage
            .put("datasets/u1/a.bin", Box::pin(stream), "application/octet-stream")
            .await
            .unwrap();
        assert!(result.url.starts_with("https://blobs.example.com/"));
        assert!(result.url.ends_with("datasets/u1/a.bin"));
    }
}
