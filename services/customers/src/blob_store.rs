use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// S3 never returns more than this many keys per page
const MAX_KEYS_PER_PAGE: usize = 1000;

/// Blob store failures
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Failed to upload {path}: {message}")]
    Put { path: String, message: String },

    #[error("Failed to remove {path}: {message}")]
    Remove { path: String, message: String },

    #[error("Failed to list '{prefix}': {message}")]
    List { prefix: String, message: String },
}

/// One direct child of a listed prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// Name relative to the listed prefix, without trailing slash
    pub name: String,
    /// Object size; `None` for folders
    pub size: Option<u64>,
}

impl BlobEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size: Some(size),
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: None,
        }
    }

    /// Entries without file metadata are folders
    pub fn is_folder(&self) -> bool {
        self.size.is_none()
    }
}

/// Object storage holding customer photos
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object, replacing nothing: keys are unique per upload
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), BlobError>;

    async fn remove(&self, path: &str) -> Result<(), BlobError>;

    /// List direct children of `prefix` (`""` is the bucket root), at most `limit`
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<BlobEntry>, BlobError>;

    /// Public URL of an object; pure, performs no I/O
    fn public_url(&self, path: &str) -> String;
}

/// S3-compatible blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    public_base: String,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Custom endpoint for MinIO or the Supabase S3 gateway
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            public_base: public_base_url(config),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn put(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), BlobError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .cache_control("max-age=3600")
            .send()
            .await
            .map_err(|e| BlobError::Put {
                path: path.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(path = %path, "Object uploaded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, path: &str) -> Result<(), BlobError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| BlobError::Remove {
                path: path.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!(path = %path, "Object removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<BlobEntry>, BlobError> {
        let key_prefix = folder_prefix(prefix);
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        while entries.len() < limit {
            let page_size = (limit - entries.len()).min(MAX_KEYS_PER_PAGE);

            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&key_prefix)
                .delimiter("/")
                .max_keys(page_size as i32)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(|e| BlobError::List {
                    prefix: prefix.to_string(),
                    message: DisplayErrorContext(&e).to_string(),
                })?;

            for common_prefix in response.common_prefixes() {
                if let Some(name) = common_prefix
                    .prefix()
                    .and_then(|p| relative_name(&key_prefix, p))
                {
                    entries.push(BlobEntry::folder(name));
                }
            }

            for object in response.contents() {
                if let Some(name) = object.key().and_then(|k| relative_name(&key_prefix, k)) {
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    entries.push(BlobEntry::file(name, size));
                }
            }

            continuation_token = response.next_continuation_token().map(String::from);
            if !response.is_truncated().unwrap_or(false) || continuation_token.is_none() {
                break;
            }
        }

        entries.truncate(limit);
        Ok(entries)
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.public_base, path.trim_start_matches('/'))
    }
}

/// Base URL under which objects of the configured bucket are public
pub fn public_base_url(config: &S3Config) -> String {
    if let Some(ref base) = config.public_base_url {
        return base.trim_end_matches('/').to_string();
    }

    match config.endpoint_url {
        Some(ref endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
        None => format!(
            "https://{}.s3.{}.amazonaws.com",
            config.bucket, config.region
        ),
    }
}

fn folder_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

/// Strip the listed prefix; the zero-byte folder marker itself yields `None`
fn relative_name(key_prefix: &str, key: &str) -> Option<String> {
    let name = key
        .strip_prefix(key_prefix)
        .unwrap_or(key)
        .trim_end_matches('/');

    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s3_config() -> S3Config {
        S3Config {
            bucket: "customer-images".to_string(),
            region: "ap-south-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            public_base_url: None,
        }
    }

    #[test]
    fn test_public_base_url_prefers_explicit_base() {
        let config = S3Config {
            public_base_url: Some(
                "https://xyz.supabase.co/storage/v1/object/public/customer-images/".to_string(),
            ),
            endpoint_url: Some("https://xyz.supabase.co/storage/v1/s3".to_string()),
            ..s3_config()
        };

        assert_eq!(
            public_base_url(&config),
            "https://xyz.supabase.co/storage/v1/object/public/customer-images"
        );
    }

    #[test]
    fn test_public_base_url_from_endpoint() {
        let config = S3Config {
            endpoint_url: Some("http://localhost:9000/".to_string()),
            ..s3_config()
        };

        assert_eq!(
            public_base_url(&config),
            "http://localhost:9000/customer-images"
        );
    }

    #[test]
    fn test_public_base_url_for_aws() {
        assert_eq!(
            public_base_url(&s3_config()),
            "https://customer-images.s3.ap-south-1.amazonaws.com"
        );
    }

    #[test]
    fn test_folder_prefix() {
        assert_eq!(folder_prefix(""), "");
        assert_eq!(folder_prefix("/"), "");
        assert_eq!(folder_prefix("abc"), "abc/");
        assert_eq!(folder_prefix("abc/"), "abc/");
    }

    #[test]
    fn test_relative_name() {
        assert_eq!(relative_name("", "abc/"), Some("abc".to_string()));
        assert_eq!(
            relative_name("abc/", "abc/1700000000000.jpg"),
            Some("1700000000000.jpg".to_string())
        );
        assert_eq!(relative_name("abc/", "abc/"), None);
    }

    #[test]
    fn test_blob_entry_kind() {
        assert!(BlobEntry::folder("abc").is_folder());
        assert!(!BlobEntry::file("a.jpg", 0).is_folder());
    }
}
