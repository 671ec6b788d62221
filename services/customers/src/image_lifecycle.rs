//! Photo upload and removal across the blob store and the record store.
//!
//! The two stores are not transactional. Ordering rules keep the failure
//! modes one-sided:
//!
//! - upload writes the blob before the row, so a failed blob write never
//!   leaves a row pointing at nothing;
//! - delete removes the blob before the row, so the row (the only pointer to
//!   the blob) survives any failed removal and the delete can be retried.
//!
//! A row insert failing after a successful blob write leaves an orphan blob.
//! That is logged and left for manual reconciliation.

use crate::blob_store::{BlobError, BlobStore};
use crate::image_compressor::ImageCompressor;
use crate::models::{CustomerImage, GalleryImage, ImageWithUrl};
use crate::record_store::{RecordStore, StoreError};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Content type of every stored photo
pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Errors from photo lifecycle operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Image {0} not found")]
    ImageNotFound(Uuid),
}

/// A photo as received from the client
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Original file name, kept for display only
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Outcome of a sequential multi-file upload
#[derive(Debug)]
pub struct BatchUpload {
    /// Public URLs of the files fully persisted, in input order
    pub uploaded: Vec<String>,
    /// The file that stopped the batch, if any
    pub failed: Option<FailedUpload>,
}

/// The upload that stopped a batch
#[derive(Debug)]
pub struct FailedUpload {
    pub file_name: String,
    pub error: LifecycleError,
}

/// Blob key of a customer photo: `{customerId}/{unixMillis}.jpg`
pub fn image_path(customer_id: Uuid, stamp_millis: i64) -> String {
    format!("{}/{}.jpg", customer_id, stamp_millis)
}

/// Orchestrates compress, store blob, insert row and the reverse
pub struct ImageLifecycleManager {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    compressor: Arc<dyn ImageCompressor>,
    last_stamp: AtomicI64,
}

impl ImageLifecycleManager {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        compressor: Arc<dyn ImageCompressor>,
    ) -> Self {
        Self {
            records,
            blobs,
            compressor,
            last_stamp: AtomicI64::new(0),
        }
    }

    /// Compress, store and record one photo; returns its public URL
    #[instrument(skip(self, file), fields(file_name = %file.file_name, input_bytes = file.data.len()))]
    pub async fn upload(
        &self,
        customer_id: Uuid,
        file: UploadFile,
    ) -> Result<String, LifecycleError> {
        let data = self.compress_or_original(file.data).await;
        let path = image_path(customer_id, self.next_stamp());

        self.blobs.put(&path, data, JPEG_CONTENT_TYPE).await?;

        if let Err(e) = self
            .records
            .insert_image(customer_id, &path, &file.file_name)
            .await
        {
            error!(
                path = %path,
                error = %e,
                "Image row insert failed after blob upload, blob is orphaned"
            );
            metrics::counter!("customers.images.orphaned").increment(1);
            return Err(e.into());
        }

        metrics::counter!("customers.images.uploaded").increment(1);
        info!(path = %path, "Image uploaded");

        Ok(self.resolve_url(&path))
    }

    /// Upload files one after another, stopping at the first failure
    pub async fn upload_batch(&self, customer_id: Uuid, files: Vec<UploadFile>) -> BatchUpload {
        let mut uploaded = Vec::with_capacity(files.len());

        for file in files {
            let file_name = file.file_name.clone();
            match self.upload(customer_id, file).await {
                Ok(url) => uploaded.push(url),
                Err(error) => {
                    warn!(
                        customer_id = %customer_id,
                        file_name = %file_name,
                        persisted = uploaded.len(),
                        error = %error,
                        "Batch upload stopped"
                    );
                    return BatchUpload {
                        uploaded,
                        failed: Some(FailedUpload { file_name, error }),
                    };
                }
            }
        }

        BatchUpload {
            uploaded,
            failed: None,
        }
    }

    /// Remove the blob, then the row; the row stays if blob removal fails
    #[instrument(skip(self))]
    pub async fn delete(&self, image_id: Uuid, file_path: &str) -> Result<(), LifecycleError> {
        self.blobs.remove(file_path).await?;

        if !self.records.delete_image(image_id).await? {
            debug!(image_id = %image_id, "Image row was already gone");
        }

        metrics::counter!("customers.images.deleted").increment(1);
        info!(image_id = %image_id, path = %file_path, "Image deleted");
        Ok(())
    }

    /// Look up the row by id, then [`delete`](Self::delete) it
    pub async fn delete_by_id(&self, image_id: Uuid) -> Result<CustomerImage, LifecycleError> {
        let image = self
            .records
            .get_image(image_id)
            .await?
            .ok_or(LifecycleError::ImageNotFound(image_id))?;

        self.delete(image.id, &image.file_path).await?;
        Ok(image)
    }

    /// Delete every photo of a customer, stopping at the first failure
    pub async fn delete_all(&self, customer_id: Uuid) -> Result<usize, LifecycleError> {
        let images = self.records.list_images(customer_id).await?;
        let count = images.len();

        for image in images {
            self.delete(image.id, &image.file_path).await?;
        }

        Ok(count)
    }

    /// Public URL of a stored photo
    pub fn resolve_url(&self, file_path: &str) -> String {
        self.blobs.public_url(file_path)
    }

    /// Photos of one customer with URLs, most recent first
    pub async fn list(&self, customer_id: Uuid) -> Result<Vec<ImageWithUrl>, LifecycleError> {
        let images = self.records.list_images(customer_id).await?;

        Ok(images
            .into_iter()
            .map(|image| ImageWithUrl {
                url: self.resolve_url(&image.file_path),
                image,
            })
            .collect())
    }

    /// Every photo with owner name and URL, filtered by customer or file name
    pub async fn gallery(&self, search: Option<&str>) -> Result<Vec<GalleryImage>, LifecycleError> {
        let needle = search
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let images = self.records.list_gallery().await?;

        Ok(images
            .into_iter()
            .filter(|image| match needle {
                Some(ref q) => {
                    image.customer_name.to_lowercase().contains(q)
                        || image.file_name.to_lowercase().contains(q)
                }
                None => true,
            })
            .map(|image| GalleryImage {
                url: self.resolve_url(&image.file_path),
                image,
            })
            .collect())
    }

    async fn compress_or_original(&self, data: Vec<u8>) -> Vec<u8> {
        let original = Arc::new(data);
        let input = Arc::clone(&original);
        let compressor = Arc::clone(&self.compressor);

        let result = tokio::task::spawn_blocking(move || compressor.compress(&input)).await;

        match result {
            Ok(Ok(compressed)) => compressed,
            Ok(Err(e)) => {
                warn!(error = %e, "Image compression failed, uploading original");
                metrics::counter!("customers.images.compression_fallback").increment(1);
                unwrap_shared(original)
            }
            Err(e) => {
                warn!(error = %e, "Image compression task failed, uploading original");
                metrics::counter!("customers.images.compression_fallback").increment(1);
                unwrap_shared(original)
            }
        }
    }

    /// Millisecond stamp, strictly increasing across calls on this manager
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = self
            .last_stamp
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }
}

fn unwrap_shared(data: Arc<Vec<u8>>) -> Vec<u8> {
    Arc::try_unwrap(data).unwrap_or_else(|shared| (*shared).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MockBlobStore;
    use crate::image_compressor::{CompressionError, MockImageCompressor};
    use crate::models::CustomerImageWithOwner;
    use crate::record_store::MockRecordStore;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    const BASE_URL: &str = "https://cdn.example.com/customer-images";

    type PutLog = Arc<Mutex<Vec<(String, Vec<u8>, String)>>>;

    fn row(customer_id: Uuid, path: &str, name: &str) -> CustomerImage {
        CustomerImage {
            id: Uuid::new_v4(),
            customer_id,
            file_path: path.to_string(),
            file_name: name.to_string(),
            created_at: Utc::now(),
        }
    }

    fn file(name: &str, data: &[u8]) -> UploadFile {
        UploadFile {
            file_name: name.to_string(),
            data: data.to_vec(),
        }
    }

    fn blobs_recording_puts(log: PutLog) -> MockBlobStore {
        let mut blobs = MockBlobStore::new();
        blobs.expect_put().returning(move |path, data, content_type| {
            log.lock()
                .unwrap()
                .push((path.to_string(), data, content_type.to_string()));
            Ok(())
        });
        blobs
            .expect_public_url()
            .returning(|path| format!("{BASE_URL}/{path}"));
        blobs
    }

    fn records_accepting_inserts() -> MockRecordStore {
        let mut records = MockRecordStore::new();
        records
            .expect_insert_image()
            .returning(|customer_id, path, name| Ok(row(customer_id, path, name)));
        records
    }

    fn shrinking_compressor() -> MockImageCompressor {
        let mut compressor = MockImageCompressor::new();
        compressor
            .expect_compress()
            .returning(|_| Ok(b"compressed".to_vec()));
        compressor
    }

    fn manager(
        records: MockRecordStore,
        blobs: MockBlobStore,
        compressor: MockImageCompressor,
    ) -> ImageLifecycleManager {
        ImageLifecycleManager::new(Arc::new(records), Arc::new(blobs), Arc::new(compressor))
    }

    #[test]
    fn test_image_path_format() {
        let customer_id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();

        assert_eq!(
            image_path(customer_id, 1_718_000_000_123),
            "550e8400-e29b-41d4-a716-446655440000/1718000000123.jpg"
        );
    }

    #[tokio::test]
    async fn test_upload_stores_compressed_blob_then_row() {
        let customer_id = Uuid::new_v4();
        let puts = PutLog::default();
        let inserted = Arc::new(Mutex::new(Vec::new()));

        let mut records = MockRecordStore::new();
        let inserted_log = Arc::clone(&inserted);
        records
            .expect_insert_image()
            .times(1)
            .returning(move |customer_id, path, name| {
                inserted_log
                    .lock()
                    .unwrap()
                    .push((path.to_string(), name.to_string()));
                Ok(row(customer_id, path, name))
            });

        let manager = manager(
            records,
            blobs_recording_puts(Arc::clone(&puts)),
            shrinking_compressor(),
        );

        let url = manager
            .upload(customer_id, file("IMG_0042.HEIC.png", b"original"))
            .await
            .unwrap();

        let puts = puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        let (path, data, content_type) = &puts[0];
        assert_eq!(data.as_slice(), b"compressed");
        assert_eq!(content_type, "image/jpeg");

        let prefix = format!("{customer_id}/");
        let stamp = path
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".jpg"))
            .expect("path is {customerId}/{millis}.jpg");
        assert!(stamp.parse::<i64>().unwrap() > 0);

        assert_eq!(
            inserted.lock().unwrap().as_slice(),
            &[(path.clone(), "IMG_0042.HEIC.png".to_string())]
        );
        assert_eq!(url, format!("{BASE_URL}/{path}"));
    }

    #[tokio::test]
    async fn test_failed_blob_write_inserts_no_row() {
        let mut blobs = MockBlobStore::new();
        blobs.expect_put().times(1).returning(|path, _, _| {
            Err(BlobError::Put {
                path: path.to_string(),
                message: "bucket unavailable".to_string(),
            })
        });

        let mut records = MockRecordStore::new();
        records.expect_insert_image().never();

        let manager = manager(records, blobs, shrinking_compressor());
        let result = manager.upload(Uuid::new_v4(), file("a.jpg", b"a")).await;

        assert!(matches!(result, Err(LifecycleError::Blob(BlobError::Put { .. }))));
    }

    #[tokio::test]
    async fn test_failed_row_insert_leaves_blob_in_place() {
        let puts = PutLog::default();
        let mut blobs = blobs_recording_puts(Arc::clone(&puts));
        blobs.expect_remove().never();

        let mut records = MockRecordStore::new();
        records
            .expect_insert_image()
            .times(1)
            .returning(|_, _, _| Err(StoreError::Database(sqlx::Error::PoolTimedOut)));

        let manager = manager(records, blobs, shrinking_compressor());
        let result = manager.upload(Uuid::new_v4(), file("a.jpg", b"a")).await;

        assert!(matches!(result, Err(LifecycleError::Store(_))));
        assert_eq!(puts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_compression_failure_falls_back_to_original() {
        let customer_id = Uuid::new_v4();
        let puts = PutLog::default();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut compressor = MockImageCompressor::new();
        let counter = Arc::clone(&calls);
        compressor.expect_compress().times(3).returning(move |data| {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(CompressionError::TargetUnreachable {
                    target: 150 * 1024,
                    smallest: data.len(),
                })
            } else {
                Ok(b"small".to_vec())
            }
        });

        let mut records = MockRecordStore::new();
        records
            .expect_insert_image()
            .times(3)
            .returning(|customer_id, path, name| Ok(row(customer_id, path, name)));

        let manager = manager(records, blobs_recording_puts(Arc::clone(&puts)), compressor);

        let batch = manager
            .upload_batch(
                customer_id,
                vec![
                    file("one.jpg", b"first original"),
                    file("two.jpg", b"second original"),
                    file("three.jpg", b"third original"),
                ],
            )
            .await;

        assert_eq!(batch.uploaded.len(), 3);
        assert!(batch.failed.is_none());

        let stored: Vec<Vec<u8>> = puts.lock().unwrap().iter().map(|p| p.1.clone()).collect();
        assert_eq!(
            stored,
            vec![
                b"small".to_vec(),
                b"second original".to_vec(),
                b"small".to_vec()
            ]
        );
    }

    #[tokio::test]
    async fn test_batch_stops_at_first_failure() {
        let mut blobs = MockBlobStore::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        blobs.expect_put().times(2).returning(move |path, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                Err(BlobError::Put {
                    path: path.to_string(),
                    message: "timeout".to_string(),
                })
            } else {
                Ok(())
            }
        });
        blobs
            .expect_public_url()
            .returning(|path| format!("{BASE_URL}/{path}"));

        let mut records = MockRecordStore::new();
        records
            .expect_insert_image()
            .times(1)
            .returning(|customer_id, path, name| Ok(row(customer_id, path, name)));

        let manager = manager(records, blobs, shrinking_compressor());
        let batch = manager
            .upload_batch(
                Uuid::new_v4(),
                vec![file("one.jpg", b"1"), file("two.jpg", b"2"), file("three.jpg", b"3")],
            )
            .await;

        assert_eq!(batch.uploaded.len(), 1);
        let failed = batch.failed.expect("second upload fails");
        assert_eq!(failed.file_name, "two.jpg");
        assert!(matches!(failed.error, LifecycleError::Blob(_)));
    }

    #[tokio::test]
    async fn test_sequential_uploads_get_distinct_increasing_paths() {
        let puts = PutLog::default();
        let manager = manager(
            records_accepting_inserts(),
            blobs_recording_puts(Arc::clone(&puts)),
            shrinking_compressor(),
        );
        let customer_id = Uuid::new_v4();

        for i in 0..5 {
            assert_ok!(manager.upload(customer_id, file(&format!("{i}.jpg"), b"x")).await);
        }

        let paths: Vec<String> = puts.lock().unwrap().iter().map(|p| p.0.clone()).collect();
        let stamps: Vec<i64> = paths
            .iter()
            .map(|p| {
                p.rsplit('/')
                    .next()
                    .and_then(|f| f.strip_suffix(".jpg"))
                    .unwrap()
                    .parse()
                    .unwrap()
            })
            .collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
    }

    #[tokio::test]
    async fn test_delete_keeps_row_when_blob_removal_fails() {
        let mut blobs = MockBlobStore::new();
        blobs.expect_remove().times(1).returning(|path| {
            Err(BlobError::Remove {
                path: path.to_string(),
                message: "access denied".to_string(),
            })
        });

        let mut records = MockRecordStore::new();
        records.expect_delete_image().never();

        let manager = manager(records, blobs, shrinking_compressor());
        assert_err!(manager.delete(Uuid::new_v4(), "c/1.jpg").await);
    }

    #[tokio::test]
    async fn test_delete_retry_removes_row_only_after_blob_is_gone() {
        let image_id = Uuid::new_v4();
        let removals = Arc::new(AtomicUsize::new(0));
        let row_deleted = Arc::new(AtomicUsize::new(0));

        let mut blobs = MockBlobStore::new();
        let counter = Arc::clone(&removals);
        blobs.expect_remove().times(2).returning(move |path| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BlobError::Remove {
                    path: path.to_string(),
                    message: "throttled".to_string(),
                })
            } else {
                Ok(())
            }
        });

        let mut records = MockRecordStore::new();
        let deleted = Arc::clone(&row_deleted);
        records
            .expect_delete_image()
            .withf(move |id| *id == image_id)
            .times(1)
            .returning(move |_| {
                deleted.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            });

        let manager = manager(records, blobs, shrinking_compressor());

        assert_err!(manager.delete(image_id, "c/1.jpg").await);
        assert_eq!(row_deleted.load(Ordering::SeqCst), 0);

        assert_ok!(manager.delete(image_id, "c/1.jpg").await);
        assert_eq!(row_deleted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_by_id_unknown_image() {
        let mut records = MockRecordStore::new();
        records.expect_get_image().returning(|_| Ok(None));

        let mut blobs = MockBlobStore::new();
        blobs.expect_remove().never();

        let manager = manager(records, blobs, shrinking_compressor());
        let id = Uuid::new_v4();

        assert!(matches!(
            manager.delete_by_id(id).await,
            Err(LifecycleError::ImageNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_resolve_url_is_pure() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_public_url()
            .returning(|path| format!("{BASE_URL}/{path}"));
        blobs.expect_put().never();
        blobs.expect_remove().never();

        let manager = manager(MockRecordStore::new(), blobs, MockImageCompressor::new());

        assert_eq!(manager.resolve_url("c/1.jpg"), manager.resolve_url("c/1.jpg"));
        assert_eq!(manager.resolve_url("c/1.jpg"), format!("{BASE_URL}/c/1.jpg"));
    }

    #[tokio::test]
    async fn test_gallery_filters_by_customer_or_file_name() {
        let owner = |name: &str, file: &str| CustomerImageWithOwner {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            customer_name: name.to_string(),
            file_path: format!("x/{file}"),
            file_name: file.to_string(),
            created_at: Utc::now(),
        };
        let rows = vec![
            owner("Asha Rao", "blouse.jpg"),
            owner("Ravi", "sherwani.jpg"),
            owner("Meena", "ASHA-ref.png"),
        ];

        let mut records = MockRecordStore::new();
        records
            .expect_list_gallery()
            .returning(move || Ok(rows.clone()));
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_public_url()
            .returning(|path| format!("{BASE_URL}/{path}"));

        let manager = manager(records, blobs, MockImageCompressor::new());

        let all = manager.gallery(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let matched = manager.gallery(Some(" asha ")).await.unwrap();
        let names: Vec<&str> = matched.iter().map(|g| g.image.file_name.as_str()).collect();
        assert_eq!(names, vec!["blouse.jpg", "ASHA-ref.png"]);
        assert_eq!(matched[0].url, format!("{BASE_URL}/x/blouse.jpg"));
    }
}
