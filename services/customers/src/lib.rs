//! Stitch Customer Service
//!
//! Customer records for the Stitch tailoring platform. The service keeps
//! customer details and a per-customer measurement profile in PostgreSQL,
//! stores compressed customer photos in an S3-compatible bucket, and sends a
//! customer's details, measurements and photos to their phone over the
//! WhatsApp Cloud API.
//!
//! ## Features
//!
//! - **Customer Records**: Validated create/update, search by name or phone,
//!   and a delete that cascades to photos and measurements
//! - **Measurement Profile**: 40 optional body measurements plus free-text
//!   notes, rendered into a message block in a fixed field order
//! - **Photo Storage**: Photos re-encoded as bounded-size JPEG before upload,
//!   with blob and row writes ordered so failures stay recoverable
//! - **WhatsApp Dispatch**: One text message followed by every photo as an
//!   image message, with per-image failure reporting
//! - **Storage Usage**: Bucket usage summed against a configured quota
//!
//! ## Architecture
//!
//! ```text
//!   UI (external)
//!        │
//!        ▼
//! ┌──────────────┐      ┌──────────────┐      ┌──────────────┐
//! │ HTTP API     │─────▶│ Customer     │─────▶│ Record       │──▶ PostgreSQL
//! │ (axum)       │      │ Service      │      │ Store        │
//! └──────────────┘      └──────────────┘      └──────────────┘
//!        │                     │                     ▲
//!        │                     ▼                     │
//!        │              ┌──────────────┐      ┌──────────────┐
//!        ├─────────────▶│ Image        │─────▶│ Blob         │──▶ S3 bucket
//!        │              │ Lifecycle    │      │ Store        │
//!        │              └──────────────┘      └──────────────┘
//!        │                     │                     ▲
//!        │                     ▼                     │
//!        │              ┌──────────────┐      ┌──────────────┐
//!        │              │ Image        │      │ Storage      │
//!        │              │ Compressor   │      │ Usage        │
//!        │              └──────────────┘      └──────────────┘
//!        ▼
//! ┌──────────────┐      ┌──────────────┐
//! │ Notification │─────▶│ Measurement  │
//! │ Dispatcher   │      │ Summary      │
//! └──────────────┘      └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐
//! │ Messaging    │──▶ WhatsApp Cloud API
//! │ Client       │
//! └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod config;
pub mod customer_service;
pub mod image_compressor;
pub mod image_lifecycle;
pub mod measurement;
pub mod measurement_summary;
pub mod messaging;
pub mod models;
pub mod notification;
pub mod record_store;
pub mod storage_usage;

pub use api::{AppState, ErrorResponse};
pub use blob_store::{BlobStore, S3BlobStore};
pub use config::Config;
pub use customer_service::{CustomerService, ServiceError};
pub use image_compressor::{CompressionSettings, ImageCompressor, JpegCompressor};
pub use image_lifecycle::{ImageLifecycleManager, LifecycleError, UploadFile};
pub use measurement::{Measurement, MeasurementInput, MEASUREMENT_FIELDS};
pub use messaging::{MessagingClient, WhatsAppClient};
pub use models::{Customer, CustomerImage, CustomerInput, ValidationError};
pub use notification::{DispatchError, DispatchReport, NotificationDispatcher};
pub use record_store::{PgRecordStore, RecordStore, StoreError};
pub use storage_usage::{StorageUsageAggregator, UsageReport};
