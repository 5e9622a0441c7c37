//! MatSight Image Storage Service
//!
//! Naming and metadata scheme for customer images kept in a single S3 bucket,
//! plus the service that registers images, hands out presigned URLs and
//! expires records once their TTL has passed.
//!
//! ## Key Layout
//!
//! ```text
//! s3://{bucket}/
//! └── {customerID}/
//!     ├── uploaded/
//!     │   ├── uploaded-{ts}-{rand}_original.jpg
//!     │   └── uploaded-{ts}-{rand}_thumbnail.jpg
//!     └── saved-result/
//!         ├── saved_result-{ts}-{rand}_saved.jpg
//!         └── saved_result-{ts}-{rand}_thumbnail.jpg
//! ```
//!
//! Every object key is `.jpg` regardless of the stored `imageFormat`.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   HTTP clients ───▶│ Image API    │
//!                    └──────────────┘
//!                      │          │
//!          ┌───────────┘          └───────────┐
//!          ▼                                  ▼
//! ┌──────────────┐                   ┌──────────────┐
//! │ Key Codec    │                   │ Record Store │
//! │ (ids, keys)  │                   │ (PostgreSQL) │
//! └──────────────┘                   └──────────────┘
//!          │                                  ▲
//!          ▼                                  │
//! ┌──────────────┐                   ┌──────────────┐
//! │ Object Store │◀──────────────────│ Retention    │
//! │ (S3)         │                   │ Sweeper      │
//! └──────────────┘                   └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod files;
pub mod image_id;
pub mod keys;
pub mod metadata_store;
pub mod object_store;
pub mod record;
pub mod retention;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::KeyError;
pub use extract::{ApiJson, ApiPath, ApiQuery};
pub use files::{
    format_file_size, generate_thumbnail_filename, get_file_extension, validate_image_format,
};
pub use image_id::{
    generate_image_id, parse_image_id, validate_customer_id, validate_image_id, Clock,
    FixedClock, ImageType, ParsedImageId, SystemClock,
};
pub use keys::{
    customer_folders, extract_customer_id_from_s3_key, extract_image_id_from_s3_key,
    get_image_type_from_s3_key, get_original_image_key, get_saved_image_key,
    get_saved_thumbnail_key, get_uploaded_thumbnail_key, is_thumbnail, CustomerFolders,
    ParsedS3Key, PresignOperation, PresignRequest, StorageKeyCodec,
};
pub use metadata_store::{ImageQuery, ImageRecordStore, PgImageRecordStore};
pub use object_store::{ImageObjectStore, PresignedUrl, S3ImageStore};
pub use record::{
    create_image_metadata, create_processing_metadata, ImageMetadata, ImageMetadataOptions,
    ImageRecord, ProcessingMetadata, ProcessingStatus, RecordStatus, UploadSource,
};
pub use retention::{RetentionSweeper, SweepReport};
