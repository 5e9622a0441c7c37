use crate::image_id::{Clock, ImageType, SystemClock};
use crate::keys::{original_key_for, thumbnail_key_for};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Default record lifetime in days
pub const DEFAULT_TTL_DAYS: u32 = 365;

/// Default image format when none is supplied
pub const DEFAULT_IMAGE_FORMAT: &str = "jpg";

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Logical status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    #[default]
    Active,
    Deleted,
}

/// Recognition pipeline progress for an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Client surface the image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadSource {
    Web,
    Mobile,
    #[default]
    Api,
}

macro_rules! lowercase_names {
    ($ty:ty { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

lowercase_names!(RecordStatus { Active => "active", Deleted => "deleted" });
lowercase_names!(ProcessingStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});
lowercase_names!(UploadSource { Web => "web", Mobile => "mobile", Api => "api" });

/// Open metadata map with the recognised keys lifted out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_source: Option<UploadSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    /// Any further keys the owning service attaches
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One row of the metadata table, keyed by `(customerID, imageID)`.
///
/// `s3Key` and `thumbnailKey` are derived from the identity fields and are
/// recomputed whenever a record is deserialised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredImageRecord")]
pub struct ImageRecord {
    #[serde(rename = "customerID")]
    customer_id: String,
    #[serde(rename = "imageID")]
    image_id: String,
    created_at: i64,
    #[serde(rename = "type")]
    image_type: ImageType,
    s3_key: String,
    thumbnail_key: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingStatus>,
    pub metadata: ImageMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Wire shape accepted when reading a record back
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredImageRecord {
    #[serde(rename = "customerID")]
    customer_id: String,
    #[serde(rename = "imageID")]
    image_id: String,
    created_at: i64,
    #[serde(rename = "type")]
    image_type: ImageType,
    #[serde(default)]
    status: RecordStatus,
    material_type: Option<String>,
    image_size: Option<u64>,
    image_format: Option<String>,
    processing_status: Option<ProcessingStatus>,
    #[serde(default)]
    metadata: ImageMetadata,
    expires_at: Option<i64>,
}

impl From<StoredImageRecord> for ImageRecord {
    fn from(stored: StoredImageRecord) -> Self {
        let mut record = ImageRecord::new(
            stored.customer_id,
            stored.image_id,
            stored.image_type,
            stored.created_at,
        );
        record.status = stored.status;
        record.material_type = stored.material_type;
        record.image_size = stored.image_size;
        record.image_format = stored.image_format;
        record.processing_status = stored.processing_status;
        record.metadata = stored.metadata;
        record.expires_at = stored.expires_at;
        record
    }
}

impl ImageRecord {
    /// Bare active record with derived keys and no optional fields
    pub fn new(
        customer_id: impl Into<String>,
        image_id: impl Into<String>,
        image_type: ImageType,
        created_at: i64,
    ) -> Self {
        let customer_id = customer_id.into();
        let image_id = image_id.into();
        let s3_key = original_key_for(image_type, &customer_id, &image_id);
        let thumbnail_key = thumbnail_key_for(image_type, &customer_id, &image_id);

        Self {
            customer_id,
            image_id,
            created_at,
            image_type,
            s3_key,
            thumbnail_key,
            status: RecordStatus::Active,
            material_type: None,
            image_size: None,
            image_format: None,
            processing_status: None,
            metadata: ImageMetadata::default(),
            expires_at: None,
        }
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn s3_key(&self) -> &str {
        &self.s3_key
    }

    pub fn thumbnail_key(&self) -> &str {
        &self.thumbnail_key
    }

    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }

    pub fn mark_deleted(&mut self) {
        self.status = RecordStatus::Deleted;
    }

    /// Whether the TTL marker has passed at `now_ms`
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= now_ms)
    }
}

/// Optional inputs to [`create_image_metadata`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadataOptions {
    pub material_type: Option<String>,
    pub image_size: Option<u64>,
    pub image_format: Option<String>,
    pub processing_status: Option<ProcessingStatus>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub upload_source: Option<UploadSource>,
    pub original_filename: Option<String>,
    pub material: Option<String>,
    pub ttl_days: Option<u32>,
}

/// Build a complete record stamped with the wall clock
pub fn create_image_metadata(
    customer_id: &str,
    image_id: &str,
    image_type: ImageType,
    options: ImageMetadataOptions,
) -> ImageRecord {
    create_image_metadata_with(customer_id, image_id, image_type, options, &SystemClock)
}

/// Build a complete record, applying the default cascade:
///
/// - `imageFormat` falls back to `jpg`
/// - `processingStatus` falls back to `pending`
/// - `metadata.uploadSource` falls back to `api`
/// - `metadata.material` falls back to `materialType`
/// - `expiresAt` is `createdAt + ttlDays` days, `ttlDays` falling back to 365
///
/// Empty strings and a zero TTL count as absent.
pub fn create_image_metadata_with<C: Clock + ?Sized>(
    customer_id: &str,
    image_id: &str,
    image_type: ImageType,
    options: ImageMetadataOptions,
    clock: &C,
) -> ImageRecord {
    let now = clock.now_millis();
    let ttl_days = options
        .ttl_days
        .filter(|days| *days != 0)
        .unwrap_or(DEFAULT_TTL_DAYS);

    let material = non_empty(options.material).or_else(|| non_empty(options.material_type.clone()));

    let mut record = ImageRecord::new(customer_id, image_id, image_type, now);
    record.material_type = options.material_type;
    record.image_size = options.image_size;
    record.image_format = Some(
        non_empty(options.image_format).unwrap_or_else(|| DEFAULT_IMAGE_FORMAT.to_string()),
    );
    record.processing_status = Some(options.processing_status.unwrap_or_default());
    record.metadata = ImageMetadata {
        width: options.width,
        height: options.height,
        upload_source: Some(options.upload_source.unwrap_or_default()),
        original_filename: options.original_filename,
        material,
        extra: Map::new(),
    };
    record.expires_at = Some(now + i64::from(ttl_days) * MILLIS_PER_DAY);
    record
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Dimensions and provenance captured when an image enters processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetadata {
    pub width: u32,
    pub height: u32,
    pub upload_source: UploadSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub processing_timestamp: i64,
}

pub fn create_processing_metadata<C: Clock + ?Sized>(
    width: u32,
    height: u32,
    upload_source: Option<UploadSource>,
    original_filename: Option<&str>,
    clock: &C,
) -> ProcessingMetadata {
    ProcessingMetadata {
        width,
        height,
        upload_source: upload_source.unwrap_or_default(),
        original_filename: original_filename.map(String::from),
        processing_timestamp: clock.now_millis(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_id::FixedClock;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn test_defaults_applied() {
        let record = create_image_metadata(
            "cust-1",
            "uploaded-123-abc",
            ImageType::Uploaded,
            ImageMetadataOptions::default(),
        );

        assert_eq!(record.image_format.as_deref(), Some("jpg"));
        assert_eq!(record.processing_status, Some(ProcessingStatus::Pending));
        assert_eq!(record.metadata.upload_source, Some(UploadSource::Api));
        assert_eq!(record.status, RecordStatus::Active);
        assert_eq!(
            record.expires_at.unwrap() - record.created_at(),
            365 * 86_400_000
        );
    }

    #[test]
    fn test_keys_follow_type() {
        let clock = FixedClock(NOW);
        let uploaded = create_image_metadata_with(
            "cust-1",
            "uploaded-123-abc",
            ImageType::Uploaded,
            ImageMetadataOptions::default(),
            &clock,
        );
        assert_eq!(uploaded.s3_key(), "cust-1/uploaded/uploaded-123-abc_original.jpg");
        assert_eq!(
            uploaded.thumbnail_key(),
            "cust-1/uploaded/uploaded-123-abc_thumbnail.jpg"
        );

        let saved = create_image_metadata_with(
            "cust-1",
            "saved_result-123-abc",
            ImageType::SavedResult,
            ImageMetadataOptions::default(),
            &clock,
        );
        assert_eq!(
            saved.s3_key(),
            "cust-1/saved-result/saved_result-123-abc_saved.jpg"
        );
        assert_eq!(
            saved.thumbnail_key(),
            "cust-1/saved-result/saved_result-123-abc_thumbnail.jpg"
        );
    }

    #[test]
    fn test_explicit_options_win() {
        let options = ImageMetadataOptions {
            material_type: Some("graphene".to_string()),
            image_size: Some(2_048_576),
            image_format: Some("png".to_string()),
            processing_status: Some(ProcessingStatus::Completed),
            width: Some(1920),
            height: Some(1080),
            upload_source: Some(UploadSource::Web),
            original_filename: Some("graphene_sample.png".to_string()),
            material: Some("hBN".to_string()),
            ttl_days: Some(30),
        };
        let record = create_image_metadata_with(
            "customer-12345",
            "uploaded-1700000000000-abc123",
            ImageType::Uploaded,
            options,
            &FixedClock(NOW),
        );

        assert_eq!(record.created_at(), NOW);
        assert_eq!(record.material_type.as_deref(), Some("graphene"));
        assert_eq!(record.image_size, Some(2_048_576));
        assert_eq!(record.image_format.as_deref(), Some("png"));
        assert_eq!(record.processing_status, Some(ProcessingStatus::Completed));
        assert_eq!(record.metadata.material.as_deref(), Some("hBN"));
        assert_eq!(record.metadata.upload_source, Some(UploadSource::Web));
        assert_eq!(record.expires_at, Some(NOW + 30 * MILLIS_PER_DAY));
    }

    #[test]
    fn test_material_falls_back_to_material_type() {
        let options = ImageMetadataOptions {
            material_type: Some("graphene".to_string()),
            material: Some(String::new()),
            ..Default::default()
        };
        let record = create_image_metadata_with(
            "cust-1",
            "uploaded-123-abc",
            ImageType::Uploaded,
            options,
            &FixedClock(NOW),
        );
        assert_eq!(record.metadata.material.as_deref(), Some("graphene"));
    }

    #[test]
    fn test_falsy_values_use_defaults() {
        let options = ImageMetadataOptions {
            image_format: Some(String::new()),
            ttl_days: Some(0),
            ..Default::default()
        };
        let record = create_image_metadata_with(
            "cust-1",
            "uploaded-123-abc",
            ImageType::Uploaded,
            options,
            &FixedClock(NOW),
        );
        assert_eq!(record.image_format.as_deref(), Some("jpg"));
        assert_eq!(record.expires_at, Some(NOW + 365 * MILLIS_PER_DAY));
    }

    #[test]
    fn test_serialized_item_shape() {
        let record = create_image_metadata_with(
            "cust-1",
            "uploaded-123-abc",
            ImageType::Uploaded,
            ImageMetadataOptions::default(),
            &FixedClock(NOW),
        );
        let item = serde_json::to_value(&record).unwrap();

        assert_eq!(item["customerID"], "cust-1");
        assert_eq!(item["imageID"], "uploaded-123-abc");
        assert_eq!(item["createdAt"], NOW);
        assert_eq!(item["type"], "UPLOADED");
        assert_eq!(item["s3Key"], "cust-1/uploaded/uploaded-123-abc_original.jpg");
        assert_eq!(item["status"], "active");
        assert_eq!(item["imageFormat"], "jpg");
        assert_eq!(item["processingStatus"], "pending");
        assert_eq!(item["metadata"]["uploadSource"], "api");
        assert!(item.get("materialType").is_none());
    }

    #[test]
    fn test_deserialize_recomputes_keys() {
        let item = json!({
            "customerID": "cust-1",
            "imageID": "saved_result-123-abc",
            "createdAt": NOW,
            "type": "SAVED_RESULT",
            "s3Key": "tampered/key.jpg",
            "thumbnailKey": "tampered/thumb.jpg",
            "status": "deleted",
            "metadata": { "width": 640, "lens": "50x" }
        });
        let record: ImageRecord = serde_json::from_value(item).unwrap();

        assert_eq!(
            record.s3_key(),
            "cust-1/saved-result/saved_result-123-abc_saved.jpg"
        );
        assert_eq!(record.status, RecordStatus::Deleted);
        assert_eq!(record.metadata.width, Some(640));
        assert_eq!(record.metadata.extra["lens"], "50x");
    }

    #[test]
    fn test_lifecycle() {
        let mut record = create_image_metadata_with(
            "cust-1",
            "uploaded-123-abc",
            ImageType::Uploaded,
            ImageMetadataOptions {
                ttl_days: Some(1),
                ..Default::default()
            },
            &FixedClock(NOW),
        );

        assert!(record.is_active());
        assert!(!record.is_expired(NOW));
        assert!(record.is_expired(NOW + MILLIS_PER_DAY));

        record.mark_deleted();
        assert!(!record.is_active());
    }

    #[test]
    fn test_processing_metadata() {
        let meta = create_processing_metadata(1920, 1080, None, Some("a.jpg"), &FixedClock(NOW));
        assert_eq!(meta.upload_source, UploadSource::Api);
        assert_eq!(meta.processing_timestamp, NOW);

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["originalFilename"], "a.jpg");
        assert_eq!(value["processingTimestamp"], NOW);
    }

    #[test]
    fn test_status_names() {
        assert_eq!("failed".parse::<ProcessingStatus>().unwrap(), ProcessingStatus::Failed);
        assert_eq!(RecordStatus::Deleted.to_string(), "deleted");
        assert!("WEB".parse::<UploadSource>().is_err());
    }
}
