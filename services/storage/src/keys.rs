//! Object key layout for customer images.
//!
//! Every image lives under a per-customer prefix, split into one folder per
//! [`ImageType`]:
//!
//! ```text
//! {customerID}/uploaded/{imageID}_original.jpg
//! {customerID}/uploaded/{imageID}_thumbnail.jpg
//! {customerID}/saved-result/{imageID}_saved.jpg
//! {customerID}/saved-result/{imageID}_thumbnail.jpg
//! ```
//!
//! Key generation never validates its inputs. Use
//! [`validate_customer_id`](crate::image_id::validate_customer_id) and
//! [`validate_image_id`](crate::image_id::validate_image_id) first.
//! The extractors are a best-effort inverse of the generators.

use crate::image_id::ImageType;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref EXTENSION_SUFFIX: Regex = Regex::new(r"\.(jpg|jpeg|png|gif)$").unwrap();
    static ref DESCRIPTOR_SUFFIX: Regex = Regex::new(r"_(original|saved|thumbnail)$").unwrap();
}

/// Default lifetime of a presigned request, in seconds
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 3600;

pub fn get_original_image_key(customer_id: &str, image_id: &str) -> String {
    format!("{customer_id}/uploaded/{image_id}_original.jpg")
}

pub fn get_uploaded_thumbnail_key(customer_id: &str, image_id: &str) -> String {
    format!("{customer_id}/uploaded/{image_id}_thumbnail.jpg")
}

pub fn get_saved_image_key(customer_id: &str, image_id: &str) -> String {
    format!("{customer_id}/saved-result/{image_id}_saved.jpg")
}

pub fn get_saved_thumbnail_key(customer_id: &str, image_id: &str) -> String {
    format!("{customer_id}/saved-result/{image_id}_thumbnail.jpg")
}

/// Key of the full-size object for an image of the given type
pub fn original_key_for(image_type: ImageType, customer_id: &str, image_id: &str) -> String {
    match image_type {
        ImageType::Uploaded => get_original_image_key(customer_id, image_id),
        ImageType::SavedResult => get_saved_image_key(customer_id, image_id),
    }
}

/// Key of the thumbnail object for an image of the given type
pub fn thumbnail_key_for(image_type: ImageType, customer_id: &str, image_id: &str) -> String {
    match image_type {
        ImageType::Uploaded => get_uploaded_thumbnail_key(customer_id, image_id),
        ImageType::SavedResult => get_saved_thumbnail_key(customer_id, image_id),
    }
}

/// First path segment, if the key has at least two
pub fn extract_customer_id_from_s3_key(s3_key: &str) -> Option<&str> {
    let mut parts = s3_key.split('/');
    let first = parts.next()?;
    parts.next().map(|_| first)
}

/// Last path segment with the extension and then the descriptor suffix
/// stripped, if the key has at least three segments
pub fn extract_image_id_from_s3_key(s3_key: &str) -> Option<String> {
    let parts: Vec<&str> = s3_key.split('/').collect();
    if parts.len() < 3 {
        return None;
    }

    let filename = parts[parts.len() - 1];
    let without_extension = EXTENSION_SUFFIX.replace(filename, "");
    Some(DESCRIPTOR_SUFFIX.replace(&without_extension, "").into_owned())
}

pub fn get_image_type_from_s3_key(s3_key: &str) -> Option<ImageType> {
    if s3_key.contains("/uploaded/") {
        Some(ImageType::Uploaded)
    } else if s3_key.contains("/saved-result/") {
        Some(ImageType::SavedResult)
    } else {
        None
    }
}

pub fn is_thumbnail(s3_key: &str) -> bool {
    s3_key.contains("_thumbnail")
}

/// Folder prefixes owned by a customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerFolders {
    pub uploaded: String,
    pub saved_result: String,
}

pub fn customer_folders(customer_id: &str) -> CustomerFolders {
    CustomerFolders {
        uploaded: format!("{customer_id}/{}/", ImageType::Uploaded.folder()),
        saved_result: format!("{customer_id}/{}/", ImageType::SavedResult.folder()),
    }
}

/// Everything the extractors can recover from a single key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedS3Key {
    #[serde(rename = "customerID")]
    pub customer_id: Option<String>,
    #[serde(rename = "imageID")]
    pub image_id: Option<String>,
    #[serde(rename = "type")]
    pub image_type: Option<ImageType>,
    pub is_thumbnail: bool,
}

/// Operation a presigned request grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresignOperation {
    #[serde(rename = "getObject")]
    GetObject,
    #[serde(rename = "putObject")]
    PutObject,
}

impl fmt::Display for PresignOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresignOperation::GetObject => f.write_str("getObject"),
            PresignOperation::PutObject => f.write_str("putObject"),
        }
    }
}

/// Parameters for signing an object request; the signing itself is done by
/// the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignRequest {
    pub bucket: String,
    pub key: String,
    pub operation: PresignOperation,
    pub expires_in: u64,
}

/// Bucket-aware front for the key scheme
#[derive(Debug, Clone)]
pub struct StorageKeyCodec {
    bucket: String,
}

impl StorageKeyCodec {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `s3://{bucket}/{key}`
    pub fn s3_url(&self, s3_key: &str) -> String {
        format!("s3://{}/{}", self.bucket, s3_key)
    }

    /// Describe a presigned request for `s3_key`, defaulting to one hour
    pub fn presign_request(
        &self,
        operation: PresignOperation,
        s3_key: &str,
        expires_in: Option<u64>,
    ) -> PresignRequest {
        PresignRequest {
            bucket: self.bucket.clone(),
            key: s3_key.to_string(),
            operation,
            expires_in: expires_in.unwrap_or(DEFAULT_PRESIGN_EXPIRY_SECS),
        }
    }

    /// Run every extractor over `s3_key`
    pub fn inspect(&self, s3_key: &str) -> ParsedS3Key {
        ParsedS3Key {
            customer_id: extract_customer_id_from_s3_key(s3_key).map(String::from),
            image_id: extract_image_id_from_s3_key(s3_key),
            image_type: get_image_type_from_s3_key(s3_key),
            is_thumbnail: is_thumbnail(s3_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_id::{generate_image_id, validate_customer_id};

    const CUSTOMER: &str = "customer-12345";
    const IMAGE: &str = "uploaded-1700000000000-abc123";

    #[test]
    fn test_key_layout() {
        assert_eq!(
            get_original_image_key(CUSTOMER, IMAGE),
            "customer-12345/uploaded/uploaded-1700000000000-abc123_original.jpg"
        );
        assert_eq!(
            get_uploaded_thumbnail_key(CUSTOMER, IMAGE),
            "customer-12345/uploaded/uploaded-1700000000000-abc123_thumbnail.jpg"
        );
        assert_eq!(
            get_saved_image_key(CUSTOMER, "saved_result-1-x"),
            "customer-12345/saved-result/saved_result-1-x_saved.jpg"
        );
        assert_eq!(
            get_saved_thumbnail_key(CUSTOMER, "saved_result-1-x"),
            "customer-12345/saved-result/saved_result-1-x_thumbnail.jpg"
        );
    }

    #[test]
    fn test_keys_do_not_validate_inputs() {
        assert_eq!(get_original_image_key("", ""), "/uploaded/_original.jpg");
    }

    #[test]
    fn test_typed_key_helpers() {
        assert_eq!(
            original_key_for(ImageType::SavedResult, CUSTOMER, IMAGE),
            get_saved_image_key(CUSTOMER, IMAGE)
        );
        assert_eq!(
            thumbnail_key_for(ImageType::Uploaded, CUSTOMER, IMAGE),
            get_uploaded_thumbnail_key(CUSTOMER, IMAGE)
        );
    }

    #[test]
    fn test_image_type_recovered_from_generated_keys() {
        assert!(validate_customer_id(CUSTOMER));

        let uploaded = generate_image_id(ImageType::Uploaded);
        assert_eq!(
            get_image_type_from_s3_key(&get_original_image_key(CUSTOMER, &uploaded)),
            Some(ImageType::Uploaded)
        );

        let saved = generate_image_id(ImageType::SavedResult);
        assert_eq!(
            get_image_type_from_s3_key(&get_saved_image_key(CUSTOMER, &saved)),
            Some(ImageType::SavedResult)
        );
        assert_eq!(get_image_type_from_s3_key("customer/other/x.jpg"), None);
    }

    #[test]
    fn test_extract_customer_id() {
        let key = get_original_image_key(CUSTOMER, IMAGE);
        assert_eq!(extract_customer_id_from_s3_key(&key), Some(CUSTOMER));
        assert_eq!(extract_customer_id_from_s3_key("a/b"), Some("a"));
        assert_eq!(extract_customer_id_from_s3_key("no-slash"), None);
        assert_eq!(extract_customer_id_from_s3_key("/leading"), Some(""));
    }

    #[test]
    fn test_extract_image_id() {
        let key = get_original_image_key(CUSTOMER, IMAGE);
        assert_eq!(
            extract_image_id_from_s3_key(&key).as_deref(),
            Some("uploaded-1700000000000-abc123")
        );

        let thumb = get_saved_thumbnail_key(CUSTOMER, "saved_result-5-q");
        assert_eq!(
            extract_image_id_from_s3_key(&thumb).as_deref(),
            Some("saved_result-5-q")
        );

        assert_eq!(extract_image_id_from_s3_key("a/b.jpg"), None);
    }

    #[test]
    fn test_extract_image_id_strips_in_order() {
        // Descriptor only stripped after the extension
        assert_eq!(
            extract_image_id_from_s3_key("c/uploaded/x_original.webp").as_deref(),
            Some("x_original.webp")
        );
        // Only one descriptor is stripped
        assert_eq!(
            extract_image_id_from_s3_key("c/uploaded/x_saved_thumbnail.png").as_deref(),
            Some("x_saved")
        );
        // Matching is case-sensitive
        assert_eq!(
            extract_image_id_from_s3_key("c/uploaded/x_original.JPG").as_deref(),
            Some("x_original.JPG")
        );
    }

    #[test]
    fn test_is_thumbnail() {
        assert!(is_thumbnail(&get_uploaded_thumbnail_key(CUSTOMER, IMAGE)));
        assert!(is_thumbnail(&get_saved_thumbnail_key(CUSTOMER, IMAGE)));
        assert!(!is_thumbnail(&get_original_image_key(CUSTOMER, IMAGE)));
        assert!(!is_thumbnail(&get_saved_image_key(CUSTOMER, IMAGE)));
    }

    #[test]
    fn test_customer_folders() {
        let folders = customer_folders(CUSTOMER);
        assert_eq!(folders.uploaded, "customer-12345/uploaded/");
        assert_eq!(folders.saved_result, "customer-12345/saved-result/");
    }

    #[test]
    fn test_codec_urls_and_presign_requests() {
        let codec = StorageKeyCodec::new("matsight-customer-images");
        let key = get_original_image_key(CUSTOMER, IMAGE);

        assert_eq!(
            codec.s3_url(&key),
            format!("s3://matsight-customer-images/{key}")
        );

        let request = codec.presign_request(PresignOperation::PutObject, &key, None);
        assert_eq!(request.bucket, "matsight-customer-images");
        assert_eq!(request.expires_in, DEFAULT_PRESIGN_EXPIRY_SECS);
        assert_eq!(request.operation.to_string(), "putObject");

        let request = codec.presign_request(PresignOperation::GetObject, &key, Some(60));
        assert_eq!(request.expires_in, 60);
    }

    #[test]
    fn test_inspect() {
        let codec = StorageKeyCodec::new("bucket");
        let parsed = codec.inspect(&get_uploaded_thumbnail_key(CUSTOMER, IMAGE));

        assert_eq!(parsed.customer_id.as_deref(), Some(CUSTOMER));
        assert_eq!(parsed.image_id.as_deref(), Some(IMAGE));
        assert_eq!(parsed.image_type, Some(ImageType::Uploaded));
        assert!(parsed.is_thumbnail);

        let parsed = codec.inspect("loose");
        assert_eq!(parsed.customer_id, None);
        assert_eq!(parsed.image_id, None);
        assert_eq!(parsed.image_type, None);
    }
}
