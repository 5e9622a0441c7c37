use crate::config::S3Config;
use crate::keys::{PresignOperation, PresignRequest};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Time-limited URL for direct object access
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUrl {
    pub url: String,
    pub operation: PresignOperation,
    pub expires_at: DateTime<Utc>,
}

/// Object storage holding image bytes under codec-generated keys
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageObjectStore: Send + Sync {
    /// Store `body` at `key`
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Remove the object at `key`; removing a missing key succeeds
    async fn delete_object(&self, key: &str) -> Result<()>;

    async fn object_exists(&self, key: &str) -> Result<bool>;

    /// Keys under `prefix`, at most `max_keys`
    async fn list_keys(&self, prefix: &str, max_keys: i32) -> Result<Vec<String>>;

    /// Sign `request` for direct client access
    async fn presign(&self, request: &PresignRequest) -> Result<PresignedUrl>;
}

/// S3-backed image object store
pub struct S3ImageStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3ImageStore {
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // MinIO/LocalStack
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
            "S3 image store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn simple_upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload image to S3")?;

        Ok(())
    }

    async fn multipart_upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let mut completed_parts = Vec::new();

        for (index, chunk) in body.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .context("Failed to upload part")?;

            completed_parts.push(
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

#[async_trait]
impl ImageObjectStore for S3ImageStore {
    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let size_bytes = body.len();

        if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_upload(key, body, content_type).await?;
        } else {
            self.simple_upload(key, body, content_type).await?;
        }

        info!(key = %key, size_bytes, "Image object stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete image from S3")?;

        debug!(key = %key, "Image object deleted");
        Ok(())
    }

    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check image existence")
                }
            }
        }
    }

    #[instrument(skip(self))]
    async fn list_keys(&self, prefix: &str, max_keys: i32) -> Result<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .send()
            .await
            .context("Failed to list image objects")?;

        Ok(response
            .contents()
            .iter()
            .filter_map(|obj| obj.key().map(String::from))
            .collect())
    }

    async fn presign(&self, request: &PresignRequest) -> Result<PresignedUrl> {
        let expiry = Duration::from_secs(request.expires_in);
        let presigning_config =
            PresigningConfig::expires_in(expiry).context("Failed to create presigning config")?;

        let presigned = match request.operation {
            PresignOperation::GetObject => self
                .client
                .get_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .presigned(presigning_config)
                .await
                .context("Failed to presign download")?,
            PresignOperation::PutObject => self
                .client
                .put_object()
                .bucket(&request.bucket)
                .key(&request.key)
                .presigned(presigning_config)
                .await
                .context("Failed to presign upload")?,
        };

        let expires_at = Utc::now()
            + chrono::Duration::from_std(expiry).context("Presign expiry out of range")?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            operation: request.operation,
            expires_at,
        })
    }
}
