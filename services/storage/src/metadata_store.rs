use crate::config::DatabaseConfig;
use crate::image_id::ImageType;
use crate::record::{ImageRecord, ProcessingStatus, RecordStatus};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Query parameters for image search.
///
/// Every filter maps onto one of the table's secondary indexes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageQuery {
    /// Filter by customer
    pub customer_id: Option<String>,
    /// Filter by image type
    pub image_type: Option<ImageType>,
    /// Filter by record status
    pub status: Option<RecordStatus>,
    /// Filter by material type
    pub material_type: Option<String>,
    /// Filter by processing status
    pub processing_status: Option<ProcessingStatus>,
    /// Filter by image format
    pub image_format: Option<String>,
    /// Created at or after (epoch ms)
    pub created_from: Option<i64>,
    /// Created before (epoch ms)
    pub created_until: Option<i64>,
    /// Maximum number of results
    pub limit: Option<i64>,
    /// Order by creation time (true = ascending, false = descending)
    pub ascending: bool,
}

/// Metadata table keyed by `(customerID, imageID)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageRecordStore: Send + Sync {
    /// Connectivity check
    async fn ping(&self) -> Result<()>;

    /// Insert a record unless one with the same key exists.
    /// Returns `false` on collision.
    async fn put_record(&self, record: &ImageRecord) -> Result<bool>;

    async fn get_record(&self, customer_id: &str, image_id: &str) -> Result<Option<ImageRecord>>;

    async fn query_records(&self, query: &ImageQuery) -> Result<Vec<ImageRecord>>;

    /// Updates below touch active records only and return `false` otherwise
    async fn update_processing_status(
        &self,
        customer_id: &str,
        image_id: &str,
        status: ProcessingStatus,
    ) -> Result<bool>;

    /// Shallow-merge `patch` into the stored metadata map
    async fn merge_metadata(
        &self,
        customer_id: &str,
        image_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<bool>;

    async fn set_image_size(&self, customer_id: &str, image_id: &str, image_size: u64)
        -> Result<bool>;

    /// Logical delete
    async fn mark_deleted(&self, customer_id: &str, image_id: &str) -> Result<bool>;

    /// Records whose TTL has passed at `now_ms`. Records never swept come
    /// first, oldest expiry first; deferred records follow by attempt time.
    async fn expired_records(&self, now_ms: i64, limit: i64) -> Result<Vec<ImageRecord>>;

    /// Push a record that failed to purge behind the rest of the backlog
    async fn defer_expired(&self, customer_id: &str, image_id: &str, now_ms: i64)
        -> Result<bool>;

    /// Physical delete
    async fn delete_record(&self, customer_id: &str, image_id: &str) -> Result<bool>;
}

/// Raw row from `customer_images`
#[derive(Debug, Clone, FromRow)]
struct ImageRecordRow {
    customer_id: String,
    image_id: String,
    created_at: i64,
    image_type: String,
    status: String,
    material_type: Option<String>,
    image_size: Option<i64>,
    image_format: Option<String>,
    processing_status: Option<String>,
    metadata: serde_json::Value,
    expires_at: Option<i64>,
}

impl TryFrom<ImageRecordRow> for ImageRecord {
    type Error = anyhow::Error;

    fn try_from(row: ImageRecordRow) -> Result<Self> {
        let image_type: ImageType = row.image_type.parse()?;

        let mut record = ImageRecord::new(row.customer_id, row.image_id, image_type, row.created_at);
        record.status = row.status.parse().map_err(|e: String| anyhow!(e))?;
        record.material_type = row.material_type;
        record.image_size = row.image_size.map(|size| size as u64);
        record.image_format = row.image_format;
        record.processing_status = row
            .processing_status
            .map(|s| s.parse().map_err(|e: String| anyhow!(e)))
            .transpose()?;
        record.metadata =
            serde_json::from_value(row.metadata).context("Malformed metadata column")?;
        record.expires_at = row.expires_at;

        Ok(record)
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT customer_id, image_id, created_at, image_type, status,
           material_type, image_size, image_format, processing_status,
           metadata, expires_at
    FROM customer_images
"#;

const UPDATE_PROCESSING_STATUS_SQL: &str = r#"
    UPDATE customer_images SET processing_status = $3
    WHERE customer_id = $1 AND image_id = $2 AND status = 'active'
"#;

// `||` replaces only the top-level keys present in $3
const MERGE_METADATA_SQL: &str = r#"
    UPDATE customer_images SET metadata = metadata || $3::jsonb
    WHERE customer_id = $1 AND image_id = $2 AND status = 'active'
"#;

const SET_IMAGE_SIZE_SQL: &str = r#"
    UPDATE customer_images SET image_size = $3
    WHERE customer_id = $1 AND image_id = $2 AND status = 'active'
"#;

const EXPIRED_RECORDS_ORDER: &str =
    "ORDER BY COALESCE(sweep_attempted_at, 0) ASC, expires_at ASC LIMIT $2";

const DEFER_EXPIRED_SQL: &str = r#"
    UPDATE customer_images SET sweep_attempted_at = $3
    WHERE customer_id = $1 AND image_id = $2
"#;

/// PostgreSQL-backed metadata table
pub struct PgImageRecordStore {
    pool: PgPool,
}

impl PgImageRecordStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_records(&self, sql: &str, now_ms: i64, limit: i64) -> Result<Vec<ImageRecord>> {
        let rows = sqlx::query_as::<_, ImageRecordRow>(sql)
            .bind(now_ms)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("Failed to query expired images")?;

        rows.into_iter().map(ImageRecord::try_from).collect()
    }
}

/// Build the filtered select for `query`, numbering placeholders in bind order
fn build_query_sql(query: &ImageQuery) -> String {
    let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
    let mut param_count = 0;

    let filters = [
        (query.customer_id.is_some(), "customer_id ="),
        (query.image_type.is_some(), "image_type ="),
        (query.status.is_some(), "status ="),
        (query.material_type.is_some(), "material_type ="),
        (query.processing_status.is_some(), "processing_status ="),
        (query.image_format.is_some(), "image_format ="),
        (query.created_from.is_some(), "created_at >="),
        (query.created_until.is_some(), "created_at <"),
    ];

    for (present, condition) in filters {
        if present {
            param_count += 1;
            sql.push_str(&format!(" AND {condition} ${param_count}"));
        }
    }

    if query.ascending {
        sql.push_str(" ORDER BY created_at ASC, image_id ASC");
    } else {
        sql.push_str(" ORDER BY created_at DESC, image_id DESC");
    }

    if query.limit.is_some() {
        param_count += 1;
        sql.push_str(&format!(" LIMIT ${param_count}"));
    }

    sql
}

#[async_trait]
impl ImageRecordStore for PgImageRecordStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(customer_id = %record.customer_id(), image_id = %record.image_id()))]
    async fn put_record(&self, record: &ImageRecord) -> Result<bool> {
        let metadata = serde_json::to_value(&record.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO customer_images (
                customer_id, image_id, created_at, image_type,
                s3_key, thumbnail_key, status, material_type,
                image_size, image_format, processing_status,
                metadata, expires_at
            ) VALUES (
                $1, $2, $3, $4,
                $5, $6, $7, $8,
                $9, $10, $11,
                $12, $13
            )
            ON CONFLICT (customer_id, image_id) DO NOTHING
            "#,
        )
        .bind(record.customer_id())
        .bind(record.image_id())
        .bind(record.created_at())
        .bind(record.image_type().as_str())
        .bind(record.s3_key())
        .bind(record.thumbnail_key())
        .bind(record.status.as_str())
        .bind(&record.material_type)
        .bind(record.image_size.map(|size| size as i64))
        .bind(&record.image_format)
        .bind(record.processing_status.map(|s| s.as_str()))
        .bind(&metadata)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert image record")?;

        let inserted = result.rows_affected() == 1;
        debug!(inserted, s3_key = %record.s3_key(), "Image record written");

        Ok(inserted)
    }

    async fn get_record(&self, customer_id: &str, image_id: &str) -> Result<Option<ImageRecord>> {
        let row = sqlx::query_as::<_, ImageRecordRow>(&format!(
            "{SELECT_COLUMNS} WHERE customer_id = $1 AND image_id = $2"
        ))
        .bind(customer_id)
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query image record")?;

        row.map(ImageRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn query_records(&self, query: &ImageQuery) -> Result<Vec<ImageRecord>> {
        let sql = build_query_sql(query);
        let mut query_builder = sqlx::query_as::<_, ImageRecordRow>(&sql);

        if let Some(ref customer_id) = query.customer_id {
            query_builder = query_builder.bind(customer_id);
        }
        if let Some(image_type) = query.image_type {
            query_builder = query_builder.bind(image_type.as_str());
        }
        if let Some(status) = query.status {
            query_builder = query_builder.bind(status.as_str());
        }
        if let Some(ref material_type) = query.material_type {
            query_builder = query_builder.bind(material_type);
        }
        if let Some(processing_status) = query.processing_status {
            query_builder = query_builder.bind(processing_status.as_str());
        }
        if let Some(ref image_format) = query.image_format {
            query_builder = query_builder.bind(image_format);
        }
        if let Some(created_from) = query.created_from {
            query_builder = query_builder.bind(created_from);
        }
        if let Some(created_until) = query.created_until {
            query_builder = query_builder.bind(created_until);
        }
        if let Some(limit) = query.limit {
            query_builder = query_builder.bind(limit);
        }

        let rows = query_builder
            .fetch_all(&self.pool)
            .await
            .context("Failed to query image records")?;

        rows.into_iter().map(ImageRecord::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn update_processing_status(
        &self,
        customer_id: &str,
        image_id: &str,
        status: ProcessingStatus,
    ) -> Result<bool> {
        let result = sqlx::query(UPDATE_PROCESSING_STATUS_SQL)
            .bind(customer_id)
            .bind(image_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .context("Failed to update processing status")?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, patch), fields(keys = patch.len()))]
    async fn merge_metadata(
        &self,
        customer_id: &str,
        image_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<bool> {
        let patch = Value::Object(patch.clone());

        let result = sqlx::query(MERGE_METADATA_SQL)
            .bind(customer_id)
            .bind(image_id)
            .bind(&patch)
            .execute(&self.pool)
            .await
            .context("Failed to update image metadata")?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_image_size(
        &self,
        customer_id: &str,
        image_id: &str,
        image_size: u64,
    ) -> Result<bool> {
        let result = sqlx::query(SET_IMAGE_SIZE_SQL)
            .bind(customer_id)
            .bind(image_id)
            .bind(image_size as i64)
            .execute(&self.pool)
            .await
            .context("Failed to update image size")?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn mark_deleted(&self, customer_id: &str, image_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE customer_images SET status = 'deleted'
            WHERE customer_id = $1 AND image_id = $2
            "#,
        )
        .bind(customer_id)
        .bind(image_id)
        .execute(&self.pool)
        .await
        .context("Failed to mark image deleted")?;

        Ok(result.rows_affected() == 1)
    }

    async fn expired_records(&self, now_ms: i64, limit: i64) -> Result<Vec<ImageRecord>> {
        self.fetch_records(
            &format!(
                "{SELECT_COLUMNS} WHERE expires_at IS NOT NULL AND expires_at <= $1 \
                 {EXPIRED_RECORDS_ORDER}"
            ),
            now_ms,
            limit,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn defer_expired(
        &self,
        customer_id: &str,
        image_id: &str,
        now_ms: i64,
    ) -> Result<bool> {
        let result = sqlx::query(DEFER_EXPIRED_SQL)
            .bind(customer_id)
            .bind(image_id)
            .bind(now_ms)
            .execute(&self.pool)
            .await
            .context("Failed to defer expired image")?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn delete_record(&self, customer_id: &str, image_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM customer_images WHERE customer_id = $1 AND image_id = $2",
        )
        .bind(customer_id)
        .bind(image_id)
        .execute(&self.pool)
        .await
        .context("Failed to delete image record")?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row() -> ImageRecordRow {
        ImageRecordRow {
            customer_id: "customer-12345".to_string(),
            image_id: "uploaded-1700000000000-abc123".to_string(),
            created_at: 1_700_000_000_000,
            image_type: "UPLOADED".to_string(),
            status: "active".to_string(),
            material_type: Some("graphene".to_string()),
            image_size: Some(2_048_576),
            image_format: Some("jpg".to_string()),
            processing_status: Some("pending".to_string()),
            metadata: json!({ "width": 1920, "uploadSource": "web" }),
            expires_at: Some(1_731_536_000_000),
        }
    }

    #[test]
    fn test_row_conversion() {
        let record = ImageRecord::try_from(row()).unwrap();

        assert_eq!(record.image_type(), ImageType::Uploaded);
        assert_eq!(
            record.s3_key(),
            "customer-12345/uploaded/uploaded-1700000000000-abc123_original.jpg"
        );
        assert_eq!(record.processing_status, Some(ProcessingStatus::Pending));
        assert_eq!(record.image_size, Some(2_048_576));
        assert_eq!(record.metadata.width, Some(1920));
    }

    #[test]
    fn test_row_conversion_rejects_unknown_values() {
        let mut bad_type = row();
        bad_type.image_type = "THUMBNAIL".to_string();
        assert!(ImageRecord::try_from(bad_type).is_err());

        let mut bad_status = row();
        bad_status.status = "archived".to_string();
        assert!(ImageRecord::try_from(bad_status).is_err());
    }

    #[test]
    fn test_build_query_sql_numbers_placeholders() {
        let query = ImageQuery {
            customer_id: Some("customer-12345".to_string()),
            processing_status: Some(ProcessingStatus::Failed),
            limit: Some(10),
            ..Default::default()
        };
        let sql = build_query_sql(&query);

        assert!(sql.contains("AND customer_id = $1"));
        assert!(sql.contains("AND processing_status = $2"));
        assert!(sql.contains("ORDER BY created_at DESC"));
        assert!(sql.ends_with("LIMIT $3"));
        assert!(!sql.contains("material_type ="));
    }

    #[test]
    fn test_build_query_sql_without_filters() {
        let sql = build_query_sql(&ImageQuery {
            ascending: true,
            ..Default::default()
        });
        assert!(sql.contains("WHERE 1=1 ORDER BY created_at ASC"));
        assert!(!sql.contains('$'));
    }

    #[test]
    fn test_metadata_merge_happens_in_the_database() {
        assert!(MERGE_METADATA_SQL.contains("SET metadata = metadata || $3::jsonb"));
        assert!(MERGE_METADATA_SQL.contains("status = 'active'"));
    }

    #[test]
    fn test_updates_skip_deleted_records() {
        for sql in [UPDATE_PROCESSING_STATUS_SQL, SET_IMAGE_SIZE_SQL] {
            assert!(sql.contains("AND status = 'active'"));
        }
    }

    #[test]
    fn test_expired_records_put_deferred_records_last() {
        assert!(EXPIRED_RECORDS_ORDER
            .starts_with("ORDER BY COALESCE(sweep_attempted_at, 0) ASC, expires_at ASC"));
        assert!(DEFER_EXPIRED_SQL.contains("SET sweep_attempted_at = $3"));
    }
}
