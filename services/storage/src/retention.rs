use crate::config::RetentionConfig;
use crate::image_id::Clock;
use crate::metadata_store::ImageRecordStore;
use crate::object_store::ImageObjectStore;
use crate::record::ImageRecord;
use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired records found
    pub examined: usize,
    /// Records whose objects and row were removed
    pub purged: usize,
    /// Records left in place for the next sweep
    pub failed: usize,
}

/// Removes records whose `expiresAt` has passed, together with their objects
pub struct RetentionSweeper {
    records: Arc<dyn ImageRecordStore>,
    objects: Arc<dyn ImageObjectStore>,
    clock: Arc<dyn Clock>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        records: Arc<dyn ImageRecordStore>,
        objects: Arc<dyn ImageObjectStore>,
        clock: Arc<dyn Clock>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            records,
            objects,
            clock,
            config,
        }
    }

    /// Time between sweeps, never zero
    fn tick_period(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs.max(1))
    }

    /// Sweep on the configured interval until the task is dropped
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.tick_period());

        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            "Starting retention sweeper"
        );

        loop {
            ticker.tick().await;

            match self.sweep_once().await {
                Ok(report) if report.examined > 0 => {
                    info!(
                        examined = report.examined,
                        purged = report.purged,
                        failed = report.failed,
                        "Retention sweep finished"
                    );
                }
                Ok(_) => debug!("No expired images"),
                Err(e) => error!(error = %e, "Retention sweep failed"),
            }
        }
    }

    /// Purge one batch of expired records
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let now = self.clock.now_millis();
        let expired = self
            .records
            .expired_records(now, self.config.batch_size)
            .await
            .context("Failed to load expired images")?;

        let examined = expired.len();
        let concurrency = self.config.concurrency.max(1);

        let results: Vec<Result<()>> = stream::iter(expired)
            .map(|record| async move { self.purge(&record, now).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        let purged = examined - failed;

        metrics::counter!("storage.images.expired").increment(purged as u64);

        Ok(SweepReport {
            examined,
            purged,
            failed,
        })
    }

    /// Objects first, then the row. A failed record is deferred behind the
    /// rest of the backlog and retried on a later sweep.
    async fn purge(&self, record: &ImageRecord, now: i64) -> Result<()> {
        let outcome = async {
            futures::try_join!(
                self.objects.delete_object(record.s3_key()),
                self.objects.delete_object(record.thumbnail_key()),
            )?;
            self.records
                .delete_record(record.customer_id(), record.image_id())
                .await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Err(ref e) = outcome {
            warn!(
                error = %e,
                customer_id = %record.customer_id(),
                image_id = %record.image_id(),
                "Failed to purge expired image"
            );

            if let Err(e) = self
                .records
                .defer_expired(record.customer_id(), record.image_id(), now)
                .await
            {
                error!(error = %e, image_id = %record.image_id(), "Failed to defer expired image");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_id::{FixedClock, ImageType};
    use crate::metadata_store::MockImageRecordStore;
    use crate::object_store::MockImageObjectStore;
    use anyhow::anyhow;

    const NOW: i64 = 1_700_000_000_000;

    fn expired(image_id: &str) -> ImageRecord {
        let mut record = ImageRecord::new("customer-12345", image_id, ImageType::Uploaded, NOW - 10);
        record.expires_at = Some(NOW - 1);
        record
    }

    fn config() -> RetentionConfig {
        RetentionConfig {
            enabled: true,
            interval_secs: 60,
            batch_size: 50,
            concurrency: 4,
        }
    }

    #[tokio::test]
    async fn test_sweep_purges_objects_and_rows() {
        let mut records = MockImageRecordStore::new();
        records
            .expect_expired_records()
            .withf(|now, limit| *now == NOW && *limit == 50)
            .returning(|_, _| Ok(vec![expired("uploaded-1-aaaa"), expired("uploaded-2-bbbb")]));
        records
            .expect_delete_record()
            .times(2)
            .returning(|_, _| Ok(true));

        let mut objects = MockImageObjectStore::new();
        objects
            .expect_delete_object()
            .times(4)
            .returning(|_| Ok(()));

        let sweeper = RetentionSweeper::new(
            Arc::new(records),
            Arc::new(objects),
            Arc::new(FixedClock(NOW)),
            config(),
        );

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                examined: 2,
                purged: 2,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_sweep_keeps_row_when_object_delete_fails() {
        let mut records = MockImageRecordStore::new();
        records
            .expect_expired_records()
            .returning(|_, _| Ok(vec![expired("uploaded-1-aaaa")]));
        records.expect_delete_record().never();
        records
            .expect_defer_expired()
            .withf(|_, image_id, now| image_id.to_string() == "uploaded-1-aaaa" && *now == NOW)
            .times(1)
            .returning(|_, _, _| Ok(true));

        let mut objects = MockImageObjectStore::new();
        objects.expect_delete_object().returning(|key| {
            if key.ends_with("_thumbnail.jpg") {
                Err(anyhow!("access denied"))
            } else {
                Ok(())
            }
        });

        let sweeper = RetentionSweeper::new(
            Arc::new(records),
            Arc::new(objects),
            Arc::new(FixedClock(NOW)),
            config(),
        );

        let report = sweeper.sweep_once().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.purged, 0);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_expired() {
        let mut records = MockImageRecordStore::new();
        records
            .expect_expired_records()
            .returning(|_, _| Ok(Vec::new()));

        let sweeper = RetentionSweeper::new(
            Arc::new(records),
            Arc::new(MockImageObjectStore::new()),
            Arc::new(FixedClock(NOW)),
            config(),
        );

        assert_eq!(sweeper.sweep_once().await.unwrap(), SweepReport::default());
    }

    #[test]
    fn test_zero_interval_is_raised_to_one_second() {
        let sweeper = RetentionSweeper::new(
            Arc::new(MockImageRecordStore::new()),
            Arc::new(MockImageObjectStore::new()),
            Arc::new(FixedClock(NOW)),
            RetentionConfig {
                interval_secs: 0,
                ..config()
            },
        );

        assert_eq!(sweeper.tick_period(), Duration::from_secs(1));
    }
}
