//! Consumer-side processing of one queued notice: decode, upsert, mirror
//! images, then decide how the message is settled.

use crate::blob::BlobStore;
use crate::broker::consumer::{Disposition, MessageHandler};
use crate::config::STATS_LOG_INTERVAL;
use crate::images::ImageMirror;
use crate::models::NoticeRecord;
use crate::stats::OrganizeStats;
use crate::store::{NoticeStore, RecordUpserter, UpsertOutcome};
use async_trait::async_trait;
use tracing::{error, info, warn};

pub struct NoticeProcessor<S: NoticeStore, B: BlobStore> {
    upserter: RecordUpserter<S>,
    images: ImageMirror<B>,
    stats: OrganizeStats,
}

impl<S: NoticeStore, B: BlobStore> NoticeProcessor<S, B> {
    pub fn new(upserter: RecordUpserter<S>, images: ImageMirror<B>) -> Self {
        Self {
            upserter,
            images,
            stats: OrganizeStats::new(),
        }
    }

    pub fn stats(&self) -> &OrganizeStats {
        &self.stats
    }

    pub fn upserter(&self) -> &RecordUpserter<S> {
        &self.upserter
    }

    async fn process(&self, record: &NoticeRecord) -> Disposition {
        match self.upserter.upsert(record).await {
            Ok(UpsertOutcome::Inserted) => self.stats.inc_inserted(),
            Ok(UpsertOutcome::Updated { .. }) => self.stats.inc_updated(),
            Ok(UpsertOutcome::Unchanged) => self.stats.inc_unchanged(),
            Err(e) => {
                error!(entity_id = %record.entity_id, error = %e, "Upsert failed, requeueing");
                return Disposition::Requeue;
            }
        }

        match self.images.mirror(record).await {
            Ok(report) => {
                self.stats
                    .add_images(report.stored as u64, report.failed as u64);
                Disposition::Ack
            }
            Err(e) => {
                warn!(entity_id = %record.entity_id, error = %e, "Image index unavailable, requeueing");
                Disposition::Requeue
            }
        }
    }

    fn log_progress(&self, count: u64) {
        if count % STATS_LOG_INTERVAL == 0 {
            info!(
                messages = count,
                inserted = self.stats.inserts(),
                updated = self.stats.updates(),
                unchanged = self.stats.unchanged_count(),
                discarded = self.stats.discards(),
                requeued = self.stats.requeues(),
                images = self.stats.images(),
                "Organizer progress"
            );
        }
    }
}

#[async_trait]
impl<S: NoticeStore, B: BlobStore> MessageHandler for NoticeProcessor<S, B> {
    async fn handle(&self, body: &[u8]) -> Disposition {
        let count = self.stats.inc_messages();

        let disposition = match serde_json::from_slice::<NoticeRecord>(body) {
            Ok(record) => self.process(&record).await,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "Discarding undecodable message");
                Disposition::Discard
            }
        };

        match disposition {
            Disposition::Discard => self.stats.inc_discarded(),
            Disposition::Requeue => self.stats.inc_requeued(),
            Disposition::Ack => {}
        }
        self.log_progress(count);
        disposition
    }
}
