use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one harvest cycle
#[derive(Default)]
pub struct HarvestStats {
    pub filters_walked: AtomicU64,
    pub walk_failures: AtomicU64,
    pub pages_fetched: AtomicU64,
    pub stubs_seen: AtomicU64,
    pub unique_records: AtomicU64,
    pub details_fetched: AtomicU64,
    pub detail_failures: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
}

impl HarvestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_filters(&self) {
        self.filters_walked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_walk_failures(&self) {
        self.walk_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_pages(&self, count: u64) {
        self.pages_fetched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_stubs(&self, count: u64) {
        self.stubs_seen.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_unique(&self, count: u64) {
        self.unique_records.store(count, Ordering::Relaxed);
    }

    pub fn inc_details(&self) {
        self.details_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_detail_failures(&self) {
        self.detail_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish_failures(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn filters(&self) -> u64 {
        self.filters_walked.load(Ordering::Relaxed)
    }

    pub fn walk_failed(&self) -> u64 {
        self.walk_failures.load(Ordering::Relaxed)
    }

    pub fn pages(&self) -> u64 {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    pub fn stubs(&self) -> u64 {
        self.stubs_seen.load(Ordering::Relaxed)
    }

    pub fn unique(&self) -> u64 {
        self.unique_records.load(Ordering::Relaxed)
    }

    pub fn details(&self) -> u64 {
        self.details_fetched.load(Ordering::Relaxed)
    }

    pub fn detail_failed(&self) -> u64 {
        self.detail_failures.load(Ordering::Relaxed)
    }

    pub fn publishes(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn publish_failed(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }
}

/// Counters for the organizer, kept for the life of the process
#[derive(Default)]
pub struct OrganizeStats {
    pub messages: AtomicU64,
    pub inserted: AtomicU64,
    pub updated: AtomicU64,
    pub unchanged: AtomicU64,
    pub discarded: AtomicU64,
    pub requeued: AtomicU64,
    pub images_stored: AtomicU64,
    pub images_failed: AtomicU64,
}

impl OrganizeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the message count after this one.
    pub fn inc_messages(&self) -> u64 {
        self.messages.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_updated(&self) {
        self.updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unchanged(&self) {
        self.unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_images(&self, stored: u64, failed: u64) {
        self.images_stored.fetch_add(stored, Ordering::Relaxed);
        self.images_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn message_count(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn inserts(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn updates(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }

    pub fn unchanged_count(&self) -> u64 {
        self.unchanged.load(Ordering::Relaxed)
    }

    pub fn discards(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn requeues(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn images(&self) -> u64 {
        self.images_stored.load(Ordering::Relaxed)
    }

    pub fn image_failures(&self) -> u64 {
        self.images_failed.load(Ordering::Relaxed)
    }
}
