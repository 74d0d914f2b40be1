//! Producer side: one full enumeration of the listing API, from partitioning
//! to publishing a normalized notice per unique record.

use crate::broker::publisher::ReliablePublisher;
use crate::broker::Connector;
use crate::config::MAX_AGE;
use crate::countries;
use crate::dedup::DedupIndex;
use crate::detail::DetailFetcher;
use crate::http::ApiClient;
use crate::listing::ListingClient;
use crate::partition::Partitioner;
use crate::shutdown::Shutdown;
use crate::stats::HarvestStats;
use std::time::Instant;
use tracing::{info, warn};

pub struct Harvester<C: Connector> {
    listing: ListingClient,
    details: DetailFetcher,
    publisher: ReliablePublisher<C>,
    nationalities: Vec<String>,
    max_age: u8,
}

impl<C: Connector> Harvester<C> {
    pub fn new(api: ApiClient, publisher: ReliablePublisher<C>) -> Self {
        Self {
            listing: ListingClient::new(api.clone()),
            details: DetailFetcher::new(api),
            publisher,
            nationalities: countries::nationality_codes(),
            max_age: MAX_AGE,
        }
    }

    pub fn with_nationalities(mut self, nationalities: Vec<String>) -> Self {
        self.nationalities = nationalities;
        self
    }

    pub fn with_max_age(mut self, max_age: u8) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn publisher(&mut self) -> &mut ReliablePublisher<C> {
        &mut self.publisher
    }

    /// Partition, walk every filter, deduplicate, then fetch and publish each
    /// unique record. Failures are isolated per filter and per record.
    /// Shutdown is honoured between units of work.
    pub async fn run_cycle(&mut self, shutdown: &Shutdown) -> HarvestStats {
        let stats = HarvestStats::new();
        let start = Instant::now();

        let partitioner = Partitioner::new(&self.listing, self.nationalities.clone())
            .with_max_age(self.max_age);
        let mut interrupt = shutdown.clone();
        let plan = tokio::select! {
            plan = partitioner.plan() => plan,
            _ = interrupt.wait() => {
                info!("Harvest interrupted while partitioning");
                return stats;
            }
        };

        let mut index = DedupIndex::new();
        for filter in &plan.filters {
            if shutdown.is_triggered() {
                info!("Harvest interrupted while walking filters");
                return stats;
            }
            let walk = self.listing.walk(filter).await;
            stats.inc_filters();
            stats.add_pages(walk.pages as u64);
            stats.add_stubs(walk.stubs.len() as u64);
            if let Some(e) = &walk.failure {
                stats.inc_walk_failures();
                warn!(filter = %filter, error = %e, kept = walk.stubs.len(), "Filter walk failed");
            }
            index.extend(walk.stubs);
        }

        stats.set_unique(index.unique_count() as u64);
        info!(
            raw = index.raw_count(),
            unique = index.unique_count(),
            unkeyed = index.unkeyed_count(),
            "Enumeration complete"
        );

        for (identity, _stub) in index.into_sorted() {
            if shutdown.is_triggered() {
                info!("Harvest interrupted while publishing");
                return stats;
            }
            let record = match self.details.fetch(&identity).await {
                Ok(record) => record,
                Err(e) => {
                    stats.inc_detail_failures();
                    warn!(entity_id = %identity, error = %e, "Detail fetch failed, skipping");
                    continue;
                }
            };
            stats.inc_details();

            match self.publisher.publish(&record).await {
                Ok(()) => stats.inc_published(),
                Err(e) => {
                    stats.inc_publish_failures();
                    warn!(entity_id = %record.entity_id, error = %e, "Publish failed, skipping");
                }
            }
        }

        info!(
            filters = stats.filters(),
            walk_failures = stats.walk_failed(),
            stubs = stats.stubs(),
            unique = stats.unique(),
            published = stats.publishes(),
            detail_failures = stats.detail_failed(),
            publish_failures = stats.publish_failed(),
            duration_secs = start.elapsed().as_secs_f64(),
            "Harvest cycle complete"
        );
        stats
    }
}
