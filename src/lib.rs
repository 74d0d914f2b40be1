//! Dragnet: exhaustive harvesting of a capped search API into a durable queue
//! and an idempotent record store
//!
//! The listing endpoint never pages past a fixed number of matches per query,
//! so a naive walk silently loses whatever lies beyond the cap. Dragnet splits
//! the query space until every query fits, and moves what it finds through a
//! message queue into storage:
//!
//! 1. **Partition** -- Probe each nationality's match count; sweep heavy ones by
//!    exact age and sex, and fan still-heavy cells out by name prefix
//! 2. **Walk** -- Follow each filter's next-page links and collect record stubs
//! 3. **Deduplicate** -- Collapse stubs found through overlapping filters by identity
//! 4. **Publish** -- Fetch each unique record's detail and publish it as one
//!    persistent queue message
//! 5. **Organize** -- Consume the queue, upsert each notice field by field and
//!    mirror its images to the blob store
//!
//! Steps 1-4 form the `harvest` role, re-run on a fixed schedule; step 5 is the
//! `organize` role. Both survive broker restarts: the publisher reconnects and
//! resends in-line, the consumer requeues failed messages and re-subscribes.
//!
//! # Key Modules
//!
//! - [`partition`] -- Query-space partitioning against the result cap
//! - [`listing`] -- Count probes and paginated walks over the listing endpoint
//! - [`dedup`] -- Identity-keyed, last-seen-wins stub index
//! - [`detail`] -- Detail fetch and normalization into [`models::NoticeRecord`]
//! - [`harvest`] -- One producer cycle, end to end
//! - [`broker`] -- Connection manager, reliable publisher and consumer (AMQP and in-memory)
//! - [`store`] -- Field-by-field upserts against a [`store::NoticeStore`]
//! - [`graph_store`] -- Neo4j implementation of the record store
//! - [`images`] -- Image index resolution and mirroring
//! - [`blob`] -- Blob store trait with filesystem and in-memory buckets
//! - [`organizer`] -- Per-message processing and ack/nack policy
//! - [`http`] -- Rate-limited HTTP client and typed API errors
//! - [`schedule`] / [`shutdown`] -- Fixed-interval re-runs and cooperative Ctrl-C handling
//! - [`stats`] -- Lock-free counters for both roles
//! - [`config`] -- Constants for the API, broker and stores

pub mod blob;
pub mod broker;
pub mod config;
pub mod countries;
pub mod dedup;
pub mod detail;
pub mod graph_store;
pub mod harvest;
pub mod http;
pub mod images;
pub mod listing;
pub mod models;
pub mod organizer;
pub mod partition;
pub mod schedule;
pub mod shutdown;
pub mod stats;
pub mod store;
