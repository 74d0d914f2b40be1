//! Neo4j-backed record store: one `Notice` node per entity, unique on
//! `entity_id`. Each node also carries the whole notice as JSON in `record`,
//! which is what `find` reads back.

use crate::config;
use crate::models::{ArrestWarrant, NoticeRecord};
use crate::store::{populated_fields, FieldChange, NoticeStore, StoreError};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use neo4rs::{query, BoltType, Graph, Query};
use std::time::Duration;
use tracing::info;

const SCHEMA: &str = "CREATE CONSTRAINT notice_entity_id IF NOT EXISTS \
                      FOR (n:Notice) REQUIRE n.entity_id IS UNIQUE";

pub struct GraphNoticeStore {
    graph: Graph,
}

impl GraphNoticeStore {
    /// Connects, then makes sure the uniqueness constraint exists. Both steps
    /// retry; running out of attempts is fatal.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = connect_with_retry(uri, user, password).await?;
        let store = Self { graph };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        let max_retries = config::STORE_INIT_RETRIES;
        let delay = Duration::from_secs(config::STORE_INIT_DELAY_SECS);

        for attempt in 1..=max_retries {
            match run_cypher(&self.graph, SCHEMA).await {
                Ok(()) => {
                    info!("Notice schema ready");
                    return Ok(());
                }
                Err(e) if attempt < max_retries => {
                    info!(attempt, "Schema creation failed, retrying: {e:#}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e).context(format!(
                        "Cannot create the Notice schema after {max_retries} attempts"
                    ));
                }
            }
        }
        bail!("Cannot create the Notice schema after {max_retries} attempts");
    }

    /// Number of stored notices.
    pub async fn count(&self) -> Result<i64> {
        query_count(&self.graph, "MATCH (n:Notice) RETURN count(n) AS cnt").await
    }
}

async fn connect_with_retry(uri: &str, user: &str, password: &str) -> Result<Graph> {
    let max_retries = config::STORE_INIT_RETRIES;
    let delay = Duration::from_secs(config::STORE_INIT_DELAY_SECS);

    for attempt in 1..=max_retries {
        match Graph::new(uri, user, password) {
            Ok(graph) => match graph.run(query("RETURN 1;")).await {
                Ok(_) => return Ok(graph),
                Err(e) if attempt < max_retries => {
                    info!(attempt, "Connection test failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e).context(format!(
                        "Cannot connect to Neo4j at {uri} after {max_retries} attempts"
                    ));
                }
            },
            Err(e) if attempt < max_retries => {
                info!(attempt, error = %e, "Cannot connect to Neo4j at {uri}, retrying...");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).context(format!(
                    "Cannot connect to Neo4j at {uri} after {max_retries} attempts"
                ));
            }
        }
    }

    bail!("Cannot connect to Neo4j at {uri} after {max_retries} attempts");
}

async fn run_cypher(graph: &Graph, cypher: &str) -> Result<()> {
    graph
        .run(query(cypher))
        .await
        .with_context(|| format!("Failed to execute: {cypher}"))?;
    Ok(())
}

async fn query_count(graph: &Graph, cypher: &str) -> Result<i64> {
    let mut result = graph
        .execute(query(cypher))
        .await
        .with_context(|| format!("Failed to execute count query: {cypher}"))?;

    if let Some(row) = result.next().await? {
        let count: i64 = row.get("cnt").context("Missing 'cnt' field in result")?;
        Ok(count)
    } else {
        Ok(0)
    }
}

fn query_error(stage: &'static str, err: neo4rs::Error) -> StoreError {
    StoreError::Query {
        stage,
        message: err.to_string(),
    }
}

/// `SET` clause for `changes`, one `$p{i}` parameter per field, plus the
/// JSON snapshot and the ingestion timestamp.
fn set_clause(changes: &[FieldChange]) -> String {
    let mut clause = String::from("SET ");
    for (i, change) in changes.iter().enumerate() {
        clause.push_str(&format!("n.{} = $p{i}, ", change.field()));
    }
    clause.push_str("n.record = $record, n.ingested_at = datetime()");
    clause
}

/// Warrants are nested maps, which Neo4j cannot hold as a property; they are
/// stored as a JSON string.
fn warrants_json(warrants: &Option<Vec<ArrestWarrant>>) -> Result<Option<String>, StoreError> {
    warrants
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::Query {
            stage: "encode warrants",
            message: e.to_string(),
        })
}

fn property_value(change: &FieldChange) -> Result<BoltType, StoreError> {
    let value = match change {
        FieldChange::Name(v)
        | FieldChange::Forename(v)
        | FieldChange::DateOfBirth(v)
        | FieldChange::PlaceOfBirth(v)
        | FieldChange::CountryOfBirthId(v)
        | FieldChange::SexId(v)
        | FieldChange::DistinguishingMarks(v)
        | FieldChange::ImgsLink(v)
        | FieldChange::UploadTime(v) => v.clone().into(),
        FieldChange::Nationalities(v)
        | FieldChange::EyesColorsId(v)
        | FieldChange::HairsId(v)
        | FieldChange::LanguagesSpokenIds(v) => v.clone().into(),
        FieldChange::Height(v) | FieldChange::Weight(v) => (*v).into(),
        FieldChange::ArrestWarrants(v) => warrants_json(v)?.into(),
    };
    Ok(value)
}

fn write_query(
    head: &str,
    record: &NoticeRecord,
    changes: &[FieldChange],
) -> Result<Query, StoreError> {
    let snapshot = serde_json::to_string(record).map_err(|e| StoreError::Query {
        stage: "encode notice",
        message: e.to_string(),
    })?;

    let mut q = query(&format!("{head} {}", set_clause(changes)))
        .param("entity_id", record.entity_id.clone())
        .param("record", snapshot);
    for (i, change) in changes.iter().enumerate() {
        q = q.param(&format!("p{i}"), property_value(change)?);
    }
    Ok(q)
}

#[async_trait]
impl NoticeStore for GraphNoticeStore {
    async fn find(&self, entity_id: &str) -> Result<Option<NoticeRecord>, StoreError> {
        let q = query("MATCH (n:Notice {entity_id: $entity_id}) RETURN n.record AS record")
            .param("entity_id", entity_id.to_string());
        let mut rows = self
            .graph
            .execute(q)
            .await
            .map_err(|e| query_error("find", e))?;

        let Some(row) = rows.next().await.map_err(|e| query_error("find", e))? else {
            return Ok(None);
        };
        let snapshot: String = row.get("record").map_err(|e| StoreError::Query {
            stage: "find",
            message: e.to_string(),
        })?;
        serde_json::from_str(&snapshot)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                entity_id: entity_id.to_string(),
                source,
            })
    }

    async fn insert(&self, record: &NoticeRecord) -> Result<(), StoreError> {
        // MERGE so a redelivered first sighting converges instead of tripping the constraint.
        let q = write_query(
            "MERGE (n:Notice {entity_id: $entity_id})",
            record,
            &populated_fields(record),
        )?;
        self.graph
            .run(q)
            .await
            .map(|_| ())
            .map_err(|e| query_error("insert", e))
    }

    async fn update(
        &self,
        record: &NoticeRecord,
        changes: &[FieldChange],
    ) -> Result<(), StoreError> {
        let q = write_query("MATCH (n:Notice {entity_id: $entity_id})", record, changes)?;
        self.graph
            .run(q)
            .await
            .map(|_| ())
            .map_err(|e| query_error("update", e))
    }
}
