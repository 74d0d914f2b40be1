//! Idempotent reconciliation of incoming notices against the record store.
//!
//! [`RecordUpserter`] looks a notice up by `entity_id`, inserts it when it is
//! new, and otherwise writes only the fields that differ. The diff is an
//! explicit field-by-field comparison over [`NoticeRecord`]; every field has
//! its own [`FieldChange`] variant.

use crate::models::{ArrestWarrant, NoticeRecord};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store query failed during {stage}: {message}")]
    Query { stage: &'static str, message: String },
    #[error("stored notice {entity_id} cannot be decoded: {source}")]
    Corrupt {
        entity_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A keyed, upsert-capable table of notices.
#[async_trait]
pub trait NoticeStore: Send + Sync {
    async fn find(&self, entity_id: &str) -> Result<Option<NoticeRecord>, StoreError>;
    async fn insert(&self, record: &NoticeRecord) -> Result<(), StoreError>;
    /// Writes `changes` to the stored notice in one write. `record` is the
    /// full new state the changes were taken from.
    async fn update(&self, record: &NoticeRecord, changes: &[FieldChange])
        -> Result<(), StoreError>;
}

/// New value for one field of a stored notice. `entity_id` never changes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldChange {
    Name(Option<String>),
    Forename(Option<String>),
    DateOfBirth(Option<String>),
    PlaceOfBirth(Option<String>),
    CountryOfBirthId(Option<String>),
    SexId(Option<String>),
    Nationalities(Option<Vec<String>>),
    EyesColorsId(Option<Vec<String>>),
    HairsId(Option<Vec<String>>),
    LanguagesSpokenIds(Option<Vec<String>>),
    Height(Option<f64>),
    Weight(Option<f64>),
    DistinguishingMarks(Option<String>),
    ArrestWarrants(Option<Vec<ArrestWarrant>>),
    ImgsLink(Option<String>),
    UploadTime(Option<String>),
}

impl FieldChange {
    /// Column / property name of the field.
    pub fn field(&self) -> &'static str {
        match self {
            FieldChange::Name(_) => "name",
            FieldChange::Forename(_) => "forename",
            FieldChange::DateOfBirth(_) => "date_of_birth",
            FieldChange::PlaceOfBirth(_) => "place_of_birth",
            FieldChange::CountryOfBirthId(_) => "country_of_birth_id",
            FieldChange::SexId(_) => "sex_id",
            FieldChange::Nationalities(_) => "nationalities",
            FieldChange::EyesColorsId(_) => "eyes_colors_id",
            FieldChange::HairsId(_) => "hairs_id",
            FieldChange::LanguagesSpokenIds(_) => "languages_spoken_ids",
            FieldChange::Height(_) => "height",
            FieldChange::Weight(_) => "weight",
            FieldChange::DistinguishingMarks(_) => "distinguishing_marks",
            FieldChange::ArrestWarrants(_) => "arrest_warrants",
            FieldChange::ImgsLink(_) => "imgs_link",
            FieldChange::UploadTime(_) => "upload_time",
        }
    }

    pub fn apply(&self, record: &mut NoticeRecord) {
        match self {
            FieldChange::Name(v) => record.name = v.clone(),
            FieldChange::Forename(v) => record.forename = v.clone(),
            FieldChange::DateOfBirth(v) => record.date_of_birth = v.clone(),
            FieldChange::PlaceOfBirth(v) => record.place_of_birth = v.clone(),
            FieldChange::CountryOfBirthId(v) => record.country_of_birth_id = v.clone(),
            FieldChange::SexId(v) => record.sex_id = v.clone(),
            FieldChange::Nationalities(v) => record.nationalities = v.clone(),
            FieldChange::EyesColorsId(v) => record.eyes_colors_id = v.clone(),
            FieldChange::HairsId(v) => record.hairs_id = v.clone(),
            FieldChange::LanguagesSpokenIds(v) => record.languages_spoken_ids = v.clone(),
            FieldChange::Height(v) => record.height = *v,
            FieldChange::Weight(v) => record.weight = *v,
            FieldChange::DistinguishingMarks(v) => record.distinguishing_marks = v.clone(),
            FieldChange::ArrestWarrants(v) => record.arrest_warrants = v.clone(),
            FieldChange::ImgsLink(v) => record.imgs_link = v.clone(),
            FieldChange::UploadTime(v) => record.upload_time = v.clone(),
        }
    }
}

/// Every populated field of a fresh notice.
pub fn populated_fields(record: &NoticeRecord) -> Vec<FieldChange> {
    diff(&NoticeRecord::new(record.entity_id.clone()), record)
}

/// Every field of `new` that differs from `old`, in declaration order.
pub fn diff(old: &NoticeRecord, new: &NoticeRecord) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.name != new.name {
        changes.push(FieldChange::Name(new.name.clone()));
    }
    if old.forename != new.forename {
        changes.push(FieldChange::Forename(new.forename.clone()));
    }
    if old.date_of_birth != new.date_of_birth {
        changes.push(FieldChange::DateOfBirth(new.date_of_birth.clone()));
    }
    if old.place_of_birth != new.place_of_birth {
        changes.push(FieldChange::PlaceOfBirth(new.place_of_birth.clone()));
    }
    if old.country_of_birth_id != new.country_of_birth_id {
        changes.push(FieldChange::CountryOfBirthId(new.country_of_birth_id.clone()));
    }
    if old.sex_id != new.sex_id {
        changes.push(FieldChange::SexId(new.sex_id.clone()));
    }
    if old.nationalities != new.nationalities {
        changes.push(FieldChange::Nationalities(new.nationalities.clone()));
    }
    if old.eyes_colors_id != new.eyes_colors_id {
        changes.push(FieldChange::EyesColorsId(new.eyes_colors_id.clone()));
    }
    if old.hairs_id != new.hairs_id {
        changes.push(FieldChange::HairsId(new.hairs_id.clone()));
    }
    if old.languages_spoken_ids != new.languages_spoken_ids {
        changes.push(FieldChange::LanguagesSpokenIds(new.languages_spoken_ids.clone()));
    }
    if old.height != new.height {
        changes.push(FieldChange::Height(new.height));
    }
    if old.weight != new.weight {
        changes.push(FieldChange::Weight(new.weight));
    }
    if old.distinguishing_marks != new.distinguishing_marks {
        changes.push(FieldChange::DistinguishingMarks(new.distinguishing_marks.clone()));
    }
    if old.arrest_warrants != new.arrest_warrants {
        changes.push(FieldChange::ArrestWarrants(new.arrest_warrants.clone()));
    }
    if old.imgs_link != new.imgs_link {
        changes.push(FieldChange::ImgsLink(new.imgs_link.clone()));
    }
    if old.upload_time != new.upload_time {
        changes.push(FieldChange::UploadTime(new.upload_time.clone()));
    }
    changes
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated { fields: Vec<&'static str> },
    Unchanged,
}

pub struct RecordUpserter<S: NoticeStore> {
    store: S,
}

impl<S: NoticeStore> RecordUpserter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn upsert(&self, record: &NoticeRecord) -> Result<UpsertOutcome, StoreError> {
        let Some(existing) = self.store.find(&record.entity_id).await? else {
            self.store.insert(record).await?;
            info!(entity_id = %record.entity_id, "Inserted notice");
            return Ok(UpsertOutcome::Inserted);
        };

        let changes = diff(&existing, record);
        if changes.is_empty() {
            debug!(entity_id = %record.entity_id, "Notice unchanged");
            return Ok(UpsertOutcome::Unchanged);
        }

        self.store.update(record, &changes).await?;
        let fields: Vec<&'static str> = changes.iter().map(FieldChange::field).collect();
        info!(entity_id = %record.entity_id, fields = ?fields, "Updated notice");
        Ok(UpsertOutcome::Updated { fields })
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    records: FxHashMap<String, NoticeRecord>,
    inserts: u64,
    updates: u64,
    faults: u32,
}

/// In-process record store. Cloning shares the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryNoticeStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryNoticeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` operations fail as if the store were down.
    pub fn fail_next(&self, n: u32) {
        self.lock().faults += n;
    }

    pub fn get(&self, entity_id: &str) -> Option<NoticeRecord> {
        self.lock().records.get(entity_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn inserts(&self) -> u64 {
        self.lock().inserts
    }

    pub fn updates(&self) -> u64 {
        self.lock().updates
    }

    fn check_fault(state: &mut MemoryState) -> Result<(), StoreError> {
        if state.faults > 0 {
            state.faults -= 1;
            return Err(StoreError::Unavailable("injected fault".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl NoticeStore for MemoryNoticeStore {
    async fn find(&self, entity_id: &str) -> Result<Option<NoticeRecord>, StoreError> {
        let mut state = self.lock();
        Self::check_fault(&mut state)?;
        Ok(state.records.get(entity_id).cloned())
    }

    async fn insert(&self, record: &NoticeRecord) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_fault(&mut state)?;
        state.inserts += 1;
        state
            .records
            .insert(record.entity_id.clone(), record.clone());
        Ok(())
    }

    async fn update(
        &self,
        record: &NoticeRecord,
        changes: &[FieldChange],
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_fault(&mut state)?;
        let stored = state
            .records
            .get_mut(&record.entity_id)
            .ok_or_else(|| StoreError::Query {
                stage: "update",
                message: format!("no notice {}", record.entity_id),
            })?;
        for change in changes {
            change.apply(stored);
        }
        state.updates += 1;
        Ok(())
    }
}
