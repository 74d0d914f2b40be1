use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl Sex {
    /// Sweep order used by the partitioner.
    pub const ALL: [Sex; 3] = [Sex::Male, Sex::Female, Sex::Unknown];

    pub fn code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Unknown => "U",
        }
    }
}

/// Free-text fields the listing endpoint can filter by leading character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextFacet {
    Name,
    Forename,
    FreeText,
}

impl TextFacet {
    pub const ALL: [TextFacet; 3] = [TextFacet::Forename, TextFacet::Name, TextFacet::FreeText];

    pub fn param(self) -> &'static str {
        match self {
            TextFacet::Name => "name",
            TextFacet::Forename => "forename",
            TextFacet::FreeText => "freeText",
        }
    }
}

/// A single-character lexical prefix, or the sentinel for "field absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Prefix {
    Letter(char),
    Absent,
}

impl Prefix {
    /// a..=z followed by the absent sentinel.
    pub fn all() -> impl Iterator<Item = Prefix> {
        ('a'..='z').map(Prefix::Letter).chain(std::iter::once(Prefix::Absent))
    }

    pub fn value(self) -> String {
        match self {
            Prefix::Letter(c) => c.to_string(),
            Prefix::Absent => "null".to_string(),
        }
    }
}

/// One point in the listing endpoint's query space.
///
/// Every facet is optional; an empty filter is the unfiltered query. Age is
/// always an exact year (`ageMin == ageMax`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FacetFilter {
    pub nationality: Option<String>,
    pub age: Option<u8>,
    pub sex: Option<Sex>,
    pub text: Option<(TextFacet, Prefix)>,
}

impl FacetFilter {
    pub fn unfiltered() -> Self {
        Self::default()
    }

    pub fn nationality(code: &str) -> Self {
        Self {
            nationality: Some(code.to_string()),
            ..Self::default()
        }
    }

    pub fn with_age(mut self, age: u8) -> Self {
        self.age = Some(age);
        self
    }

    pub fn with_sex(mut self, sex: Sex) -> Self {
        self.sex = Some(sex);
        self
    }

    pub fn with_prefix(mut self, facet: TextFacet, prefix: Prefix) -> Self {
        self.text = Some((facet, prefix));
        self
    }

    /// Query parameters in the order the endpoint documents them.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(5);
        if let Some(ref code) = self.nationality {
            pairs.push(("nationality", code.clone()));
        }
        if let Some(age) = self.age {
            pairs.push(("ageMin", age.to_string()));
            pairs.push(("ageMax", age.to_string()));
        }
        if let Some(sex) = self.sex {
            pairs.push(("sexId", sex.code().to_string()));
        }
        if let Some((facet, prefix)) = self.text {
            pairs.push((facet.param(), prefix.value()));
        }
        pairs
    }

    fn constraint_count(&self) -> usize {
        self.nationality.is_some() as usize
            + self.age.is_some() as usize
            + self.sex.is_some() as usize
            + self.text.is_some() as usize
    }

    /// True when `self` keeps every constraint of `other` and adds at least one.
    pub fn is_narrowing_of(&self, other: &FacetFilter) -> bool {
        fn keeps<T: PartialEq>(mine: &Option<T>, theirs: &Option<T>) -> bool {
            theirs.is_none() || mine == theirs
        }

        keeps(&self.nationality, &other.nationality)
            && keeps(&self.age, &other.age)
            && keeps(&self.sex, &other.sex)
            && keeps(&self.text, &other.text)
            && self.constraint_count() > other.constraint_count()
    }
}

impl fmt::Display for FacetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self.query_pairs();
        if pairs.is_empty() {
            return f.write_str("{}");
        }
        let body = pairs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{{{body}}}")
    }
}

/// Key that tells two discovered notices apart across enumeration passes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordIdentity {
    /// The stub carried an `entity_id`.
    Entity(String),
    /// No `entity_id`; keyed by the stub's self link instead.
    SelfLink(String),
}

impl RecordIdentity {
    pub fn as_str(&self) -> &str {
        match self {
            RecordIdentity::Entity(id) | RecordIdentity::SelfLink(id) => id,
        }
    }
}

impl fmt::Display for RecordIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrestWarrant {
    #[serde(default)]
    pub issuing_country_id: Option<String>,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub charge_translation: Option<String>,
}

/// Normalized notice as it travels through the queue and lands in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeRecord {
    pub entity_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub forename: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub place_of_birth: Option<String>,
    #[serde(default)]
    pub country_of_birth_id: Option<String>,
    #[serde(default)]
    pub sex_id: Option<String>,
    #[serde(default)]
    pub nationalities: Option<Vec<String>>,
    #[serde(default)]
    pub eyes_colors_id: Option<Vec<String>>,
    #[serde(default)]
    pub hairs_id: Option<Vec<String>>,
    #[serde(default)]
    pub languages_spoken_ids: Option<Vec<String>>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub distinguishing_marks: Option<String>,
    #[serde(default)]
    pub arrest_warrants: Option<Vec<ArrestWarrant>>,
    #[serde(default)]
    pub imgs_link: Option<String>,
    #[serde(default)]
    pub upload_time: Option<String>,
}

impl NoticeRecord {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: None,
            forename: None,
            date_of_birth: None,
            place_of_birth: None,
            country_of_birth_id: None,
            sex_id: None,
            nationalities: None,
            eyes_colors_id: None,
            hairs_id: None,
            languages_spoken_ids: None,
            height: None,
            weight: None,
            distinguishing_marks: None,
            arrest_warrants: None,
            imgs_link: None,
            upload_time: None,
        }
    }
}
