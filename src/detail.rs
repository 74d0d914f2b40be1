use crate::http::{ApiClient, ApiError};
use crate::models::{ArrestWarrant, NoticeRecord, RecordIdentity};
use serde::Deserialize;
use tracing::debug;

/// Format of `upload_time` on every normalized notice.
pub const CAPTURE_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

#[derive(Debug, Deserialize)]
pub struct DetailResponse {
    entity_id: Option<String>,
    name: Option<String>,
    forename: Option<String>,
    date_of_birth: Option<String>,
    place_of_birth: Option<String>,
    country_of_birth_id: Option<String>,
    sex_id: Option<String>,
    nationalities: Option<Vec<String>>,
    eyes_colors_id: Option<Vec<String>>,
    hairs_id: Option<Vec<String>>,
    languages_spoken_ids: Option<Vec<String>>,
    height: Option<f64>,
    weight: Option<f64>,
    distinguishing_marks: Option<String>,
    arrest_warrants: Option<Vec<ArrestWarrant>>,
    #[serde(rename = "_links")]
    links: Option<DetailLinks>,
}

#[derive(Debug, Deserialize)]
struct DetailLinks {
    images: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

impl DetailResponse {
    /// Maps the API's detail object onto the queue/store schema.
    pub fn normalize(self, fallback_id: &str, captured_at: String) -> NoticeRecord {
        NoticeRecord {
            entity_id: self.entity_id.unwrap_or_else(|| fallback_id.to_string()),
            name: self.name,
            forename: self.forename,
            date_of_birth: self.date_of_birth,
            place_of_birth: self.place_of_birth,
            country_of_birth_id: self.country_of_birth_id,
            sex_id: self.sex_id,
            nationalities: self.nationalities,
            eyes_colors_id: self.eyes_colors_id,
            hairs_id: self.hairs_id,
            languages_spoken_ids: self.languages_spoken_ids,
            height: self.height,
            weight: self.weight,
            distinguishing_marks: self.distinguishing_marks,
            arrest_warrants: self.arrest_warrants,
            imgs_link: self.links.and_then(|l| l.images).map(|i| i.href),
            upload_time: Some(captured_at),
        }
    }
}

pub fn capture_time() -> String {
    chrono::Local::now().format(CAPTURE_TIME_FORMAT).to_string()
}

/// Expands a discovered identity into the full notice.
#[derive(Clone)]
pub struct DetailFetcher {
    api: ApiClient,
}

impl DetailFetcher {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn fetch(&self, identity: &RecordIdentity) -> Result<NoticeRecord, ApiError> {
        let url = match identity {
            RecordIdentity::Entity(id) => self.api.detail_url(id)?,
            RecordIdentity::SelfLink(href) => ApiClient::parse_url(href)?,
        };
        let detail: DetailResponse = self.api.get_json(url, "detail").await?;
        let record = detail.normalize(identity.as_str(), capture_time());
        debug!(entity_id = %record.entity_id, "Detail fetched");
        Ok(record)
    }
}
