use crate::blob::BlobStore;
use crate::http::{ApiClient, ApiError};
use crate::models::NoticeRecord;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const IMAGE_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Default, Deserialize)]
struct ImageIndex {
    #[serde(default, rename = "_embedded")]
    embedded: Option<ImageEmbedded>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageEmbedded {
    #[serde(default)]
    images: Vec<ImageEntry>,
}

#[derive(Debug, Deserialize)]
struct ImageEntry {
    #[serde(default, rename = "_links")]
    links: Option<ImageLinks>,
}

#[derive(Debug, Deserialize)]
struct ImageLinks {
    #[serde(rename = "self")]
    self_link: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

impl ImageIndex {
    fn hrefs(self) -> Vec<String> {
        self.embedded
            .map(|e| e.images)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|image| image.links?.self_link.map(|l| l.href))
            .collect()
    }
}

/// The image index could not be read for a reason that may go away.
#[derive(Debug, Error)]
#[error("image index for {entity_id} unavailable: {source}")]
pub struct ImageIndexError {
    pub entity_id: String,
    #[source]
    pub source: ApiError,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageReport {
    pub found: usize,
    pub stored: usize,
    pub failed: usize,
}

pub fn image_key(entity_id: &str, n: usize) -> String {
    format!("{}/image_{n}.png", key_prefix(entity_id))
}

/// Blob prefix for an identity. Regular ids (`2020/12345`) are used as-is;
/// a self-link identity is reduced to the last segment of its path.
fn key_prefix(entity_id: &str) -> String {
    if let Ok(url) = reqwest::Url::parse(entity_id) {
        if let Some(last) = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        {
            return last.to_string();
        }
    }
    let segments: Vec<&str> = entity_id
        .split(['/', '\\', '\0'])
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();
    if segments.is_empty() {
        "_".to_string()
    } else {
        segments.join("/")
    }
}

/// Copies every image of a notice into the blob store.
pub struct ImageMirror<B: BlobStore> {
    api: ApiClient,
    blobs: B,
}

impl<B: BlobStore> ImageMirror<B> {
    pub fn new(api: ApiClient, blobs: B) -> Self {
        Self { api, blobs }
    }

    /// Resolves the notice's image index and stores each image as
    /// `{entity_id}/image_{n}.png`, n from 1. A failing image is logged and
    /// skipped. Only a transient index failure is returned as an error.
    pub async fn mirror(&self, record: &NoticeRecord) -> Result<ImageReport, ImageIndexError> {
        let Some(link) = record.imgs_link.as_deref() else {
            return Ok(ImageReport::default());
        };

        let hrefs = match self.fetch_index(link).await {
            Ok(hrefs) => hrefs,
            Err(e) if e.is_transient() => {
                return Err(ImageIndexError {
                    entity_id: record.entity_id.clone(),
                    source: e,
                });
            }
            Err(e) => {
                warn!(entity_id = %record.entity_id, error = %e, "Skipping unusable image index");
                return Ok(ImageReport::default());
            }
        };

        let mut report = ImageReport {
            found: hrefs.len(),
            ..ImageReport::default()
        };
        for (i, href) in hrefs.iter().enumerate() {
            let key = image_key(&record.entity_id, i + 1);
            match self.copy_image(href, &key).await {
                Ok(()) => report.stored += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(entity_id = %record.entity_id, key = %key, error = %e, "Image not mirrored");
                }
            }
        }
        debug!(
            entity_id = %record.entity_id,
            found = report.found,
            stored = report.stored,
            "Images mirrored"
        );
        Ok(report)
    }

    async fn fetch_index(&self, link: &str) -> Result<Vec<String>, ApiError> {
        let url = ApiClient::parse_url(link)?;
        let index: ImageIndex = self.api.get_json(url, "image index").await?;
        Ok(index.hrefs())
    }

    async fn copy_image(&self, href: &str, key: &str) -> anyhow::Result<()> {
        let url = ApiClient::parse_url(href)?;
        let data = self.api.get_bytes(url, "image").await?;
        self.blobs.put(key, data, IMAGE_CONTENT_TYPE).await?;
        Ok(())
    }
}
