use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::Deserialize;

use super::{ensure_success, trim_base, ClientError, ClientResult};

/// A raw file received from the client, not yet archived.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl ImageUpload {
    pub fn content_type(&self) -> String {
        self.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.file_name)
                .first_or_octet_stream()
                .to_string()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedImage {
    pub archive_id: i64,
    pub url: String,
}

#[async_trait]
pub trait ArchiveClient: Send + Sync {
    async fn upload(&self, user_id: i64, files: Vec<ImageUpload>)
        -> ClientResult<Vec<ArchivedImage>>;
}

pub struct HttpArchiveClient {
    client: Client,
    base_url: String,
}

impl HttpArchiveClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    #[serde(default)]
    archives: Vec<ArchiveEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveEntry {
    archive_id: i64,
    url: String,
}

#[async_trait]
impl ArchiveClient for HttpArchiveClient {
    async fn upload(
        &self,
        user_id: i64,
        files: Vec<ImageUpload>,
    ) -> ClientResult<Vec<ArchivedImage>> {
        let mut form = Form::new();
        for file in files {
            let content_type = file.content_type();
            let part = Part::bytes(file.bytes.to_vec())
                .file_name(file.file_name)
                .mime_str(&content_type)?;
            form = form.part("images", part);
        }

        let response = self
            .client
            .post(format!("{}/api/archives", self.base_url))
            .header("X-USER-ID", user_id.to_string())
            .multipart(form)
            .send()
            .await?;
        let response = ensure_success("archive", response).await?;
        let body: ArchiveResponse = response
            .json()
            .await
            .map_err(|err| ClientError::payload("archive", err.to_string()))?;

        Ok(body
            .archives
            .into_iter()
            .map(|entry| ArchivedImage {
                archive_id: entry.archive_id,
                url: entry.url,
            })
            .collect())
    }
}
