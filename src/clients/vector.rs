use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::models::DiaryRecord;

use super::{ensure_success, trim_base, ClientError, ClientResult};

/// Text plus filterable metadata; `id` is the diary id so re-indexing overwrites.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    pub id: i64,
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl VectorDocument {
    pub fn for_diary(record: &DiaryRecord) -> Self {
        let diary = &record.diary;
        let mut metadata = Map::new();
        metadata.insert("diaryId".into(), json!(diary.id));
        metadata.insert("userId".into(), json!(diary.user_id));
        metadata.insert("petId".into(), json!(diary.pet_id));
        metadata.insert(
            "title".into(),
            json!(diary.title.clone().unwrap_or_default()),
        );
        metadata.insert("date".into(), json!(diary.diary_date.to_string()));
        metadata.insert("mood".into(), json!(diary.mood.clone().unwrap_or_default()));
        if let Some(weather) = &diary.weather {
            metadata.insert("weather".into(), json!(weather));
        }
        if let Some(location) = &diary.location_name {
            metadata.insert("location".into(), json!(location));
        }

        Self {
            id: diary.id,
            text: diary.content.clone().unwrap_or_default(),
            metadata,
        }
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, document: VectorDocument) -> ClientResult<()>;
}

/// Embeds with an OpenAI-compatible endpoint and upserts into Milvus over
/// its v2 REST API.
pub struct MilvusVectorIndex {
    client: Client,
    embeddings_url: String,
    embedding_model: String,
    openai_key: Option<String>,
    milvus_endpoint: String,
    milvus_token: Option<String>,
    collection: String,
}

impl MilvusVectorIndex {
    pub fn new(
        client: Client,
        openai_base_url: &str,
        embedding_model: String,
        openai_key: Option<String>,
        milvus_endpoint: &str,
        milvus_token: Option<String>,
        collection: String,
    ) -> Self {
        Self {
            client,
            embeddings_url: format!("{}/embeddings", trim_base(openai_base_url)),
            embedding_model,
            openai_key,
            milvus_endpoint: trim_base(milvus_endpoint),
            milvus_token,
            collection,
        }
    }

    async fn embed(&self, text: &str) -> ClientResult<Vec<f32>> {
        let mut request = self.client.post(&self.embeddings_url).json(&json!({
            "model": self.embedding_model,
            "input": text,
        }));
        if let Some(key) = &self.openai_key {
            request = request.bearer_auth(key);
        }
        let response = ensure_success("embeddings", request.send().await?).await?;
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| ClientError::payload("embeddings", err.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| ClientError::payload("embeddings", "no embedding returned"))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct MilvusReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl VectorIndex for MilvusVectorIndex {
    async fn upsert(&self, document: VectorDocument) -> ClientResult<()> {
        let vector = self.embed(&document.text).await?;
        let body = json!({
            "collectionName": self.collection,
            "data": [{
                "id": document.id,
                "vector": vector,
                "content": document.text,
                "metadata": Value::Object(document.metadata),
            }],
        });

        let mut request = self
            .client
            .post(format!("{}/v2/vectordb/entities/upsert", self.milvus_endpoint))
            .json(&body);
        if let Some(token) = &self.milvus_token {
            request = request.bearer_auth(token);
        }
        let response = ensure_success("milvus", request.send().await?).await?;
        let reply: MilvusReply = response
            .json()
            .await
            .map_err(|err| ClientError::payload("milvus", err.to_string()))?;
        if reply.code != 0 {
            return Err(ClientError::payload(
                "milvus",
                format!(
                    "code {}: {}",
                    reply.code,
                    reply.message.unwrap_or_default()
                ),
            ));
        }
        Ok(())
    }
}
