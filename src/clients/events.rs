use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::DiaryRecord;

use super::{ensure_success, trim_base, ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiaryEventType {
    #[serde(rename = "DIARY_CREATED")]
    Created,
    #[serde(rename = "DIARY_UPDATED")]
    Updated,
    #[serde(rename = "DIARY_DELETED")]
    Deleted,
}

/// Lifecycle notification keyed by user id on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryEvent {
    pub event_type: DiaryEventType,
    pub diary_id: i64,
    pub user_id: i64,
    pub pet_id: i64,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DiaryEvent {
    pub fn from_record(event_type: DiaryEventType, record: &DiaryRecord) -> Self {
        let (content, image_url) = match event_type {
            DiaryEventType::Deleted => (None, None),
            _ => (
                record.diary.content.clone(),
                record.first_image_url().map(str::to_string),
            ),
        };
        Self {
            event_type,
            diary_id: record.diary.id,
            user_id: record.diary.user_id,
            pet_id: record.diary.pet_id,
            content,
            image_url,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        self.user_id.to_string()
    }

    pub fn created(record: &DiaryRecord) -> Value {
        Self::from_record(DiaryEventType::Created, record).to_payload()
    }

    pub fn updated(record: &DiaryRecord) -> Value {
        Self::from_record(DiaryEventType::Updated, record).to_payload()
    }

    pub fn deleted(record: &DiaryRecord) -> Value {
        Self::from_record(DiaryEventType::Deleted, record).to_payload()
    }

    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DiaryEvent) -> ClientResult<()>;
}

/// Produces to a Kafka topic through the Confluent REST proxy.
pub struct KafkaRestPublisher {
    client: Client,
    endpoint: String,
    topic: String,
}

impl KafkaRestPublisher {
    pub fn new(client: Client, endpoint: &str, topic: String) -> Self {
        Self {
            client,
            endpoint: trim_base(endpoint),
            topic,
        }
    }
}

#[async_trait]
impl EventPublisher for KafkaRestPublisher {
    async fn publish(&self, event: &DiaryEvent) -> ClientResult<()> {
        let body = json!({
            "records": [{ "key": event.key(), "value": event }],
        });
        let response = self
            .client
            .post(format!("{}/topics/{}", self.endpoint, self.topic))
            .header("content-type", "application/vnd.kafka.json.v2+json")
            .json(&body)
            .send()
            .await?;
        ensure_success("event bus", response).await?;
        Ok(())
    }
}
