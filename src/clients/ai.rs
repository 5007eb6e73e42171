use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::HighlightDraft;

use super::{ensure_success, trim_base, ClientError};

const DIARY_INSTRUCTION: &str = "당신은 반려동물의 시점에서 하루를 기록하는 일기 작가입니다. \
사진 속 반려동물의 표정, 행동, 장소를 관찰하고 따뜻하고 생동감 있는 1인칭 일기를 작성하세요.\n\n\
1. 사진의 상황을 파악하여 감성적이고 잘 어울리는 일기 제목(title)을 생성하세요.\n\
2. 사진들을 분석하여 일기 내용(content)을 작성하세요.\n\
3. 반려동물의 기분(mood)을 한 단어로 표현하세요.\n\
4. 사진으로 짐작되는 날씨(weather)와 장소(locationName)가 있다면 함께 적어주세요.";

const DIARY_FORMAT: &str = "분석하여 JSON 형식으로 응답하세요.\n\
다음 키만 포함한 JSON 객체 하나로 응답하고 다른 설명은 덧붙이지 마세요:\n\
{\"title\": string, \"content\": string, \"mood\": string, \"weather\": string, \"locationName\": string | null}";

const RECAP_FORMAT: &str = "다음 키만 포함한 JSON 객체 하나로 응답하세요:\n\
{\"title\": string, \"summary\": string, \"highlights\": [{\"title\": string, \"content\": string}]}";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("model reply is not valid JSON: {0}")]
    Malformed(String),
    #[error("model returned an empty reply")]
    Empty,
}

/// An image handed to the model, either already hosted or inline bytes.
#[derive(Debug, Clone)]
pub enum ImageRef {
    Url(String),
    Inline { bytes: Bytes, content_type: String },
}

impl ImageRef {
    pub fn as_model_url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Inline {
                bytes,
                content_type,
            } => format!("data:{content_type};base64,{}", STANDARD.encode(bytes)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiaryDraft {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub weather: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecapPrompt {
    pub pet_name: String,
    pub year: i32,
    pub month: u32,
    pub entries: Vec<String>,
}

impl RecapPrompt {
    pub fn render(&self) -> String {
        format!(
            "반려동물 {name}의 {year}년 {month}월 일기 기록들입니다:\n{diaries}\n\n\
위 기록들을 바탕으로 이번 달의 '월간 리캡'을 작성해주세요.\n\n\
[작성 지침]\n\
1. 제목(title): 반드시 {year}년 {month}월이라는 구체적인 숫자를 포함하여 지어주세요.\n\
2. 요약(summary): 전체적인 일기 내용을 분석하여 보호자에게 보내는 편지 형식으로 따뜻하게 작성해주세요.\n\
3. 하이라이트(highlights): 가장 인상 깊은 사건 3가지를 선정해 제목과 요약을 작성해주세요.\n\n\
{format}",
            name = self.pet_name,
            year = self.year,
            month = self.month,
            diaries = self.entries.join("\n---\n"),
            format = RECAP_FORMAT,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecapDigest {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<HighlightDraft>,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn draft_diary(&self, images: &[ImageRef]) -> Result<DiaryDraft, GenerationError>;

    async fn summarize_month(&self, prompt: &RecapPrompt) -> Result<RecapDigest, GenerationError>;
}

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>, model: String) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
            api_key,
            model,
        }
    }

    async fn complete(&self, messages: Value) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "response_format": { "type": "json_object" },
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(ClientError::from)?;
        let response = ensure_success("openai", response).await?;
        let reply: ChatCompletion = response.json().await.map_err(ClientError::from)?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(GenerationError::Empty)?;
        debug!(model = %self.model, chars = content.len(), "received model reply");
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn draft_diary(&self, images: &[ImageRef]) -> Result<DiaryDraft, GenerationError> {
        let mut parts = vec![json!({ "type": "text", "text": DIARY_FORMAT })];
        parts.extend(images.iter().map(|image| {
            json!({ "type": "image_url", "image_url": { "url": image.as_model_url() } })
        }));

        let messages = json!([
            { "role": "system", "content": DIARY_INSTRUCTION },
            { "role": "user", "content": parts },
        ]);
        let reply = self.complete(messages).await?;
        parse_reply(&reply)
    }

    async fn summarize_month(&self, prompt: &RecapPrompt) -> Result<RecapDigest, GenerationError> {
        let messages = json!([{ "role": "user", "content": prompt.render() }]);
        let reply = self.complete(messages).await?;
        parse_reply(&reply)
    }
}

/// Parses a JSON object out of a model reply, tolerating markdown fences or
/// prose around it.
pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> Result<T, GenerationError> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(GenerationError::Empty);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    let candidate = match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    serde_json::from_str(candidate).map_err(|err| GenerationError::Malformed(err.to_string()))
}
