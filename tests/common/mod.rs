use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::NaiveDate;
use http_body_util::BodyExt;
use petlog::clients::ai::{
    ContentGenerator, DiaryDraft, GenerationError, ImageRef, RecapDigest, RecapPrompt,
};
use petlog::clients::archive::{ArchiveClient, ArchivedImage, ImageUpload};
use petlog::clients::events::{DiaryEvent, EventPublisher};
use petlog::clients::geocoding::Geocoder;
use petlog::clients::pets::{PetDirectory, PetProfile};
use petlog::clients::vector::{VectorDocument, VectorIndex};
use petlog::clients::weather::{GridCell, WeatherProvider};
use petlog::clients::{ClientError, ClientResult};
use petlog::config::AppConfig;
use petlog::models::HighlightDraft;
use petlog::routes;
use petlog::state::{AppState, Collaborators, Stores};
use petlog::store::{DiaryStore, MemoryStore};
use petlog::Worker;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tower::util::ServiceExt;

pub const FORECAST_WEATHER: &str = "구름많음";
pub const OBSERVED_WEATHER: &str = "비";
pub const GEOCODED_PLACE: &str = "서울특별시 중구 명동";

#[derive(Default)]
pub struct FakeArchive {
    next_id: AtomicI64,
    uploads: Mutex<Vec<(i64, String)>>,
}

#[async_trait]
impl ArchiveClient for FakeArchive {
    async fn upload(
        &self,
        user_id: i64,
        files: Vec<ImageUpload>,
    ) -> ClientResult<Vec<ArchivedImage>> {
        let mut uploads = self.uploads.lock().await;
        Ok(files
            .into_iter()
            .map(|file| {
                let archive_id = 1000 + self.next_id.fetch_add(1, Ordering::SeqCst);
                uploads.push((user_id, file.file_name.clone()));
                ArchivedImage {
                    archive_id,
                    url: format!("https://archive.test/{user_id}/{}", file.file_name),
                }
            })
            .collect())
    }
}

impl FakeArchive {
    #[allow(dead_code)]
    pub async fn upload_count(&self) -> usize {
        self.uploads.lock().await.len()
    }
}

#[derive(Default)]
pub struct FakeGenerator {
    pub fail: AtomicBool,
    failing_pets: Mutex<HashSet<String>>,
    drafted_with: Mutex<Vec<Vec<String>>>,
    prompts: Mutex<Vec<RecapPrompt>>,
}

#[async_trait]
impl ContentGenerator for FakeGenerator {
    async fn draft_diary(&self, images: &[ImageRef]) -> Result<DiaryDraft, GenerationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenerationError::Malformed("model offline".into()));
        }
        self.drafted_with
            .lock()
            .await
            .push(images.iter().map(ImageRef::as_model_url).collect());
        Ok(DiaryDraft {
            title: Some("햇살 좋은 산책".into()),
            content: "오늘은 공원에서 신나게 뛰어놀았다.".into(),
            mood: Some("행복".into()),
            weather: Some("맑음".into()),
            location_name: None,
        })
    }

    async fn summarize_month(&self, prompt: &RecapPrompt) -> Result<RecapDigest, GenerationError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(GenerationError::Malformed("model offline".into()));
        }
        if self.failing_pets.lock().await.contains(&prompt.pet_name) {
            return Err(GenerationError::Malformed(format!("no recap for {}", prompt.pet_name)));
        }
        self.prompts.lock().await.push(prompt.clone());
        Ok(RecapDigest {
            title: format!("{}년 {}월의 소중한 기록", prompt.year, prompt.month),
            summary: format!("{}의 한 달", prompt.pet_name),
            highlights: vec![
                HighlightDraft {
                    title: "첫 바다".into(),
                    content: "파도를 처음 봤다".into(),
                },
                HighlightDraft {
                    title: "새 친구".into(),
                    content: "옆집 강아지와 친해졌다".into(),
                },
            ],
        })
    }
}

impl FakeGenerator {
    #[allow(dead_code)]
    pub async fn drafts(&self) -> Vec<Vec<String>> {
        self.drafted_with.lock().await.clone()
    }

    #[allow(dead_code)]
    pub async fn prompts(&self) -> Vec<RecapPrompt> {
        self.prompts.lock().await.clone()
    }

    /// Recap generation fails for prompts addressed to `pet_name`.
    #[allow(dead_code)]
    pub async fn fail_for(&self, pet_name: &str) {
        self.failing_pets.lock().await.insert(pet_name.to_owned());
    }
}

#[derive(Default)]
pub struct FakeWeather {
    pub fail: AtomicBool,
}

#[async_trait]
impl WeatherProvider for FakeWeather {
    async fn current_weather(&self, _cell: GridCell) -> ClientResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::payload("kma", "service unavailable"));
        }
        Ok(FORECAST_WEATHER.to_string())
    }

    async fn past_weather(&self, _date: NaiveDate, _lat: f64, _lon: f64) -> ClientResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::payload("kma", "service unavailable"));
        }
        Ok(OBSERVED_WEATHER.to_string())
    }
}

pub struct FakeGeocoder;

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn reverse_geocode(
        &self,
        _latitude: f64,
        _longitude: f64,
    ) -> ClientResult<Option<String>> {
        Ok(Some(GEOCODED_PLACE.to_string()))
    }
}

#[derive(Default)]
pub struct FakeVectorIndex {
    pub fail: AtomicBool,
    documents: Mutex<HashMap<i64, VectorDocument>>,
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn upsert(&self, document: VectorDocument) -> ClientResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::payload("milvus", "collection not loaded"));
        }
        self.documents.lock().await.insert(document.id, document);
        Ok(())
    }
}

impl FakeVectorIndex {
    #[allow(dead_code)]
    pub async fn document(&self, id: i64) -> Option<VectorDocument> {
        self.documents.lock().await.get(&id).cloned()
    }
}

/// Records each event with whether its diary was readable at delivery time.
pub struct FakePublisher {
    store: Arc<MemoryStore>,
    pub fail: AtomicBool,
    events: Mutex<Vec<(DiaryEvent, bool)>>,
}

#[async_trait]
impl EventPublisher for FakePublisher {
    async fn publish(&self, event: &DiaryEvent) -> ClientResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::payload("event bus", "broker unavailable"));
        }
        let visible = self
            .store
            .find_diary(event.diary_id)
            .await
            .map_err(|err| ClientError::payload("event bus", err.to_string()))?
            .is_some();
        self.events.lock().await.push((event.clone(), visible));
        Ok(())
    }
}

impl FakePublisher {
    #[allow(dead_code)]
    pub async fn events(&self) -> Vec<(DiaryEvent, bool)> {
        self.events.lock().await.clone()
    }
}

#[derive(Default)]
pub struct FakePets {
    names: Mutex<HashMap<i64, String>>,
}

#[async_trait]
impl PetDirectory for FakePets {
    async fn find_pet(&self, pet_id: i64) -> ClientResult<Option<PetProfile>> {
        Ok(self
            .names
            .lock()
            .await
            .get(&pet_id)
            .map(|name| PetProfile {
                pet_id,
                pet_name: name.clone(),
            }))
    }
}

impl FakePets {
    #[allow(dead_code)]
    pub async fn insert(&self, pet_id: i64, name: &str) {
        self.names.lock().await.insert(pet_id, name.to_string());
    }
}

pub struct TestApp {
    #[allow(dead_code)]
    pub state: AppState,
    router: Router,
    pub store: Arc<MemoryStore>,
    #[allow(dead_code)]
    pub archive: Arc<FakeArchive>,
    #[allow(dead_code)]
    pub generator: Arc<FakeGenerator>,
    #[allow(dead_code)]
    pub weather: Arc<FakeWeather>,
    #[allow(dead_code)]
    pub vector: Arc<FakeVectorIndex>,
    #[allow(dead_code)]
    pub publisher: Arc<FakePublisher>,
    #[allow(dead_code)]
    pub pets: Option<Arc<FakePets>>,
}

fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        database_max_pool_size: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        cors_allowed_origin: None,
        openai_api_key: None,
        openai_base_url: "http://openai.test/v1".to_string(),
        openai_model: "gpt-4o".to_string(),
        openai_embedding_model: "text-embedding-3-small".to_string(),
        image_service_url: "http://archive.test".to_string(),
        pet_service_url: None,
        weather_api_key: None,
        weather_asos_api_key: None,
        kakao_rest_api_key: None,
        milvus_endpoint: None,
        milvus_collection: "diary_vectors".to_string(),
        milvus_token: None,
        event_bus_endpoint: None,
        event_bus_topic: "diary-events".to_string(),
        default_weather: "맑음".to_string(),
        recap_placeholder_pet_name: "우리 아이".to_string(),
        recap_waiting_interval: Duration::from_secs(60),
        recap_monthly_hour: 2,
        http_timeout: Duration::from_secs(5),
    }
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::build(false).await
    }

    /// Same wiring plus a pet directory.
    #[allow(dead_code)]
    pub async fn with_pet_directory() -> Result<Self> {
        Self::build(true).await
    }

    async fn build(with_pets: bool) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let archive = Arc::new(FakeArchive::default());
        let generator = Arc::new(FakeGenerator::default());
        let weather = Arc::new(FakeWeather::default());
        let vector = Arc::new(FakeVectorIndex::default());
        let publisher = Arc::new(FakePublisher {
            store: store.clone(),
            fail: AtomicBool::new(false),
            events: Mutex::new(Vec::new()),
        });
        let pets = with_pets.then(|| Arc::new(FakePets::default()));

        let collaborators = Collaborators {
            archive: archive.clone(),
            generator: generator.clone(),
            weather: Some(weather.clone()),
            geocoder: Some(Arc::new(FakeGeocoder)),
            vector: Some(vector.clone()),
            events: Some(publisher.clone()),
            pets: pets.clone().map(|pets| pets as Arc<dyn PetDirectory>),
        };

        let state = AppState::new(test_config(), Stores::memory(store.clone()), collaborators)
            .with_recap_seed(7);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            store,
            archive,
            generator,
            weather,
            vector,
            publisher,
            pets,
        })
    }

    /// Runs the outbox worker until no job is due.
    #[allow(dead_code)]
    pub async fn drain_jobs(&self) -> Result<usize> {
        let worker = Worker::from_state(&self.state, Duration::from_millis(10));
        worker
            .drain()
            .await
            .map_err(|err| anyhow!("worker drain failed: {err}"))
    }

    #[allow(dead_code)]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload).await
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_empty(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Multipart request with text fields and `imageFiles` parts.
    #[allow(dead_code)]
    pub async fn post_multipart(
        &self,
        path: &str,
        fields: &[(&str, &str)],
        files: &[(&str, &[u8])],
    ) -> Result<hyper::Response<Body>> {
        let boundary = "petlog-test-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            );
            body.extend(value.as_bytes());
            body.extend(b"\r\n");
        }
        for (filename, data) in files {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"imageFiles\"; filename=\"{filename}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend(b"Content-Type: image/jpeg\r\n\r\n");
            body.extend(*data);
            body.extend(b"\r\n");
        }
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn json_body<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let bytes = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
