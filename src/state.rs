use std::sync::Arc;

use anyhow::Context;
use tokio::sync::Notify;
use tracing::warn;

use crate::{
    clients::{
        ai::{ContentGenerator, OpenAiGenerator},
        archive::{ArchiveClient, HttpArchiveClient},
        build_http_client,
        events::{EventPublisher, KafkaRestPublisher},
        geocoding::{Geocoder, KakaoGeocoder},
        pets::{HttpPetDirectory, PetDirectory},
        vector::{MilvusVectorIndex, VectorIndex},
        weather::{KmaWeatherClient, WeatherProvider},
    },
    config::AppConfig,
    db::PgPool,
    services::{DiaryService, Enricher, LocationService, RecapScheduler, RecapService},
    store::{
        DiaryStore, JobQueue, LocationStore, MemoryStore, PgStore, PhotoMetadataStore, RecapStore,
    },
};

#[derive(Clone)]
pub struct Stores {
    pub diaries: Arc<dyn DiaryStore>,
    pub metadata: Arc<dyn PhotoMetadataStore>,
    pub recaps: Arc<dyn RecapStore>,
    pub locations: Arc<dyn LocationStore>,
    pub jobs: Arc<dyn JobQueue>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            diaries: store.clone(),
            metadata: store.clone(),
            recaps: store.clone(),
            locations: store.clone(),
            jobs: store,
        }
    }

    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            diaries: store.clone(),
            metadata: store.clone(),
            recaps: store.clone(),
            locations: store.clone(),
            jobs: store,
        }
    }
}

#[derive(Clone)]
pub struct Collaborators {
    pub archive: Arc<dyn ArchiveClient>,
    pub generator: Arc<dyn ContentGenerator>,
    pub weather: Option<Arc<dyn WeatherProvider>>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub vector: Option<Arc<dyn VectorIndex>>,
    pub events: Option<Arc<dyn EventPublisher>>,
    pub pets: Option<Arc<dyn PetDirectory>>,
}

impl Collaborators {
    /// HTTP adapters for everything configured; missing optional ones are
    /// skipped with a warning.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let client =
            build_http_client(config.http_timeout).context("failed to build HTTP client")?;

        let weather = match (&config.weather_api_key, &config.weather_asos_api_key) {
            (Some(forecast_key), Some(asos_key)) => Some(Arc::new(KmaWeatherClient::new(
                client.clone(),
                forecast_key.clone(),
                asos_key.clone(),
            )) as Arc<dyn WeatherProvider>),
            _ => {
                warn!("weather API key not configured; diaries fall back to the default weather");
                None
            }
        };

        let geocoder = match &config.kakao_rest_api_key {
            Some(key) => {
                Some(Arc::new(KakaoGeocoder::new(client.clone(), key.clone())) as Arc<dyn Geocoder>)
            }
            None => {
                warn!("kakao REST API key not configured; location names stay empty");
                None
            }
        };

        let vector = match &config.milvus_endpoint {
            Some(endpoint) => Some(Arc::new(MilvusVectorIndex::new(
                client.clone(),
                &config.openai_base_url,
                config.openai_embedding_model.clone(),
                config.openai_api_key.clone(),
                endpoint,
                config.milvus_token.clone(),
                config.milvus_collection.clone(),
            )) as Arc<dyn VectorIndex>),
            None => {
                warn!("milvus endpoint not configured; vector indexing disabled");
                None
            }
        };

        let events = match &config.event_bus_endpoint {
            Some(endpoint) => Some(Arc::new(KafkaRestPublisher::new(
                client.clone(),
                endpoint,
                config.event_bus_topic.clone(),
            )) as Arc<dyn EventPublisher>),
            None => {
                warn!("event bus endpoint not configured; diary events will not be delivered");
                None
            }
        };

        let pets = config.pet_service_url.as_deref().map(|url| {
            Arc::new(HttpPetDirectory::new(client.clone(), url)) as Arc<dyn PetDirectory>
        });

        Ok(Self {
            archive: Arc::new(HttpArchiveClient::new(
                client.clone(),
                &config.image_service_url,
            )),
            generator: Arc::new(OpenAiGenerator::new(
                client,
                &config.openai_base_url,
                config.openai_api_key.clone(),
                config.openai_model.clone(),
            )),
            weather,
            geocoder,
            vector,
            events,
            pets,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub stores: Stores,
    pub collaborators: Collaborators,
    /// Wakes the outbox worker after a commit.
    pub outbox: Arc<Notify>,
    pub enricher: Arc<Enricher>,
    pub diaries: Arc<DiaryService>,
    pub recaps: Arc<RecapService>,
    pub locations: Arc<LocationService>,
}

impl AppState {
    pub fn new(config: AppConfig, stores: Stores, collaborators: Collaborators) -> Self {
        let outbox = Arc::new(Notify::new());
        let enricher = Arc::new(Enricher::new(
            collaborators.weather.clone(),
            collaborators.geocoder.clone(),
            config.default_weather.clone(),
        ));
        let diaries = Arc::new(DiaryService::new(
            &stores,
            &collaborators,
            enricher.clone(),
            outbox.clone(),
        ));
        let recaps = Arc::new(RecapService::new(
            stores.diaries.clone(),
            stores.recaps.clone(),
            collaborators.generator.clone(),
            collaborators.pets.clone(),
            config.recap_placeholder_pet_name.clone(),
        ));
        let locations = Arc::new(LocationService::new(stores.locations.clone()));

        Self {
            config: Arc::new(config),
            stores,
            collaborators,
            outbox,
            enricher,
            diaries,
            recaps,
            locations,
        }
    }

    pub fn with_recap_seed(mut self, seed: u64) -> Self {
        let recaps = RecapService::new(
            self.stores.diaries.clone(),
            self.stores.recaps.clone(),
            self.collaborators.generator.clone(),
            self.collaborators.pets.clone(),
            self.config.recap_placeholder_pet_name.clone(),
        )
        .with_seed(seed);
        self.recaps = Arc::new(recaps);
        self
    }

    pub fn scheduler(&self) -> RecapScheduler {
        RecapScheduler::new(
            self.recaps.clone(),
            self.stores.diaries.clone(),
            self.stores.recaps.clone(),
            self.config.recap_waiting_interval,
            self.config.recap_monthly_hour,
        )
    }
}
