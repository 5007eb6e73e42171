use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{ensure_success, ClientError, ClientResult};

const KAKAO_REGION_URL: &str = "https://dapi.kakao.com/v2/local/geo/coord2regioncode.json";

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Administrative address for the point, `None` when nothing matches.
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> ClientResult<Option<String>>;
}

pub struct KakaoGeocoder {
    client: Client,
    api_key: String,
}

impl KakaoGeocoder {
    pub fn new(client: Client, api_key: String) -> Self {
        Self { client, api_key }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegionResponse {
    #[serde(default)]
    pub documents: Vec<RegionDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionDocument {
    pub region_type: String,
    pub address_name: String,
}

/// Prefers the administrative-dong ("H") region, else the first candidate.
pub fn pick_region(documents: &[RegionDocument]) -> Option<String> {
    documents
        .iter()
        .find(|doc| doc.region_type == "H")
        .or_else(|| documents.first())
        .map(|doc| doc.address_name.clone())
}

#[async_trait]
impl Geocoder for KakaoGeocoder {
    async fn reverse_geocode(&self, latitude: f64, longitude: f64) -> ClientResult<Option<String>> {
        let x = longitude.to_string();
        let y = latitude.to_string();
        let response = self
            .client
            .get(KAKAO_REGION_URL)
            .query(&[("x", x.as_str()), ("y", y.as_str())])
            .header("Authorization", format!("KakaoAK {}", self.api_key))
            .send()
            .await?;
        let response = ensure_success("kakao", response).await?;
        let body: RegionResponse = response
            .json()
            .await
            .map_err(|err| ClientError::payload("kakao", err.to_string()))?;
        Ok(pick_region(&body.documents))
    }
}
