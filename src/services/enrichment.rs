use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    clients::{
        geocoding::Geocoder,
        weather::{to_grid, WeatherProvider},
    },
    error::{Degrade, ServiceError, ServiceResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) if latitude.is_finite() && longitude.is_finite() => {
                Some(Self {
                    latitude,
                    longitude,
                })
            }
            _ => None,
        }
    }
}

/// Best-effort weather and place lookups. Failures never leave this type as
/// errors from the `*_or_default` helpers.
pub struct Enricher {
    weather: Option<Arc<dyn WeatherProvider>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    default_weather: String,
}

impl Enricher {
    pub fn new(
        weather: Option<Arc<dyn WeatherProvider>>,
        geocoder: Option<Arc<dyn Geocoder>>,
        default_weather: String,
    ) -> Self {
        Self {
            weather,
            geocoder,
            default_weather,
        }
    }

    /// Observed weather for past dates, the live forecast otherwise.
    pub async fn lookup_weather(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        coords: Coordinates,
    ) -> ServiceResult<String> {
        let provider = self
            .weather
            .as_ref()
            .ok_or_else(|| ServiceError::Enrichment("weather provider not configured".into()))?;

        let result = if date < today {
            provider
                .past_weather(date, coords.latitude, coords.longitude)
                .await
        } else {
            provider
                .current_weather(to_grid(coords.latitude, coords.longitude))
                .await
        };
        result.map_err(|err| ServiceError::Enrichment(format!("weather lookup: {err}")))
    }

    pub async fn weather_or_default(
        &self,
        date: NaiveDate,
        today: NaiveDate,
        coords: Coordinates,
    ) -> String {
        match self.lookup_weather(date, today, coords).await.degrade("weather") {
            Ok(Some(label)) => label,
            _ => self.default_weather.clone(),
        }
    }

    pub async fn lookup_location(&self, coords: Coordinates) -> ServiceResult<Option<String>> {
        let Some(geocoder) = &self.geocoder else {
            debug!("geocoder not configured; leaving location empty");
            return Ok(None);
        };
        geocoder
            .reverse_geocode(coords.latitude, coords.longitude)
            .await
            .map_err(|err| ServiceError::Enrichment(format!("reverse geocoding: {err}")))
    }

    pub async fn location_or_none(&self, coords: Coordinates) -> Option<String> {
        self.lookup_location(coords)
            .await
            .degrade("location")
            .ok()
            .flatten()
            .flatten()
    }
}
