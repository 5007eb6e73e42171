use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::{ServiceError, ServiceResult},
    models::{NewWalkRoute, WalkRoute},
    store::LocationStore,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationInput {
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationView {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&WalkRoute> for LocationView {
    fn from(point: &WalkRoute) -> Self {
        Self {
            latitude: point.latitude,
            longitude: point.longitude,
        }
    }
}

pub struct LocationService {
    store: Arc<dyn LocationStore>,
}

impl LocationService {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    pub async fn save_point(&self, input: LocationInput) -> ServiceResult<WalkRoute> {
        if !(-90.0..=90.0).contains(&input.latitude) {
            return Err(ServiceError::invalid("latitude must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&input.longitude) {
            return Err(ServiceError::invalid("longitude must be between -180 and 180"));
        }

        let point = self
            .store
            .append_point(NewWalkRoute {
                user_id: input.user_id,
                latitude: input.latitude,
                longitude: input.longitude,
            })
            .await?;
        debug!(user_id = input.user_id, point_id = point.id, "walk point stored");
        Ok(point)
    }

    /// First point the user recorded on `date`.
    pub async fn representative_location(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> ServiceResult<Option<LocationView>> {
        let from = date.and_time(NaiveTime::MIN);
        let to = date
            .succ_opt()
            .ok_or_else(|| ServiceError::invalid("date out of range"))?
            .and_time(NaiveTime::MIN);
        let point = self.store.first_point_between(user_id, from, to).await?;
        Ok(point.as_ref().map(LocationView::from))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;
    use crate::store::MemoryStore;

    fn at(raw: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn point(user_id: i64, latitude: f64) -> NewWalkRoute {
        NewWalkRoute {
            user_id,
            latitude,
            longitude: 127.0,
        }
    }

    #[tokio::test]
    async fn picks_first_point_of_the_day() {
        let store = Arc::new(MemoryStore::new());
        store.insert_point_at(point(1, 30.0), at("2024-05-01 23:59:59")).await;
        store.insert_point_at(point(1, 37.2), at("2024-05-02 10:00:00")).await;
        store.insert_point_at(point(1, 37.1), at("2024-05-02 08:30:00")).await;
        store.insert_point_at(point(2, 35.0), at("2024-05-02 07:00:00")).await;

        let service = LocationService::new(store);
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let found = service.representative_location(1, day).await.unwrap();
        assert_eq!(found.map(|view| view.latitude), Some(37.1));

        let empty_day = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        assert!(service.representative_location(1, empty_day).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_out_of_range_coordinates() {
        let service = LocationService::new(Arc::new(MemoryStore::new()));
        let result = service
            .save_point(LocationInput {
                user_id: 1,
                latitude: 91.0,
                longitude: 10.0,
            })
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
    }
}
