use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{ensure_success, trim_base, ClientError, ClientResult};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PetProfile {
    pub pet_id: i64,
    pub pet_name: String,
}

/// Optional lookup into the pet service; `None` means the pet no longer exists.
#[async_trait]
pub trait PetDirectory: Send + Sync {
    async fn find_pet(&self, pet_id: i64) -> ClientResult<Option<PetProfile>>;
}

pub struct HttpPetDirectory {
    client: Client,
    base_url: String,
}

impl HttpPetDirectory {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: trim_base(base_url),
        }
    }
}

#[async_trait]
impl PetDirectory for HttpPetDirectory {
    async fn find_pet(&self, pet_id: i64) -> ClientResult<Option<PetProfile>> {
        let response = self
            .client
            .get(format!("{}/api/pets/{}", self.base_url, pet_id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success("pet service", response).await?;
        let profile = response
            .json::<PetProfile>()
            .await
            .map_err(|err| ClientError::payload("pet service", err.to_string()))?;
        Ok(Some(profile))
    }
}
