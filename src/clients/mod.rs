//! Collaborators reached over HTTP. Each module pairs a trait with its
//! reqwest-backed adapter so services and tests can swap implementations.

use std::time::Duration;

use reqwest::{Client, Response};
use thiserror::Error;

pub mod ai;
pub mod archive;
pub mod events;
pub mod geocoding;
pub mod pets;
pub mod vector;
pub mod weather;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{service} returned HTTP {status}: {body}")]
    HttpStatus {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("unexpected {service} response: {message}")]
    Payload {
        service: &'static str,
        message: String,
    },
}

impl ClientError {
    pub fn payload(service: &'static str, message: impl Into<String>) -> Self {
        Self::Payload {
            service,
            message: message.into(),
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub fn build_http_client(timeout: Duration) -> ClientResult<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()?)
}

/// Turns non-2xx responses into `ClientError::HttpStatus`, keeping a bounded
/// slice of the body for the log line.
pub(crate) async fn ensure_success(
    service: &'static str,
    response: Response,
) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::HttpStatus {
        service,
        status: status.as_u16(),
        body: body.chars().take(512).collect(),
    })
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
