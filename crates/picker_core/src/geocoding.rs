//! Address → coordinate lookups against the catalog geocoder.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::domain::{Coordinate, LngLat};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeOutcome {
    Found(Coordinate),
    NotFound,
    Failed(String),
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn resolve(&self, address: &str, api_key: &str) -> GeocodeOutcome;
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    result: Option<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    items: Vec<GeocodeItem>,
}

#[derive(Debug, Deserialize)]
struct GeocodeItem {
    point: Option<LngLat>,
}

pub struct GeocodingClient {
    http: Client,
    endpoint: Url,
}

impl GeocodingClient {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: Client::new(),
            endpoint,
        }
    }

    /// Timeouts are left to the transport; `None` keeps reqwest's default.
    pub fn with_timeout(endpoint: Url, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            endpoint,
        })
    }

    pub fn request_url(&self, address: &str, api_key: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("q", address)
            .append_pair("key", api_key)
            .append_pair("fields", "items.point");
        url
    }

    async fn fetch(&self, address: &str, api_key: &str) -> anyhow::Result<GeocodeResponse> {
        let response = self
            .http
            .get(self.request_url(address, api_key))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl Geocoder for GeocodingClient {
    async fn resolve(&self, address: &str, api_key: &str) -> GeocodeOutcome {
        debug!(address, "geocoding address");
        match self.fetch(address, api_key).await {
            Ok(body) => outcome_from_response(body),
            Err(err) => {
                warn!(address, error = %err, "geocoding request failed");
                GeocodeOutcome::Failed(err.to_string())
            }
        }
    }
}

fn outcome_from_response(body: GeocodeResponse) -> GeocodeOutcome {
    let first = body
        .result
        .and_then(|result| result.items.into_iter().next());
    match first {
        // The API answers longitude-first.
        Some(GeocodeItem { point: Some(point) }) => GeocodeOutcome::Found(Coordinate::from(point)),
        Some(GeocodeItem { point: None }) => {
            GeocodeOutcome::Failed("first geocode item has no point".to_string())
        }
        None => GeocodeOutcome::NotFound,
    }
}

#[cfg(test)]
#[path = "tests/geocoding_tests.rs"]
mod tests;
