//! IP geolocation provider.
//!
//! Asks an ipapi.co-style endpoint where the public IP address is. The
//! first successful answer is remembered for the rest of the process so a
//! refresh every few minutes does not hit the service again; failures are
//! not remembered.

use super::{http_client, LocationProvider, ResolveMode};
use crate::error::ProviderError;
use crate::models::{Coordinates, LocationSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Result of one IP lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct IpLookup {
    pub coordinates: Coordinates,
    pub city: Option<String>,
    pub country: Option<String>,
}

// Some services send degrees as strings ("41.0082").
#[derive(Deserialize)]
#[serde(untagged)]
enum Degrees {
    Number(f64),
    Text(String),
}

impl Degrees {
    fn value(&self) -> Option<f64> {
        match self {
            Degrees::Number(v) => Some(*v),
            Degrees::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Deserialize)]
struct IpLookupResponse {
    latitude: Option<Degrees>,
    longitude: Option<Degrees>,
    city: Option<String>,
    country: Option<String>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
}

pub struct IpGeolocation {
    client: Client,
    endpoint: String,
    memo: Mutex<Option<IpLookup>>,
}

impl IpGeolocation {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self::with_client(http_client(timeout)?, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            memo: Mutex::new(None),
        }
    }

    /// Returns the remembered lookup or asks the service.
    ///
    /// The memo lock is held across the request, so concurrent callers
    /// share a single network round trip.
    pub async fn lookup(&self) -> Result<IpLookup, ProviderError> {
        let mut memo = self.memo.lock().await;
        if let Some(hit) = memo.as_ref() {
            debug!("IP geolocation served from process cache");
            return Ok(hit.clone());
        }

        let fresh = self.fetch().await?;
        info!(
            "IP geolocation successful - {} ({}, {})",
            fresh.coordinates,
            fresh.city.as_deref().unwrap_or("?"),
            fresh.country.as_deref().unwrap_or("?")
        );
        *memo = Some(fresh.clone());
        Ok(fresh)
    }

    async fn fetch(&self) -> Result<IpLookup, ProviderError> {
        let res = self
            .client
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json::<IpLookupResponse>()
            .await?;

        if res.error {
            return Err(ProviderError::Unavailable(
                res.reason.unwrap_or_else(|| "lookup refused".to_string()),
            ));
        }

        let lat = res.latitude.as_ref().and_then(Degrees::value);
        let lng = res.longitude.as_ref().and_then(Degrees::value);
        match (lat, lng) {
            (Some(lat), Some(lng)) => Ok(IpLookup {
                coordinates: Coordinates::new(lat, lng),
                city: res.city,
                country: res.country,
            }),
            _ => Err(ProviderError::Malformed(
                "response has no latitude/longitude".to_string(),
            )),
        }
    }
}

#[async_trait]
impl LocationProvider for IpGeolocation {
    fn source(&self) -> LocationSource {
        LocationSource::Ip
    }

    async fn locate(&self, _mode: ResolveMode) -> Result<Coordinates, ProviderError> {
        self.lookup().await.map(|hit| hit.coordinates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> IpGeolocation {
        IpGeolocation::new(format!("{}/json/", server.uri()), Duration::from_secs(5))
            .expect("client construction should not fail")
    }

    #[tokio::test]
    async fn lookup_is_cached_for_the_process() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/json/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "latitude": 41.0,
                "longitude": 29.0,
                "city": "Istanbul",
                "country": "TR"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ip = provider(&server);
        let first = ip.locate(ResolveMode::Passive).await.unwrap();
        let second = ip.locate(ResolveMode::Passive).await.unwrap();
        assert_eq!(first, Coordinates::new(41.0, 29.0));
        assert_eq!(first, second);

        let hit = ip.lookup().await.unwrap();
        assert_eq!(hit.city.as_deref(), Some("Istanbul"));
    }

    #[tokio::test]
    async fn error_envelope_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ip": "127.0.0.1",
                "error": true,
                "reason": "Reserved IP Address"
            })))
            .mount(&server)
            .await;

        let err = provider(&server).locate(ResolveMode::Passive).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(ref r) if r == "Reserved IP Address"));
    }

    #[tokio::test]
    async fn missing_coordinates_are_malformed_and_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "city": "Nowhere"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let ip = provider(&server);
        assert!(matches!(
            ip.locate(ResolveMode::Passive).await,
            Err(ProviderError::Malformed(_))
        ));
        assert!(ip.locate(ResolveMode::Passive).await.is_err());
    }

    #[tokio::test]
    async fn string_degrees_are_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "latitude": "37.7749",
                "longitude": "-122.4194"
            })))
            .mount(&server)
            .await;

        let coords = provider(&server).locate(ResolveMode::Passive).await.unwrap();
        assert_eq!(coords, Coordinates::new(37.7749, -122.4194));
    }

    #[tokio::test]
    async fn server_error_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).locate(ResolveMode::Passive).await.unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
    }
}
