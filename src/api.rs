use crate::error::ApiError;
use crate::models::{City, Coordinates};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

/// The marketplace endpoints the city registry depends on.
#[async_trait]
pub trait CityDirectory: Send + Sync {
    async fn active_cities(&self) -> Result<Vec<City>, ApiError>;

    /// `Ok(None)` when the service knows no city near `point`.
    async fn nearest_city(&self, point: Coordinates) -> Result<Option<City>, ApiError>;
}

pub struct MarketplaceApi {
    client: Client,
    base_url: String,
}

impl MarketplaceApi {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl CityDirectory for MarketplaceApi {
    async fn active_cities(&self) -> Result<Vec<City>, ApiError> {
        let path = "/cities/active";
        let res = self.client.get(self.url(path)).send().await?;
        if !res.status().is_success() {
            return Err(ApiError::Status {
                status: res.status().as_u16(),
                path: path.to_string(),
            });
        }
        Ok(res.json::<Vec<City>>().await?)
    }

    async fn nearest_city(&self, point: Coordinates) -> Result<Option<City>, ApiError> {
        let path = "/cities/nearest";
        let res = self
            .client
            .get(self.url(path))
            .query(&[("lat", point.lat), ("lng", point.lng)])
            .send()
            .await?;

        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(res.json::<City>().await?)),
            status => Err(ApiError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            }),
        }
    }
}
