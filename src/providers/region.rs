//! Last-resort provider: the country implied by the device locale.
//!
//! `tr_TR.UTF-8` becomes `TR`, which a restcountries-style endpoint turns
//! into the capital's coordinates (or the country centroid when the capital
//! is unknown). Coarse, but it keeps ranking roughly local when GPS and IP
//! lookup both fail.

use super::{http_client, LocationProvider, ResolveMode};
use crate::error::ProviderError;
use crate::models::{Coordinates, LocationSource};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variables consulted for the locale, highest priority first.
const LOCALE_VARS: [&str; 3] = ["LC_ALL", "LC_MESSAGES", "LANG"];

/// Extracts an ISO 3166 alpha-2 code from a POSIX or BCP 47 locale tag.
///
/// Accepts `en_US`, `en-US`, `tr_TR.UTF-8`, `de_DE@euro` and
/// `zh-Hant-TW`. Returns `None` for `C`, `POSIX` or tags without a region.
pub fn country_code_from_locale(locale: &str) -> Option<String> {
    let tag = locale
        .split(['.', '@'])
        .next()
        .unwrap_or_default()
        .trim();
    if tag.is_empty() || tag.eq_ignore_ascii_case("C") || tag.eq_ignore_ascii_case("POSIX") {
        return None;
    }

    tag.split(['_', '-'])
        .skip(1)
        .find(|part| part.len() == 2 && part.chars().all(|c| c.is_ascii_alphabetic()))
        .map(|part| part.to_ascii_uppercase())
}

/// Reads the first non-empty locale variable from the environment.
pub fn detect_locale() -> Option<String> {
    LOCALE_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
}

#[derive(Deserialize)]
struct CapitalInfo {
    #[serde(default)]
    latlng: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountryRecord {
    capital_info: Option<CapitalInfo>,
    #[serde(default)]
    latlng: Vec<f64>,
}

impl CountryRecord {
    fn representative_point(&self) -> Option<Coordinates> {
        let capital = self
            .capital_info
            .as_ref()
            .map(|info| info.latlng.as_slice())
            .unwrap_or_default();
        pair(capital).or_else(|| pair(&self.latlng))
    }
}

fn pair(values: &[f64]) -> Option<Coordinates> {
    match values {
        [lat, lng] => Some(Coordinates::new(*lat, *lng)),
        _ => None,
    }
}

// The alpha endpoint answers with an object or a one-element array
// depending on the API version.
#[derive(Deserialize)]
#[serde(untagged)]
enum CountryResponse {
    One(CountryRecord),
    Many(Vec<CountryRecord>),
}

pub struct RegionFallback {
    client: Client,
    endpoint: String,
    locale_override: Option<String>,
}

impl RegionFallback {
    pub fn new(
        endpoint: impl Into<String>,
        locale_override: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.into(),
            locale_override,
        })
    }

    fn country_code(&self) -> Option<String> {
        let locale = self.locale_override.clone().or_else(detect_locale)?;
        let code = country_code_from_locale(&locale);
        debug!("Locale '{}' maps to country {:?}", locale, code);
        code
    }

    async fn country_point(&self, code: &str) -> Result<Coordinates, ProviderError> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), code);
        let res = self
            .client
            .get(url)
            .query(&[("fields", "capitalInfo,latlng")])
            .send()
            .await?
            .error_for_status()?
            .json::<CountryResponse>()
            .await?;

        let record = match res {
            CountryResponse::One(record) => Some(record),
            CountryResponse::Many(records) => records.into_iter().next(),
        };
        record
            .as_ref()
            .and_then(CountryRecord::representative_point)
            .ok_or_else(|| ProviderError::Malformed(format!("no coordinates for country {code}")))
    }
}

#[async_trait]
impl LocationProvider for RegionFallback {
    fn source(&self) -> LocationSource {
        LocationSource::Region
    }

    async fn locate(&self, _mode: ResolveMode) -> Result<Coordinates, ProviderError> {
        let code = self.country_code().ok_or_else(|| {
            ProviderError::Unavailable("device locale carries no region".to_string())
        })?;
        let coords = self.country_point(&code).await?;
        info!("Region fallback resolved {} to {}", code, coords);
        Ok(coords)
    }
}
