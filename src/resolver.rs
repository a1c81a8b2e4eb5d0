//! Ordered fallback across location providers.
//!
//! Providers are tried one after another, never raced; the next provider
//! only runs once the previous one has failed. Individual provider errors
//! are logged here and never returned.

use crate::error::LocationError;
use crate::models::{Coordinates, LocationSource};
use crate::providers::{LocationProvider, ResolveMode};
use std::sync::Arc;
use tracing::{info, warn};

/// A fix and the provider that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub coordinates: Coordinates,
    pub source: LocationSource,
}

pub struct FallbackResolver {
    providers: Vec<Arc<dyn LocationProvider>>,
}

impl FallbackResolver {
    /// `providers` in priority order, usually GPS, IP, region.
    pub fn new(providers: Vec<Arc<dyn LocationProvider>>) -> Self {
        Self { providers }
    }

    pub fn sources(&self) -> Vec<LocationSource> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    pub async fn resolve(&self, mode: ResolveMode) -> Result<Resolution, LocationError> {
        for provider in &self.providers {
            let source = provider.source();
            match provider.locate(mode).await {
                Ok(coordinates) => {
                    info!("Location resolved via {} - {}", source, coordinates);
                    return Ok(Resolution {
                        coordinates,
                        source,
                    });
                }
                Err(e) => warn!("Location provider {} failed: {}", source, e),
            }
        }

        warn!(
            "All location methods exhausted ({} providers, {:?})",
            self.providers.len(),
            mode
        );
        Err(LocationError::AllProvidersExhausted)
    }
}
