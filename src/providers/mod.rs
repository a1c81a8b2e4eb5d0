//! Location providers tried by the fallback resolver.
//!
//! Every provider answers the same question, "where is the device", and is
//! free to fail. Ordering and error swallowing live in
//! [`FallbackResolver`](crate::resolver::FallbackResolver), not here.

pub mod gps;
pub mod ip;
pub mod region;

use crate::error::ProviderError;
use crate::models::{Coordinates, LocationSource};
use async_trait::async_trait;

pub use gps::{Accuracy, GpsDevice, GpsProvider, GpsdDevice, PermissionPrompt, PermissionStatus};
pub use ip::IpGeolocation;
pub use region::RegionFallback;

/// Whether a resolution may interrupt the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Explicit user action; an undetermined GPS permission may be prompted.
    Interactive,
    /// Background work; never prompts.
    Passive,
}

impl ResolveMode {
    pub fn may_prompt(self) -> bool {
        matches!(self, ResolveMode::Interactive)
    }
}

#[async_trait]
pub trait LocationProvider: Send + Sync {
    fn source(&self) -> LocationSource;

    async fn locate(&self, mode: ResolveMode) -> Result<Coordinates, ProviderError>;
}

pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ProviderError> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
