//! Device GPS provider.
//!
//! [`GpsProvider`] applies the permission rules in front of any
//! [`GpsDevice`]: granted means ask for a fix, denied means skip, and an
//! undetermined permission is only prompted for during an interactive
//! resolution. [`GpsdDevice`] is the concrete device for desktop hosts: it
//! reads a fix from a local gpsd and keeps the user's permission decision in
//! the key-value store.

use super::{LocationProvider, ResolveMode};
use crate::error::ProviderError;
use crate::kv::{keys, KeyValueStore};
use crate::models::{Coordinates, LocationSource};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const GPSD_WATCH: &[u8] = b"?WATCH={\"enable\":true,\"json\":true};\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
    Undetermined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    Low,
    #[default]
    Balanced,
    High,
}

impl Accuracy {
    /// How long to wait for a usable fix.
    pub fn fix_timeout(self) -> Duration {
        match self {
            Accuracy::Low => Duration::from_secs(5),
            Accuracy::Balanced => Duration::from_secs(10),
            Accuracy::High => Duration::from_secs(20),
        }
    }

    /// Minimum gpsd fix mode: 2 is a 2D fix, 3 adds altitude.
    fn min_fix_mode(self) -> u8 {
        match self {
            Accuracy::High => 3,
            Accuracy::Low | Accuracy::Balanced => 2,
        }
    }
}

#[async_trait]
pub trait GpsDevice: Send + Sync {
    /// Current permission state. Never prompts.
    async fn permission_status(&self) -> PermissionStatus;

    /// Prompts the user if the state is undetermined.
    async fn request_permission(&self) -> PermissionStatus;

    async fn current_position(&self, accuracy: Accuracy) -> Result<Coordinates, ProviderError>;
}

/// Something that can put a yes/no location question in front of the user.
#[async_trait]
pub trait PermissionPrompt: Send + Sync {
    /// `true` when the user allows location access.
    async fn ask(&self) -> bool;
}

pub struct GpsProvider {
    device: Arc<dyn GpsDevice>,
    accuracy: Accuracy,
}

impl GpsProvider {
    pub fn new(device: Arc<dyn GpsDevice>, accuracy: Accuracy) -> Self {
        Self { device, accuracy }
    }
}

#[async_trait]
impl LocationProvider for GpsProvider {
    fn source(&self) -> LocationSource {
        LocationSource::Gps
    }

    async fn locate(&self, mode: ResolveMode) -> Result<Coordinates, ProviderError> {
        let status = match self.device.permission_status().await {
            PermissionStatus::Undetermined if mode.may_prompt() => {
                self.device.request_permission().await
            }
            PermissionStatus::Undetermined => return Err(ProviderError::PromptSuppressed),
            status => status,
        };
        if status != PermissionStatus::Granted {
            return Err(ProviderError::PermissionDenied);
        }
        self.device.current_position(self.accuracy).await
    }
}

#[derive(Deserialize)]
struct GpsdReport {
    class: String,
    #[serde(default)]
    mode: u8,
    lat: Option<f64>,
    lon: Option<f64>,
}

/// GPS through a gpsd daemon, e.g. `127.0.0.1:2947`.
pub struct GpsdDevice {
    address: String,
    store: Arc<dyn KeyValueStore>,
    prompt: Arc<dyn PermissionPrompt>,
}

impl GpsdDevice {
    pub fn new(
        address: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        prompt: Arc<dyn PermissionPrompt>,
    ) -> Self {
        Self {
            address: address.into(),
            store,
            prompt,
        }
    }

    async fn read_fix(&self, min_mode: u8) -> Result<Coordinates, ProviderError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("gpsd at {}: {}", self.address, e)))?;
        stream
            .write_all(GPSD_WATCH)
            .await
            .map_err(|e| ProviderError::Unavailable(format!("gpsd watch: {e}")))?;

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("gpsd read: {e}")))?
        {
            let Ok(report) = serde_json::from_str::<GpsdReport>(&line) else {
                continue;
            };
            if report.class != "TPV" || report.mode < min_mode {
                continue;
            }
            if let (Some(lat), Some(lon)) = (report.lat, report.lon) {
                return Ok(Coordinates::new(lat, lon));
            }
        }
        Err(ProviderError::Unavailable(
            "gpsd closed the connection before a fix".to_string(),
        ))
    }
}

#[async_trait]
impl GpsDevice for GpsdDevice {
    async fn permission_status(&self) -> PermissionStatus {
        match self.store.get(keys::GPS_PERMISSION).await {
            Ok(Some(value)) if value == "granted" => PermissionStatus::Granted,
            Ok(Some(value)) if value == "denied" => PermissionStatus::Denied,
            Ok(_) => PermissionStatus::Undetermined,
            Err(e) => {
                warn!("Could not read GPS permission: {}", e);
                PermissionStatus::Undetermined
            }
        }
    }

    async fn request_permission(&self) -> PermissionStatus {
        let current = self.permission_status().await;
        if current != PermissionStatus::Undetermined {
            return current;
        }

        let granted = self.prompt.ask().await;
        let (status, value) = if granted {
            (PermissionStatus::Granted, "granted")
        } else {
            (PermissionStatus::Denied, "denied")
        };
        info!("Location permission {}", value);
        if let Err(e) = self.store.set(keys::GPS_PERMISSION, value.to_string()).await {
            warn!("Persistence failure saving GPS permission: {}", e);
        }
        status
    }

    async fn current_position(&self, accuracy: Accuracy) -> Result<Coordinates, ProviderError> {
        let limit = accuracy.fix_timeout();
        let coords = tokio::time::timeout(limit, self.read_fix(accuracy.min_fix_mode()))
            .await
            .map_err(|_| ProviderError::Timeout(limit))??;
        debug!("gpsd fix {}", coords);
        Ok(coords)
    }
}
