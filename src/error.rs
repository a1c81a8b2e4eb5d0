use thiserror::Error;

/// Why a single location provider could not produce a fix.
///
/// These never leave the fallback resolver; they are logged and the next
/// provider is tried.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// GPS permission was refused, now or in a previous prompt.
    #[error("location permission denied")]
    PermissionDenied,

    /// GPS permission is undetermined and the caller may not prompt.
    #[error("location permission undetermined and prompting is not allowed")]
    PromptSuppressed,

    /// Network or HTTP status failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered but the answer carried no usable coordinates.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The provider could not be reached or has nothing to offer.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors raised by the key-value store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error for key {key}: {source}")]
    Json {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("storage is closed")]
    Closed,
}

/// Errors from the marketplace API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("marketplace API returned {status} for {path}")]
    Status { status: u16, path: String },
}

/// Errors surfaced to the UI by the location store.
#[derive(Debug, Error)]
pub enum LocationError {
    /// Every provider in the fallback chain failed for this attempt.
    #[error("all location methods exhausted")]
    AllProvidersExhausted,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Api(#[from] ApiError),

    /// A provider could not be constructed, e.g. its HTTP client.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
