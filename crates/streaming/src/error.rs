use thiserror::Error;

/// Why one detail fetch attempt failed. Retried until the budget runs out.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DetailFailure {
    #[error("enrichment failed for {url}: {reason}")]
    EnrichmentFailed { url: String, reason: String },
    #[error("reverse geocoding failed at ({lat}, {lng}): {reason}")]
    GeocodeFailed { lat: f64, lng: f64, reason: String },
    /// The request could not be turned into a URL; never retried.
    #[error("invalid detail request: {0}")]
    InvalidRequest(String),
}

impl DetailFailure {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DetailFailure::InvalidRequest(_))
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache io: {0}")]
    Io(#[from] std::io::Error),
    /// Unreadable cache document. Readers treat this as a miss.
    #[error("cache corrupt: {0}")]
    Corrupt(String),
}
