use foundation::SourceId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport error, non-2xx status or undecodable body.
    #[error("{source_id} unavailable at {endpoint}: {reason}")]
    SourceUnavailable {
        source_id: SourceId,
        endpoint: String,
        reason: String,
    },
    /// Filters changed while the round was in flight; its results are stale.
    #[error("fetch round superseded by newer filters")]
    Superseded,
}

impl FetchError {
    pub fn unavailable(
        source_id: SourceId,
        endpoint: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::SourceUnavailable {
            source_id,
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}
