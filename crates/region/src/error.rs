use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// Rejected locally; never sent upstream.
    #[error("invalid shape: {0}")]
    ShapeInvalid(String),
    #[error("region query failed at {endpoint}: {reason}")]
    Upstream { endpoint: String, reason: String },
}

impl RegionError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::ShapeInvalid(reason.into())
    }

    pub fn upstream(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Upstream {
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }
}
