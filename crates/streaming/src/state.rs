use serde::{Deserialize, Serialize};

/// Lifecycle of one detail request.
///
/// `Queued → Fetching → {Cached | Retrying → Fetching | Failed}`.
/// `Cached` and `Failed` are terminal until the item is refreshed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DetailState {
    Queued,
    Fetching { attempt: u32 },
    Retrying { attempt: u32 },
    Cached,
    Failed,
}

impl DetailState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DetailState::Cached | DetailState::Failed)
    }
}
