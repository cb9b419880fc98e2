use foundation::SourceId;
use serde::{Deserialize, Serialize};

use crate::SourcePage;

/// Pagination state of one source.
///
/// Pages are 1-based upstream; a fresh cursor sits at page 0 with
/// `has_more = true`. `has_more = false` is terminal: the coordinator never
/// queries an exhausted or failed cursor again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCursor {
    pub source: SourceId,
    pub page: u32,
    pub has_more: bool,
    /// Total as self-reported by the source on its last page.
    pub total_known: u64,
    #[serde(default)]
    pub failed: bool,
}

impl SourceCursor {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            page: 0,
            has_more: true,
            total_known: 0,
            failed: false,
        }
    }

    /// One fresh cursor per source, in the given order.
    pub fn for_sources(sources: &[SourceId]) -> Vec<SourceCursor> {
        sources.iter().copied().map(SourceCursor::new).collect()
    }

    pub fn is_active(&self) -> bool {
        self.has_more
    }

    /// Page to request next.
    pub fn next_page(&self) -> u32 {
        self.page + 1
    }

    /// Cursor after `page` was received for [`Self::next_page`].
    pub fn advanced(&self, page: &SourcePage) -> SourceCursor {
        SourceCursor {
            source: self.source,
            page: self.next_page(),
            has_more: page.has_more,
            total_known: page.total,
            failed: false,
        }
    }

    /// Cursor after the source failed; it stays where it was and stops.
    pub fn failed(&self) -> SourceCursor {
        SourceCursor {
            has_more: false,
            failed: true,
            ..self.clone()
        }
    }
}
