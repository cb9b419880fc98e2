use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Filter criteria shared by every source in a round.
///
/// Two rounds belong to the same query iff their filters compare equal; a
/// change supersedes whatever is still in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Filters {
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub grade: Option<String>,
    pub taxon: Option<String>,
    /// Boundary string as produced by the region crate.
    pub polygon: Option<String>,
    pub has_media: Option<bool>,
    /// Pass-through parameters for source-specific filters.
    pub extra: BTreeMap<String, String>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        *self == Filters::default()
    }

    /// Upstream query parameters. Fixed order, `extra` last and sorted.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let named = [
            ("date_from", &self.date_from),
            ("date_to", &self.date_to),
            ("grade", &self.grade),
            ("taxon", &self.taxon),
            ("polygon", &self.polygon),
        ];
        for (key, value) in named {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                out.push((key.to_string(), v.to_string()));
            }
        }
        if let Some(has_media) = self.has_media {
            out.push(("has_media".to_string(), has_media.to_string()));
        }
        out.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }
}
