//! Detail event wire types.
//!
//! One [`DetailEvent`] is emitted per completed enrichment, success or final
//! failure. Events serialize to one JSON object each so a transport can send
//! them as newline-delimited JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::DetailTarget;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DetailOutcome {
    Ready { detail: Value },
    /// Retries exhausted. `fallback` is what a viewer should show instead.
    Failed { error: String, fallback: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailEvent {
    pub item_id: String,
    pub cache_key: String,
    /// Answered from the cache without a network call.
    pub from_cache: bool,
    /// Network attempts spent on this answer.
    pub attempts: u32,
    #[serde(flatten)]
    pub outcome: DetailOutcome,
}

impl DetailEvent {
    pub fn is_ready(&self) -> bool {
        matches!(self.outcome, DetailOutcome::Ready { .. })
    }

    pub fn detail(&self) -> Option<&Value> {
        match &self.outcome {
            DetailOutcome::Ready { detail } => Some(detail),
            DetailOutcome::Failed { .. } => None,
        }
    }

    pub fn to_ndjson_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            json!({ "itemId": self.item_id, "status": "failed", "error": e.to_string() }).to_string()
        });
        line.push('\n');
        line
    }
}

/// What to show when a target could not be enriched: formatted coordinates
/// for places, an empty detail otherwise.
pub fn fallback_detail(target: &DetailTarget) -> Value {
    match target {
        DetailTarget::Place { lat, lng } => json!({
            "displayName": format_coordinates(*lat, *lng),
        }),
        DetailTarget::Resource { .. } => json!({
            "items": [],
            "media": [],
            "species": [],
        }),
    }
}

/// `12.3457°N, 45.6789°W` style, four decimals.
pub fn format_coordinates(lat: f64, lng: f64) -> String {
    let ns = if lat < 0.0 { 'S' } else { 'N' };
    let ew = if lng < 0.0 { 'W' } else { 'E' };
    format!("{:.4}°{ns}, {:.4}°{ew}", lat.abs(), lng.abs())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{DetailEvent, DetailOutcome, fallback_detail, format_coordinates};
    use crate::DetailTarget;

    #[test]
    fn coordinates_carry_hemispheres() {
        assert_eq!(format_coordinates(12.34567, -45.6789), "12.3457°N, 45.6789°W");
        assert_eq!(format_coordinates(-0.5, 0.0), "0.5000°S, 0.0000°E");
    }

    #[test]
    fn fallback_depends_on_target() {
        let place = fallback_detail(&DetailTarget::Place { lat: 1.0, lng: 2.0 });
        assert_eq!(place["displayName"], "1.0000°N, 2.0000°E");
        let res = fallback_detail(&DetailTarget::Resource {
            url: "https://example.com".into(),
        });
        assert_eq!(res["items"], json!([]));
    }

    #[test]
    fn events_serialize_as_single_lines() {
        let event = DetailEvent {
            item_id: "7".into(),
            cache_key: "https://example.com/7".into(),
            from_cache: false,
            attempts: 1,
            outcome: DetailOutcome::Ready {
                detail: json!({"name": "a\nb"}),
            },
        };
        let line = event.to_ndjson_line();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let back: DetailEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(back, event);
        assert_eq!(
            serde_json::to_value(&event).unwrap()["status"],
            json!("ready")
        );
    }
}
