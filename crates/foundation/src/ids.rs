use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upstream observation sources.
///
/// The set is fixed; declaration order is the display priority used when a
/// tile has members from several sources (earlier wins).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Records submitted directly to the platform.
    Platform,
    INaturalist,
    Gbif,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::Platform, SourceId::INaturalist, SourceId::Gbif];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Platform => "platform",
            SourceId::INaturalist => "inaturalist",
            SourceId::Gbif => "gbif",
        }
    }

    /// Smaller values are more authoritative for display.
    pub fn display_rank(&self) -> u8 {
        match self {
            SourceId::Platform => 0,
            SourceId::INaturalist => 1,
            SourceId::Gbif => 2,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSource(pub String);

impl fmt::Display for UnknownSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown observation source: {}", self.0)
    }
}

impl std::error::Error for UnknownSource {}

impl FromStr for SourceId {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "platform" => Ok(SourceId::Platform),
            "inaturalist" => Ok(SourceId::INaturalist),
            "gbif" => Ok(SourceId::Gbif),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

/// Identifier of an observation within its source.
///
/// Upstreams send numeric or string ids; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ObservationId(pub String);

impl ObservationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObservationId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(i64),
            Uint(u64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => ObservationId(s),
            Raw::Int(n) => ObservationId(n.to_string()),
            Raw::Uint(n) => ObservationId(n.to_string()),
        })
    }
}

/// `source:id`, the identity of an observation across paginated fetches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DedupKey {
    pub source: SourceId,
    pub id: ObservationId,
}

impl DedupKey {
    pub fn new(source: SourceId, id: ObservationId) -> Self {
        Self { source, id }
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

impl FromStr for DedupKey {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, id) = s
            .split_once(':')
            .ok_or_else(|| UnknownSource(s.to_string()))?;
        Ok(Self::new(source.parse()?, ObservationId::new(id)))
    }
}

impl Serialize for DedupKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DedupKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
