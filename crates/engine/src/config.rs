use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use foundation::SourceId;
use serde::{Deserialize, Serialize};
use sources::CoordinatorConfig;
use streaming::LoaderConfig;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything needed to wire an [`Explorer`](crate::Explorer) to live
/// upstreams. Every field has a default, so a partial JSON file is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    /// Paginated observation endpoint per source.
    pub endpoints: BTreeMap<SourceId, String>,
    pub geocoder_url: String,
    /// Region endpoints: tiles inside a boundary, and aggregate stats.
    pub grids_url: String,
    pub stats_url: String,
    pub coordinator: CoordinatorConfig,
    pub loader: LoaderConfig,
    /// Quiet period before a burst of viewport changes is acted on.
    pub coalesce_quiet_ms: u64,
    pub request_timeout_secs: u64,
    /// Persist the detail cache here; in memory when unset.
    pub cache_path: Option<PathBuf>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        let endpoints = BTreeMap::from([
            (SourceId::Platform, "http://localhost:8000/api/observations".to_string()),
            (SourceId::INaturalist, "https://api.inaturalist.org/v1/observations".to_string()),
            (SourceId::Gbif, "https://api.gbif.org/v1/occurrence/search".to_string()),
        ]);
        Self {
            endpoints,
            geocoder_url: "https://nominatim.openstreetmap.org/reverse".to_string(),
            grids_url: "http://localhost:8000/api/region/grids".to_string(),
            stats_url: "http://localhost:8000/api/region/stats".to_string(),
            coordinator: CoordinatorConfig::default(),
            loader: LoaderConfig::default(),
            coalesce_quiet_ms: 300,
            request_timeout_secs: 30,
            cache_path: None,
        }
    }
}

impl ExplorerConfig {
    /// Defaults, overlaid by `path` if given, overlaid by `EXPLORER_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies `EXPLORER_*` overrides read through `vars`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides(&mut self, vars: &dyn Fn(&str) -> Option<String>) {
        for source in SourceId::ALL {
            let key = format!("EXPLORER_{}_URL", source.as_str().to_ascii_uppercase());
            if let Some(url) = vars(&key) {
                self.endpoints.insert(source, url);
            }
        }
        if let Some(list) = vars("EXPLORER_SOURCES") {
            match parse_sources(&list) {
                Ok(sources) => self.coordinator.sources = sources,
                Err(e) => warn!(value = %list, error = %e, "ignoring EXPLORER_SOURCES"),
            }
        }
        if let Some(primary) = vars("EXPLORER_PRIMARY_SOURCE") {
            match primary.trim() {
                "" | "none" => self.coordinator.primary_source = None,
                other => match SourceId::from_str(other) {
                    Ok(source) => self.coordinator.primary_source = Some(source),
                    Err(e) => warn!(error = %e, "ignoring EXPLORER_PRIMARY_SOURCE"),
                },
            }
        }

        self.geocoder_url = env_var_string(vars, "EXPLORER_GEOCODER_URL", &self.geocoder_url);
        self.grids_url = env_var_string(vars, "EXPLORER_GRIDS_URL", &self.grids_url);
        self.stats_url = env_var_string(vars, "EXPLORER_STATS_URL", &self.stats_url);
        self.coordinator.page_size = env_var_u32(vars, "EXPLORER_PAGE_SIZE", self.coordinator.page_size);
        self.loader.min_spacing_ms = env_var_u64(vars, "EXPLORER_MIN_SPACING_MS", self.loader.min_spacing_ms);
        self.loader.ttl_secs = env_var_u64(vars, "EXPLORER_CACHE_TTL_SECS", self.loader.ttl_secs);
        self.loader.retry.max_retries = env_var_u32(vars, "EXPLORER_MAX_RETRIES", self.loader.retry.max_retries);
        self.loader.batch_size = env_var_usize(vars, "EXPLORER_BATCH_SIZE", self.loader.batch_size);
        self.coalesce_quiet_ms = env_var_u64(vars, "EXPLORER_COALESCE_MS", self.coalesce_quiet_ms);
        self.request_timeout_secs = env_var_u64(vars, "EXPLORER_TIMEOUT_SECS", self.request_timeout_secs);
        if let Some(path) = vars("EXPLORER_CACHE_PATH") {
            self.cache_path = (!path.is_empty()).then(|| PathBuf::from(path));
        }
    }

    pub fn coalesce_quiet(&self) -> Duration {
        Duration::from_millis(self.coalesce_quiet_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Endpoints of the sources the coordinator actually queries.
    pub fn active_endpoints(&self) -> BTreeMap<SourceId, String> {
        self.coordinator
            .sources
            .iter()
            .filter_map(|s| self.endpoints.get(s).map(|url| (*s, url.clone())))
            .collect()
    }
}

fn parse_sources(list: &str) -> Result<Vec<SourceId>, foundation::UnknownSource> {
    list.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(SourceId::from_str)
        .collect()
}

fn env_var_string(vars: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    vars(key).unwrap_or_else(|| default.to_string())
}

fn env_var_u32(vars: &dyn Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    env_var_parse(vars, key, default)
}

fn env_var_u64(vars: &dyn Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    env_var_parse(vars, key, default)
}

fn env_var_usize(vars: &dyn Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    env_var_parse(vars, key, default)
}

fn env_var_parse<T: FromStr>(vars: &dyn Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match vars(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparseable override");
            default
        }),
        None => default,
    }
}
