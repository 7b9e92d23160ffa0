//! Broker configuration: worker pool sizing, dispatch cadence, algorithm
//! selection and the edge-cost knobs used by graph search.
//!
//! Configuration files are TOML (or JSON with the `json-config` feature),
//! selected by file extension.

use crate::policy::{KindPolicy, ResourceCatalog};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported config format: {file}")]
    UnsupportedFormat { file: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("algorithm override names unknown resource kind '{0}'")]
    UnknownKind(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Matchmaking
// ===========================================================================

/// Which matcher runs a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// Graph search for kinds with path constraints, proximity otherwise.
    #[default]
    Graph,
    /// Always match by straight-line proximity.
    Legacy,
}

/// Settings the producer may change at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    pub algorithm: Algorithm,
    /// Per-kind algorithm overrides, keyed by kind name.
    pub overrides: BTreeMap<String, Algorithm>,
    /// Weigh segment costs by live traffic density.
    pub congestion_aware: bool,
    /// Fraction of segments whose cost gets perturbed, in `[0, 1]`.
    pub chaos_frequency: f32,
    /// Size of the perturbation, in `[0, 1]`.
    pub chaos_amplitude: f32,
    /// Run the export pass for warehoused goods.
    pub enable_exports: bool,
    /// Upper bound on re-runs of one graph mode within a job.
    pub max_mode_passes: u32,
    /// Kind whose matches are recorded for visualization.
    pub cache_kind: Option<String>,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Graph,
            overrides: BTreeMap::new(),
            congestion_aware: false,
            chaos_frequency: 0.0,
            chaos_amplitude: 0.0,
            enable_exports: false,
            max_mode_passes: 16,
            cache_kind: None,
        }
    }
}

impl MatchmakingConfig {
    /// The algorithm that applies to the named kind.
    pub fn algorithm_for(&self, kind_name: &str) -> Algorithm {
        self.overrides
            .get(kind_name)
            .copied()
            .unwrap_or(self.algorithm)
    }

    pub fn validate(&self, catalog: &ResourceCatalog) -> Result<(), ConfigError> {
        unit_interval("chaos_frequency", self.chaos_frequency)?;
        unit_interval("chaos_amplitude", self.chaos_amplitude)?;
        if self.max_mode_passes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_mode_passes",
                reason: "must be at least 1".into(),
            });
        }
        for name in self.overrides.keys().chain(self.cache_kind.iter()) {
            if catalog.kind_by_name(name).is_none() {
                return Err(ConfigError::UnknownKind(name.clone()));
            }
        }
        Ok(())
    }
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{value} is outside [0, 1]"),
        });
    }
    Ok(())
}

// ===========================================================================
// Broker
// ===========================================================================

/// Top-level broker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Upper bound on matching threads. The pool also leaves two cores for
    /// the producer and render threads, and never drops below one worker.
    pub max_workers: usize,
    /// Dispatch new jobs every this many ticks. Results drain every tick.
    pub dispatch_interval: u32,
    pub matchmaking: MatchmakingConfig,
    /// Resource kinds. Empty means the built-in city services catalog.
    pub kinds: Vec<KindPolicy>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            dispatch_interval: 1,
            matchmaking: MatchmakingConfig::default(),
            kinds: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Load from a `.toml` (or `.json`) file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let parsed: Result<Self, String> = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| e.to_string()),
            #[cfg(feature = "json-config")]
            Some("json") => serde_json::from_str(&content).map_err(|e| e.to_string()),
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    file: path.to_path_buf(),
                });
            }
        };
        parsed.map_err(|detail| ConfigError::Parse {
            file: path.to_path_buf(),
            detail,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            file: PathBuf::from("<inline>"),
            detail: e.to_string(),
        })
    }

    /// The catalog these settings describe.
    pub fn catalog(&self) -> Result<ResourceCatalog, ConfigError> {
        if self.kinds.is_empty() {
            return Ok(ResourceCatalog::city_services());
        }
        ResourceCatalog::from_policies(self.kinds.clone()).map_err(|e| ConfigError::Invalid {
            field: "kinds",
            reason: e.to_string(),
        })
    }

    pub fn validate(&self, catalog: &ResourceCatalog) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "max_workers",
                reason: "must be at least 1".into(),
            });
        }
        if self.dispatch_interval == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch_interval",
                reason: "must be at least 1".into(),
            });
        }
        self.matchmaking.validate(catalog)
    }
}
