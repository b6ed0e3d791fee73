//! Registry configuration.
//!
//! Growth values are the chunk size each backing table is extended by once it
//! is full; they trade memory slack against reallocation frequency.

use serde::{Deserialize, Serialize};

use crate::EcsError;

/// Tuning knobs for a [`Registry`](crate::registry::Registry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Entity slots (and pool sparse-map entries) added per growth step.
    /// Default: 1024.
    pub entity_grow: u32,

    /// Elements added to a component pool per growth step. Default: 128.
    pub component_grow: u32,

    /// Range slots added to a pool's range table per growth step. Default: 32.
    pub range_grow: u32,

    /// Node storage of a hierarchy store is rounded up to a multiple of this.
    /// Default: 16.
    pub hierarchy_grow: u32,

    /// Upper bound on simultaneously allocated entity slots. Default: 2^20.
    pub max_entities: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            entity_grow: 1024,
            component_grow: 128,
            range_grow: 32,
            hierarchy_grow: 16,
            max_entities: 1 << 20,
        }
    }
}

impl RegistryConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, EcsError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EcsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, EcsError> {
        serde_json::to_string_pretty(self).map_err(|e| EcsError::Config(e.to_string()))
    }

    /// Reject values the registry cannot work with.
    pub fn validate(&self) -> Result<(), EcsError> {
        let fields = [
            ("entity_grow", self.entity_grow),
            ("component_grow", self.component_grow),
            ("range_grow", self.range_grow),
            ("hierarchy_grow", self.hierarchy_grow),
            ("max_entities", self.max_entities),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(EcsError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.max_entities == u32::MAX {
            // u32::MAX marks an absent sparse entry.
            return Err(EcsError::Config(
                "max_entities must be below 4294967295".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Round `count` up to the next multiple of `chunk`.
#[inline]
pub(crate) fn round_up(count: usize, chunk: u32) -> usize {
    let chunk = chunk.max(1) as usize;
    count.div_ceil(chunk) * chunk
}
