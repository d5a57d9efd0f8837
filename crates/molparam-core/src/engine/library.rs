use super::TopologyResolver;
use super::error::EngineError;
use crate::core::models::topology::Topology;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Topologies keyed by identifier, loaded from a TOML table of `[identifier]` sections.
#[derive(Debug, Clone, Default)]
pub struct TopologyLibrary {
    topologies: HashMap<String, Topology>,
}

impl TopologyLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, EngineError> {
        let topologies: HashMap<String, Topology> =
            toml::from_str(content).map_err(|e| EngineError::Toml {
                path: origin.to_string(),
                source: e,
            })?;
        debug!(origin, entries = topologies.len(), "Loaded topology library");
        Ok(Self { topologies })
    }

    pub fn insert(&mut self, identifier: impl Into<String>, topology: Topology) {
        self.topologies.insert(identifier.into(), topology);
    }

    pub fn get(&self, identifier: &str) -> Option<&Topology> {
        self.topologies.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.topologies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topologies.is_empty()
    }
}

impl TopologyResolver for TopologyLibrary {
    fn resolve(&self, identifier: &str) -> Result<Topology, EngineError> {
        self.get(identifier)
            .cloned()
            .ok_or_else(|| EngineError::UnresolvedIdentifier {
                identifier: identifier.to_string(),
            })
    }
}
