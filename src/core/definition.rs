//! Work breakdown definition: areas, packets, and dependency edges.
//!
//! Supplied once at initialisation and read-mostly afterwards; the engine
//! never mutates it.

use crate::core::error::GantryError;
use crate::plugins::graph::{self, DependencyMap};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkArea {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PacketDefinition {
    pub id: String,
    #[serde(default)]
    pub wbs_ref: String,
    pub area_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Definition {
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub work_areas: Vec<WorkArea>,
    #[serde(default)]
    pub packets: Vec<PacketDefinition>,
    #[serde(default)]
    pub dependencies: DependencyMap,
}

impl Definition {
    pub fn from_json(raw: &str) -> Result<Self, GantryError> {
        let def: Definition = serde_json::from_str(raw)
            .map_err(|e| GantryError::ValidationError(format!("invalid definition: {}", e)))?;
        def.validate()?;
        Ok(def)
    }

    pub fn load(path: &Path) -> Result<Self, GantryError> {
        if !path.exists() {
            return Err(GantryError::NotFound(format!(
                "definition not found at {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(path).map_err(GantryError::IoError)?;
        Self::from_json(&raw)
    }

    /// Check identity, references, and acyclicity.
    pub fn validate(&self) -> Result<(), GantryError> {
        let mut area_ids = HashSet::new();
        for area in &self.work_areas {
            if area.id.trim().is_empty() {
                return Err(GantryError::ValidationError(
                    "work area id cannot be empty".to_string(),
                ));
            }
            if !area_ids.insert(area.id.as_str()) {
                return Err(GantryError::ValidationError(format!(
                    "duplicate work area id '{}'",
                    area.id
                )));
            }
        }

        let mut packet_ids = HashSet::new();
        for packet in &self.packets {
            validate_packet_id(&packet.id)?;
            if !packet_ids.insert(packet.id.as_str()) {
                return Err(GantryError::ValidationError(format!(
                    "duplicate packet id '{}'",
                    packet.id
                )));
            }
            if !area_ids.contains(packet.area_id.as_str()) {
                return Err(GantryError::ValidationError(format!(
                    "packet '{}' references unknown work area '{}'",
                    packet.id, packet.area_id
                )));
            }
        }

        for (id, deps) in &self.dependencies {
            for endpoint in std::iter::once(id).chain(deps.iter()) {
                if !packet_ids.contains(endpoint.as_str()) {
                    return Err(GantryError::ValidationError(format!(
                        "dependency edge references unknown packet '{}'",
                        endpoint
                    )));
                }
            }
        }

        if let Some(cycle) = graph::detect_cycle(&self.dependencies) {
            return Err(GantryError::CyclicDependency { cycle });
        }
        Ok(())
    }

    pub fn area(&self, area_id: &str) -> Option<&WorkArea> {
        self.work_areas.iter().find(|a| a.id == area_id)
    }

    /// Resolve caller input to a known area id; `"1"` falls back to `"1.0"`.
    pub fn resolve_area_id(&self, raw: &str) -> Option<String> {
        let token = raw.trim();
        if self.area(token).is_some() {
            return Some(token.to_string());
        }
        if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            let dotted = format!("{}.0", token);
            if self.area(&dotted).is_some() {
                return Some(dotted);
            }
        }
        None
    }

    pub fn packets_in_area<'a>(&'a self, area_id: &'a str) -> impl Iterator<Item = &'a PacketDefinition> + 'a {
        self.packets.iter().filter(move |p| p.area_id == area_id)
    }

    /// Direct prerequisites of a packet, deduplicated in declaration order.
    pub fn dependencies_of(&self, packet_id: &str) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        self.dependencies
            .get(packet_id)
            .into_iter()
            .flatten()
            .filter(|d| seen.insert(d.to_string()))
            .cloned()
            .collect()
    }
}

pub fn validate_packet_id(packet_id: &str) -> Result<(), GantryError> {
    if packet_id.is_empty() {
        return Err(GantryError::ValidationError(
            "packet id cannot be empty".to_string(),
        ));
    }
    if packet_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        Ok(())
    } else {
        Err(GantryError::ValidationError(format!(
            "invalid packet id '{}': allowed characters are [A-Za-z0-9_.-]",
            packet_id
        )))
    }
}
