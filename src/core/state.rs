//! Governance state document: the root aggregate persisted by the state store.
//!
//! The document is replaced as a whole on every save. Maps are `BTreeMap`s so
//! that serialisation is byte-stable and `save(load())` only moves
//! `updated_at`.

use crate::core::error::GantryError;
use crate::plugins::graph::DependencyMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Schema version this build reads and writes.
pub const STATE_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PacketStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl PacketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacketStatus::Pending => "pending",
            PacketStatus::InProgress => "in_progress",
            PacketStatus::Done => "done",
            PacketStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PacketStatus::Done | PacketStatus::Failed)
    }
}

impl fmt::Display for PacketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as callers see it: `Blocked` is derived, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    Pending,
    Blocked,
    InProgress,
    Done,
    Failed,
}

impl DerivedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DerivedStatus::Pending => "pending",
            DerivedStatus::Blocked => "blocked",
            DerivedStatus::InProgress => "in_progress",
            DerivedStatus::Done => "done",
            DerivedStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkPacket {
    pub status: PacketStatus,
    pub assigned_to: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub area_id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl WorkPacket {
    pub fn pending(area_id: &str, dependencies: Vec<String>) -> Self {
        Self {
            status: PacketStatus::Pending,
            assigned_to: None,
            started_at: None,
            completed_at: None,
            notes: None,
            area_id: area_id.to_string(),
            dependencies,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AreaCloseout {
    pub closed_by: String,
    pub assessment_path: String,
    pub notes: Option<String>,
    pub closed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_title: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogIntegrityMode {
    #[default]
    Plain,
    HashChain,
}

impl LogIntegrityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogIntegrityMode::Plain => "plain",
            LogIntegrityMode::HashChain => "hash_chain",
        }
    }
}

impl FromStr for LogIntegrityMode {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "plain" => Ok(LogIntegrityMode::Plain),
            "hash_chain" | "hashchain" => Ok(LogIntegrityMode::HashChain),
            other => Err(GantryError::ValidationError(format!(
                "unknown log integrity mode '{}': expected plain or hash-chain",
                other
            ))),
        }
    }
}

impl fmt::Display for LogIntegrityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Claim,
    Done,
    Note,
    Fail,
    Reset,
    Closeout,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Claim => "claim",
            AuditEvent::Done => "done",
            AuditEvent::Note => "note",
            AuditEvent::Fail => "fail",
            AuditEvent::Reset => "reset",
            AuditEvent::Closeout => "closeout",
        }
    }
}

impl FromStr for AuditEvent {
    type Err = GantryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claim" => Ok(AuditEvent::Claim),
            "done" => Ok(AuditEvent::Done),
            "note" => Ok(AuditEvent::Note),
            "fail" => Ok(AuditEvent::Fail),
            "reset" => Ok(AuditEvent::Reset),
            "closeout" => Ok(AuditEvent::Closeout),
            other => Err(GantryError::ValidationError(format!(
                "unknown audit event '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event. Chain fields are only present in hash-chain mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub packet_id: String,
    pub event: AuditEvent,
    pub agent: Option<String>,
    pub timestamp: String,
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Fields written by other tooling are carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl AuditEntry {
    pub fn new(
        packet_id: &str,
        event: AuditEvent,
        agent: Option<&str>,
        timestamp: String,
        notes: Option<&str>,
    ) -> Self {
        Self {
            packet_id: packet_id.to_string(),
            event,
            agent: agent.map(str::to_string),
            timestamp,
            notes: notes.map(str::to_string),
            event_id: None,
            hash_index: None,
            prev_hash: None,
            hash: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GovernanceState {
    pub version: String,
    pub created_at: String,
    pub updated_at: String,
    pub packets: BTreeMap<String, WorkPacket>,
    pub log: Vec<AuditEntry>,
    pub area_closeouts: BTreeMap<String, AreaCloseout>,
    #[serde(default)]
    pub log_integrity_mode: LogIntegrityMode,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl GovernanceState {
    pub fn new(now: &str, mode: LogIntegrityMode) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            created_at: now.to_string(),
            updated_at: now.to_string(),
            packets: BTreeMap::new(),
            log: Vec::new(),
            area_closeouts: BTreeMap::new(),
            log_integrity_mode: mode,
            extra: BTreeMap::new(),
        }
    }

    /// Every dependency must name a packet in this document.
    pub fn validate_references(&self) -> Result<(), GantryError> {
        let mut dangling = Vec::new();
        for (id, packet) in &self.packets {
            for dep in &packet.dependencies {
                if !self.packets.contains_key(dep) {
                    dangling.push(format!("{} -> {}", id, dep));
                }
            }
        }
        if dangling.is_empty() {
            Ok(())
        } else {
            Err(GantryError::ValidationError(format!(
                "dangling dependency references: {}",
                dangling.join(", ")
            )))
        }
    }

    pub fn dependency_map(&self) -> DependencyMap {
        self.packets
            .iter()
            .map(|(id, p)| (id.clone(), p.dependencies.clone()))
            .collect()
    }

    /// First dependency of `packet_id` that is not `done`, if any.
    pub fn first_blocker(&self, packet_id: &str) -> Option<&str> {
        let packet = self.packets.get(packet_id)?;
        packet
            .dependencies
            .iter()
            .find(|dep| {
                self.packets
                    .get(dep.as_str())
                    .is_none_or(|d| d.status != PacketStatus::Done)
            })
            .map(String::as_str)
    }

    pub fn derived_status(&self, packet_id: &str) -> Option<DerivedStatus> {
        let packet = self.packets.get(packet_id)?;
        Some(match packet.status {
            PacketStatus::Pending if self.first_blocker(packet_id).is_some() => {
                DerivedStatus::Blocked
            }
            PacketStatus::Pending => DerivedStatus::Pending,
            PacketStatus::InProgress => DerivedStatus::InProgress,
            PacketStatus::Done => DerivedStatus::Done,
            PacketStatus::Failed => DerivedStatus::Failed,
        })
    }

    pub fn counts(&self) -> BTreeMap<DerivedStatus, usize> {
        let mut counts = BTreeMap::new();
        for id in self.packets.keys() {
            if let Some(status) = self.derived_status(id) {
                *counts.entry(status).or_insert(0) += 1;
            }
        }
        counts
    }
}
