//! Authority policy: the approval gate consulted before every mutation.
//!
//! Supervisors are pure functions of the request and their own configuration.
//! They never read state, so the engine stays deterministic and a supervisor
//! can be tested in isolation.

use crate::core::error::{ErrorCode, GantryError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Claim,
    Done,
    Note,
    Fail,
    Reset,
    #[serde(rename = "closeout_l2")]
    CloseoutL2,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Claim,
        Action::Done,
        Action::Note,
        Action::Fail,
        Action::Reset,
        Action::CloseoutL2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Claim => "claim",
            Action::Done => "done",
            Action::Note => "note",
            Action::Fail => "fail",
            Action::Reset => "reset",
            Action::CloseoutL2 => "closeout_l2",
        }
    }

    /// Actions that must name the acting agent.
    pub fn requires_agent(&self) -> bool {
        !matches!(self, Action::Reset)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    /// Unknown actions render as an `E-002 InvalidAction` message.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| ErrorCode::InvalidAction.message(format!("unknown action '{}'", s)))
    }
}

/// Ephemeral request handed to a supervisor; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub packet_id: String,
    pub action: Action,
    pub agent: Option<String>,
    pub notes: Option<String>,
}

impl TransitionRequest {
    pub fn new(packet_id: &str, action: Action) -> Self {
        Self {
            packet_id: packet_id.to_string(),
            action,
            agent: None,
            notes: None,
        }
    }

    pub fn with_agent(mut self, agent: &str) -> Self {
        self.agent = Some(agent.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Approval {
    pub allowed: bool,
    pub reason: String,
}

impl Approval {
    pub fn approved() -> Self {
        Self {
            allowed: true,
            reason: "approved".to_string(),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

pub trait Supervisor: Send + Sync {
    fn approve(&self, req: &TransitionRequest) -> Approval;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorPolicy {
    pub require_agent_for_mutation: bool,
    pub require_notes_on_done: bool,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            require_agent_for_mutation: true,
            require_notes_on_done: true,
        }
    }
}

/// Default authority policy for packet transitions.
#[derive(Debug, Clone, Default)]
pub struct DeterministicSupervisor {
    policy: SupervisorPolicy,
}

impl DeterministicSupervisor {
    pub fn new(policy: SupervisorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SupervisorPolicy {
        &self.policy
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|v| v.trim().is_empty())
}

impl Supervisor for DeterministicSupervisor {
    fn approve(&self, req: &TransitionRequest) -> Approval {
        if self.policy.require_agent_for_mutation
            && req.action.requires_agent()
            && is_blank(req.agent.as_deref())
        {
            return Approval::denied("Supervisor denied: agent required");
        }
        if self.policy.require_notes_on_done
            && req.action == Action::Done
            && is_blank(req.notes.as_deref())
        {
            return Approval::denied("Supervisor denied: completion notes required");
        }
        Approval::approved()
    }
}

/// Multi-approver gate: every member must approve; the first denial wins.
#[derive(Default)]
pub struct UnanimousSupervisor {
    members: Vec<Box<dyn Supervisor>>,
}

impl UnanimousSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, member: impl Supervisor + 'static) -> Self {
        self.members.push(Box::new(member));
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Supervisor for UnanimousSupervisor {
    fn approve(&self, req: &TransitionRequest) -> Approval {
        self.members
            .iter()
            .map(|m| m.approve(req))
            .find(|a| !a.allowed)
            .unwrap_or_else(Approval::approved)
    }
}

/// Restricts which agents may perform which actions. Agents absent from the
/// allow-list for an action are denied; actions with no list are open.
#[derive(Debug, Clone, Default)]
pub struct ActionAllowList {
    allowed: Vec<(Action, Vec<String>)>,
}

impl ActionAllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, action: Action, agents: &[&str]) -> Self {
        self.allowed
            .push((action, agents.iter().map(|a| a.to_string()).collect()));
        self
    }
}

impl Supervisor for ActionAllowList {
    fn approve(&self, req: &TransitionRequest) -> Approval {
        let lists: Vec<&Vec<String>> = self
            .allowed
            .iter()
            .filter(|(a, _)| *a == req.action)
            .map(|(_, agents)| agents)
            .collect();
        if lists.is_empty() {
            return Approval::approved();
        }
        let agent = req.agent.as_deref().unwrap_or("");
        if lists.iter().any(|agents| agents.iter().any(|a| a == agent)) {
            Approval::approved()
        } else {
            Approval::denied(format!(
                "Supervisor denied: agent '{}' may not {}",
                agent, req.action
            ))
        }
    }
}

/// Parse an action from caller input, mapping failures onto the crate error.
pub fn parse_action(raw: &str) -> Result<Action, GantryError> {
    raw.parse::<Action>().map_err(GantryError::ValidationError)
}
