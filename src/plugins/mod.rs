//! Pure subsystems consulted by the engine: dependency graph analysis,
//! supervisor policy, and the audit trail.

pub mod audit;
pub mod graph;
pub mod policy;
