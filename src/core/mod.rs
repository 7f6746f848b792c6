//! Core modules for Gantry's governance runtime.
//!
//! State model, storage, the write broker, and the lifecycle engine live
//! here. Pure analysis and policy helpers live under [`crate::plugins`].

pub mod broker;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod migration;
pub mod output;
pub mod state;
pub mod store;
pub mod time;
