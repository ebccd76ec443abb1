//! CFO Command Pipeline
//!
//! A command room core for a small finance operation:
//! - Turns free-form operator commands into reviewable multi-step plans
//! - Gates execution behind Manager/CFO approval by monetary threshold
//! - Applies approved plans to the books exactly once
//! - Records every state change in an append-only audit trail
//!
//! UNIFIED FLOW:
//! COMMAND → INTENT → PLAN → APPROVE? → EXECUTE → AUDIT

pub mod api;
pub mod approval;
pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod intent;
pub mod models;
pub mod pipeline;
pub mod planner;
pub mod store;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::{CommandOutcome, CommandPipeline};
