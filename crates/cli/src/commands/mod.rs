//! Command handlers for the Meridian CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod approve;
pub mod build;
pub mod classify;
pub mod evaluate;
pub mod gaps;
pub mod query;
pub mod stats;

// Re-export command types for convenience
pub use approve::ApproveCommand;
pub use build::BuildCommand;
pub use classify::ClassifyCommand;
pub use evaluate::EvaluateCommand;
pub use gaps::{EmergingCommand, GapsCommand};
pub use query::QueryCommand;
pub use stats::StatsCommand;
