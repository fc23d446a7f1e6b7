//! Core engine: requirement model, consequence resolution, planning, execution.

pub mod changelog;
pub mod consequences;
pub mod context;
pub mod error;
pub mod executor;
pub mod migration;
pub mod parser;
pub mod planner;
pub mod requirement;
pub mod resolver;
pub mod types;
