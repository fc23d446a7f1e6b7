//! Cascade: propagate signature changes through a TypeScript codebase.
//!
//! A requirement such as "add parameter `context` to `f`" is resolved into
//! everything it implies: callers that must pass the value, callers that
//! must gain the parameter first, test call sites, and a migration artifact
//! that downstream codebases replay against their own sources.

pub mod cli;
pub mod core;
pub mod provenance;
pub mod tree;
