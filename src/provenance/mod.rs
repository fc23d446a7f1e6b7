//! Provenance: run journal and structural fingerprints.

pub mod eventlog;
pub mod hasher;
