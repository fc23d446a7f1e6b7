//! CS-002: Error taxonomy.
//!
//! Requirement-level outcomes (not found, ambiguous, already applied) are
//! never errors; they are reported as `unimplemented`. What lives here are
//! failures that abort a consequence computation or a whole run.

/// Failure raised by a source tree collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The file cannot be parsed at all
    #[error("cannot parse {path}: {message}")]
    Parse { path: String, message: String },

    /// A node was matched against content that has since changed
    #[error("stale node in {path} at {start}..{end}: file changed since it was matched")]
    StaleNode {
        path: String,
        start: usize,
        end: usize,
    },

    /// Two staged edits touch the same region
    #[error("overlapping edits staged in {0}")]
    OverlappingEdit(String),

    /// Whole-file write attempted while edits are staged
    #[error("{0} has staged edits that were not flushed")]
    PendingEdits(String),

    /// Invalid glob pattern
    #[error("invalid glob {pattern}: {message}")]
    Glob { pattern: String, message: String },

    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of the consequence engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Structural failure from the source tree
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// A migration artifact could not be turned back into a requirement
    #[error("cannot deserialize requirement from {origin}: {message}")]
    Deserialization { origin: String, message: String },

    /// A requirement could not be written out
    #[error("cannot serialize requirement: {0}")]
    Serialization(String),

    /// Package manifest missing fields or not JSON
    #[error("invalid manifest {path}: {message}")]
    Manifest { path: String, message: String },

    /// Between-changesets hook failed
    #[error("changeset hook failed: {0}")]
    Hook(String),
}
