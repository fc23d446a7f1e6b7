//! Collaborators an engine run works against.

use super::types::EngineConfig;
use crate::tree::{ImportManager, SourceTree};

/// The source tree being edited, the import manager and the project's
/// configuration. One run owns the tree exclusively.
pub struct EngineContext<'a> {
    pub tree: &'a mut dyn SourceTree,
    pub imports: &'a dyn ImportManager,
    pub config: &'a EngineConfig,
}

impl<'a> EngineContext<'a> {
    pub fn new(
        tree: &'a mut dyn SourceTree,
        imports: &'a dyn ImportManager,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            tree,
            imports,
            config,
        }
    }
}
