//! CS-006: Consequence graph resolution.
//!
//! Worklist fixpoint from a single root requirement. Concomitant changes are
//! resolved in turn and collected into `checked`; prerequisite changes are
//! only accumulated here, each becoming the root of its own resolution in
//! the planner.
//!
//! Termination relies on discovery narrowing to enclosing functions and
//! tests, so the stream of structurally distinct requirements is finite.

use super::context::EngineContext;
use super::error::EngineError;
use super::types::*;
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Expand `root` into its deduplicated concomitant set (root first, then
/// discovery order) and the prerequisites found along the way.
pub async fn resolve(
    root: &Requirement,
    ctx: &EngineContext<'_>,
) -> Result<Consequences, EngineError> {
    let mut unchecked: VecDeque<Requirement> = VecDeque::from([root.clone()]);
    let mut checked: Vec<Requirement> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut prerequisites: IndexMap<String, Requirement> = IndexMap::new();

    while let Some(requirement) = unchecked.pop_front() {
        if !seen.insert(requirement.fingerprint()) {
            debug!(requirement = %requirement.describe(), "already checked");
            continue;
        }
        let found = requirement.find_consequences(ctx).await?;
        debug!(
            requirement = %requirement.describe(),
            concomitant = found.concomitant_changes.len(),
            prerequisite = found.prerequisite_changes.len(),
            "checked"
        );
        unchecked.extend(found.concomitant_changes);
        for prerequisite in found.prerequisite_changes {
            prerequisites
                .entry(prerequisite.fingerprint())
                .or_insert(prerequisite);
        }
        checked.push(requirement);
    }

    Ok(Consequences {
        concomitant_changes: checked,
        prerequisite_changes: prerequisites.into_values().collect(),
    })
}
