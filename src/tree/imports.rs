//! CS-013: TypeScript import management.

use super::{MatchedNode, NodeKind, PathExpression, SourceTree};
use crate::core::error::TreeError;
use crate::core::types::ImportIdentifier;

/// [`super::ImportManager`] for ES module `import { X } from "..."` syntax.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeScriptImports;

/// Module specifier `file_path` must import `import` from, or `None` when
/// no import is needed.
pub fn specifier(file_path: &str, import: &ImportIdentifier) -> Option<String> {
    match import {
        ImportIdentifier::BuiltIn { .. } => None,
        ImportIdentifier::Library { library, .. } => Some(library.clone()),
        ImportIdentifier::Local { local_path, .. } if local_path == file_path => None,
        ImportIdentifier::Local { local_path, .. } => Some(relative_specifier(file_path, local_path)),
    }
}

fn relative_specifier(from_file: &str, target: &str) -> String {
    let target = target
        .strip_suffix(".ts")
        .or_else(|| target.strip_suffix(".tsx"))
        .unwrap_or(target);
    let from_dir: Vec<&str> = from_file.split('/').collect();
    let from_dir = &from_dir[..from_dir.len().saturating_sub(1)];
    let target: Vec<&str> = target.split('/').collect();

    let common = from_dir
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count()
        .min(target.len().saturating_sub(1));
    let ups = from_dir.len() - common;
    let rest = target[common..].join("/");
    if ups == 0 {
        format!("./{}", rest)
    } else {
        format!("{}{}", "../".repeat(ups), rest)
    }
}

fn extend_names(names: &str, name: &str) -> String {
    let trimmed = names.trim().trim_end_matches(',').trim_end();
    if trimmed.is_empty() {
        format!(" {} ", name)
    } else {
        format!(" {}, {} ", trimmed, name)
    }
}

#[async_trait::async_trait]
impl super::ImportManager for TypeScriptImports {
    async fn add_import(
        &self,
        tree: &mut dyn SourceTree,
        file_path: &str,
        import: &ImportIdentifier,
    ) -> Result<bool, TreeError> {
        let Some(location) = specifier(file_path, import) else {
            return Ok(false);
        };
        let glob = glob::Pattern::escape(file_path);
        let existing = tree
            .find_matches(
                &glob,
                &PathExpression::ImportFrom {
                    location: location.clone(),
                },
            )
            .await?;

        let already = existing.iter().any(|node| {
            matches!(&node.kind, NodeKind::Import { names, .. } if names.iter().any(|n| n == import.name()))
        });
        if already {
            return Ok(false);
        }

        if let Some(node) = existing.first() {
            let extended = extend_names(&node.value, import.name());
            tree.stage(node, extended)?;
            tracing::debug!(file = file_path, name = import.name(), %location, "extended import");
            return Ok(true);
        }

        let head: Vec<MatchedNode> = tree.find_matches(&glob, &PathExpression::FileHead).await?;
        let Some(head) = head.first() else {
            return Ok(false);
        };
        tree.stage(
            head,
            format!("import {{ {} }} from \"{}\";\n", import.name(), location),
        )?;
        tracing::debug!(file = file_path, name = import.name(), %location, "added import");
        Ok(true)
    }
}
