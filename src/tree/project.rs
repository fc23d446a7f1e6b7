//! CS-012: `Project`, the concrete source tree.
//!
//! Files live in an ordered map keyed by `/`-separated relative path. Node
//! edits are staged per file and only become visible on `flush`, which
//! applies them back-to-front and, for directory-backed projects, writes the
//! changed files to disk.

use super::typescript::{self, Outline};
use super::{split_top_level, MatchedNode, NodeKind, Parameter, PathExpression, SourceTree};
use crate::core::error::TreeError;
use crate::core::types::{EnclosingScope, FunctionCallIdentifier};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Directories never loaded from disk.
pub const DEFAULT_SKIP: &[&str] = &["node_modules", ".git", "target"];

#[derive(Debug, Clone)]
struct StagedEdit {
    span: Range<usize>,
    value: String,
}

/// A codebase held in memory, optionally backed by a directory.
#[derive(Debug, Default)]
pub struct Project {
    root: Option<PathBuf>,
    files: BTreeMap<String, String>,
    staged: BTreeMap<String, Vec<StagedEdit>>,
    dirty: BTreeSet<String>,
}

impl Project {
    /// Project that never touches the filesystem.
    pub fn in_memory<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: files
                .into_iter()
                .map(|(p, c)| (p.into(), c.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// Load every UTF-8 file under `root`, skipping directories named in
    /// [`DEFAULT_SKIP`] or `skip`.
    pub async fn open(root: &Path, skip: &[&str]) -> Result<Self, TreeError> {
        let mut files = BTreeMap::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| io(&dir, e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| io(&dir, e))? {
                let path = entry.path();
                let file_type = entry.file_type().await.map_err(|e| io(&path, e))?;
                let name = entry.file_name().to_string_lossy().to_string();
                if file_type.is_dir() {
                    if !DEFAULT_SKIP.contains(&name.as_str()) && !skip.contains(&name.as_str()) {
                        pending.push(path);
                    }
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let bytes = tokio::fs::read(&path).await.map_err(|e| io(&path, e))?;
                let Ok(text) = String::from_utf8(bytes) else {
                    continue;
                };
                files.insert(relative(root, &path), text);
            }
        }

        tracing::debug!(root = %root.display(), files = files.len(), "loaded project");
        Ok(Self {
            root: Some(root.to_path_buf()),
            files,
            ..Self::default()
        })
    }

    /// Flushed content of `path`.
    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn has_pending_edits(&self) -> bool {
        self.staged.values().any(|edits| !edits.is_empty())
    }

    fn outline(&self, path: &str) -> Result<Option<Outline>, TreeError> {
        let Some(content) = self.files.get(path) else {
            return Ok(None);
        };
        typescript::scan(content)
            .map(Some)
            .map_err(|message| TreeError::Parse {
                path: path.to_string(),
                message,
            })
    }

    fn matching_paths(&self, glob: &str) -> Result<Vec<&String>, TreeError> {
        let pattern = glob::Pattern::new(glob).map_err(|e| TreeError::Glob {
            pattern: glob.to_string(),
            message: e.to_string(),
        })?;
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        Ok(self
            .files
            .keys()
            .filter(|p| pattern.matches_with(p, options))
            .collect())
    }

    fn resolve(
        &self,
        path: &str,
        outline: &Outline,
        expression: &PathExpression,
    ) -> Vec<MatchedNode> {
        let content = &self.files[path];
        match expression {
            PathExpression::FunctionDeclaration { name, scope } => outline
                .functions
                .iter()
                .enumerate()
                .filter(|(_, f)| &f.name == name)
                .filter(|(_, f)| {
                    match (EnclosingScope::from_frames(&f.scope), scope.as_ref()) {
                        (None, None) => true,
                        (Some(found), Some(wanted)) => found.same_scope(wanted),
                        _ => false,
                    }
                })
                .map(|(i, _)| declaration_node(path, content, outline, i))
                .collect(),
            PathExpression::CallTo { name } => outline
                .calls
                .iter()
                .filter(|c| &c.callee == name)
                .map(|c| MatchedNode {
                    file_path: path.to_string(),
                    kind: NodeKind::CallExpression {
                        callee: c.callee.clone(),
                    },
                    value: content[c.span.clone()].to_string(),
                    span: c.span.clone(),
                })
                .collect(),
            PathExpression::ImportFrom { location } => outline
                .imports
                .iter()
                .filter(|i| &i.location == location)
                .map(|i| MatchedNode {
                    file_path: path.to_string(),
                    kind: NodeKind::Import {
                        names: i.names.clone(),
                        location: i.location.clone(),
                    },
                    value: content[i.names_span.clone()].to_string(),
                    span: i.names_span.clone(),
                })
                .collect(),
            PathExpression::FileHead => vec![MatchedNode {
                file_path: path.to_string(),
                kind: NodeKind::FileHead,
                value: String::new(),
                span: 0..0,
            }],
            PathExpression::EnclosingFunction
            | PathExpression::Parameters
            | PathExpression::Arguments => Vec::new(),
        }
    }
}

fn io(path: &Path, source: std::io::Error) -> TreeError {
    TreeError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn declaration_node(path: &str, content: &str, outline: &Outline, index: usize) -> MatchedNode {
    let f = &outline.functions[index];
    MatchedNode {
        file_path: path.to_string(),
        kind: NodeKind::FunctionDeclaration(FunctionCallIdentifier {
            name: f.name.clone(),
            file_path: path.to_string(),
            enclosing_scope: EnclosingScope::from_frames(&f.scope),
            access: f.access,
        }),
        value: content[f.span.clone()].to_string(),
        span: f.span.clone(),
    }
}

/// Parse `a: A, readonly b?: B = x` into parameters.
pub fn parse_parameters(text: &str) -> Vec<Parameter> {
    split_top_level(text)
        .into_iter()
        .map(|range| {
            let segment = &text[range];
            let (head, type_text) = match top_level_colon(segment) {
                Some(colon) => {
                    let rest = &segment[colon + 1..];
                    let ty = rest.split(" = ").next().unwrap_or(rest).trim();
                    (&segment[..colon], Some(ty.to_string()))
                }
                None => (segment, None),
            };
            let mut name = head.split('=').next().unwrap_or(head).trim();
            for modifier in ["public ", "private ", "protected ", "readonly ", "..."] {
                name = name.trim_start_matches(modifier).trim_start();
            }
            Parameter {
                name: name.trim_end_matches('?').trim().to_string(),
                type_text,
            }
        })
        .collect()
}

fn top_level_colon(segment: &str) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in segment.char_indices() {
        match c {
            '{' | '[' | '(' => depth += 1,
            '}' | ']' | ')' => depth -= 1,
            ':' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    (a.start < b.end && b.start < a.end) || (a.is_empty() && b.is_empty() && a.start == b.start)
}

#[async_trait::async_trait]
impl SourceTree for Project {
    async fn find_matches(
        &self,
        glob: &str,
        expression: &PathExpression,
    ) -> Result<Vec<MatchedNode>, TreeError> {
        let mut matches = Vec::new();
        for path in self.matching_paths(glob)? {
            if !path.ends_with(".ts") {
                continue;
            }
            if let Some(outline) = self.outline(path)? {
                matches.extend(self.resolve(path, &outline, expression));
            }
        }
        Ok(matches)
    }

    async fn evaluate(
        &self,
        node: &MatchedNode,
        expression: &PathExpression,
    ) -> Result<Vec<MatchedNode>, TreeError> {
        let Some(outline) = self.outline(&node.file_path)? else {
            return Ok(Vec::new());
        };
        let content = &self.files[&node.file_path];
        let path = node.file_path.as_str();

        let found = match (&node.kind, expression) {
            (NodeKind::CallExpression { .. }, PathExpression::EnclosingFunction) => outline
                .calls
                .iter()
                .find(|c| c.span == node.span)
                .and_then(|c| c.enclosing)
                .map(|i| declaration_node(path, content, &outline, i)),
            (NodeKind::CallExpression { .. }, PathExpression::Arguments) => outline
                .calls
                .iter()
                .find(|c| c.span == node.span)
                .map(|c| {
                    let text = &content[c.args.clone()];
                    MatchedNode {
                        file_path: path.to_string(),
                        kind: NodeKind::ArgumentList(
                            split_top_level(text)
                                .into_iter()
                                .map(|r| text[r].to_string())
                                .collect(),
                        ),
                        value: text.to_string(),
                        span: c.args.clone(),
                    }
                }),
            (NodeKind::FunctionDeclaration(_), PathExpression::Parameters) => outline
                .functions
                .iter()
                .find(|f| f.span == node.span)
                .map(|f| {
                    let text = &content[f.params.clone()];
                    MatchedNode {
                        file_path: path.to_string(),
                        kind: NodeKind::ParameterList(parse_parameters(text)),
                        value: text.to_string(),
                        span: f.params.clone(),
                    }
                }),
            (NodeKind::FunctionDeclaration(_), PathExpression::CallTo { name }) => {
                let owner = outline.functions.iter().position(|f| f.span == node.span);
                let calls: Vec<_> = outline
                    .calls
                    .iter()
                    .filter(|c| &c.callee == name && owner.is_some() && c.enclosing == owner)
                    .map(|c| MatchedNode {
                        file_path: path.to_string(),
                        kind: NodeKind::CallExpression {
                            callee: c.callee.clone(),
                        },
                        value: content[c.span.clone()].to_string(),
                        span: c.span.clone(),
                    })
                    .collect();
                return Ok(calls);
            }
            (_, PathExpression::FileHead) => Some(MatchedNode {
                file_path: path.to_string(),
                kind: NodeKind::FileHead,
                value: String::new(),
                span: 0..0,
            }),
            _ => None,
        };
        Ok(found.into_iter().collect())
    }

    fn stage(&mut self, node: &MatchedNode, value: String) -> Result<(), TreeError> {
        let stale = || TreeError::StaleNode {
            path: node.file_path.clone(),
            start: node.span.start,
            end: node.span.end,
        };
        let content = self.files.get(&node.file_path).ok_or_else(stale)?;
        if content.get(node.span.clone()) != Some(node.value.as_str()) {
            return Err(stale());
        }
        let edits = self.staged.entry(node.file_path.clone()).or_default();
        if edits.iter().any(|e| overlaps(&e.span, &node.span)) {
            return Err(TreeError::OverlappingEdit(node.file_path.clone()));
        }
        edits.push(StagedEdit {
            span: node.span.clone(),
            value,
        });
        Ok(())
    }

    fn discard(&mut self) {
        self.staged.clear();
    }

    fn has_staged_edits(&self, path: &str) -> bool {
        self.staged.get(path).is_some_and(|e| !e.is_empty())
    }

    async fn flush(&mut self) -> Result<(), TreeError> {
        for (path, mut edits) in std::mem::take(&mut self.staged) {
            if edits.is_empty() {
                continue;
            }
            let Some(content) = self.files.get_mut(&path) else {
                continue;
            };
            edits.sort_by_key(|e| std::cmp::Reverse(e.span.start));
            for edit in edits {
                content.replace_range(edit.span, &edit.value);
            }
            self.dirty.insert(path);
        }

        if let Some(root) = &self.root {
            for path in &self.dirty {
                let target = root.join(path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| io(parent, e))?;
                }
                tokio::fs::write(&target, &self.files[path])
                    .await
                    .map_err(|e| io(&target, e))?;
                tracing::debug!(file = %path, "flushed");
            }
        }
        self.dirty.clear();
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, TreeError> {
        Ok(self.files.get(path).cloned())
    }

    async fn write_file(&mut self, path: &str, content: String) -> Result<(), TreeError> {
        if self.has_staged_edits(path) {
            return Err(TreeError::PendingEdits(path.to_string()));
        }
        if self.files.get(path) != Some(&content) {
            self.files.insert(path.to_string(), content);
            self.dirty.insert(path.to_string());
        }
        Ok(())
    }

    async fn paths(&self, glob: &str) -> Result<Vec<String>, TreeError> {
        Ok(self.matching_paths(glob)?.into_iter().cloned().collect())
    }
}
