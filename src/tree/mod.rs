//! CS-010: Source tree collaborators for structural matching and imports.
//!
//! The engine never parses text. It asks a [`SourceTree`] to resolve path
//! expressions into matched nodes, stages replacements of a node's text, and
//! flushes staged edits before the next requirement runs.

pub mod imports;
pub mod project;
pub mod typescript;

use crate::core::error::TreeError;
use crate::core::types::{EnclosingScope, FunctionCallIdentifier, ImportIdentifier};
use std::ops::Range;

/// A structural query against parsed source files.
#[derive(Debug, Clone, PartialEq)]
pub enum PathExpression {
    /// Declarations of `name` directly inside `scope` (`None` = top level).
    FunctionDeclaration {
        name: String,
        scope: Option<EnclosingScope>,
    },
    /// Calls whose callee's last identifier is `name`. Evaluated against a
    /// declaration, only calls made directly in its body.
    CallTo { name: String },
    /// Relative to a call: the innermost function around it.
    EnclosingFunction,
    /// Relative to a declaration: its parameter list.
    Parameters,
    /// Relative to a call: its argument list.
    Arguments,
    /// Named imports from `location`.
    ImportFrom { location: String },
    /// Empty node at the start of the file, for insertions.
    FileHead,
}

/// One parameter of a parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_text: Option<String>,
}

/// What a matched node is.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    FunctionDeclaration(FunctionCallIdentifier),
    CallExpression { callee: String },
    ParameterList(Vec<Parameter>),
    ArgumentList(Vec<String>),
    Import { names: Vec<String>, location: String },
    FileHead,
}

/// A located match. `value` is the node's current text; staging a new value
/// replaces exactly `span` in `file_path`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedNode {
    pub file_path: String,
    pub kind: NodeKind,
    pub value: String,
    pub span: Range<usize>,
}

/// Queryable, mutable representation of a codebase.
#[async_trait::async_trait]
pub trait SourceTree: Send + Sync {
    /// Resolve `expression` in every file matching `glob`.
    async fn find_matches(
        &self,
        glob: &str,
        expression: &PathExpression,
    ) -> Result<Vec<MatchedNode>, TreeError>;

    /// Resolve a relative `expression` against a previously matched node.
    async fn evaluate(
        &self,
        node: &MatchedNode,
        expression: &PathExpression,
    ) -> Result<Vec<MatchedNode>, TreeError>;

    /// Stage replacing the node's text with `value`.
    fn stage(&mut self, node: &MatchedNode, value: String) -> Result<(), TreeError>;

    /// Drop all staged edits.
    fn discard(&mut self);

    /// True while `path` has staged edits; [`SourceTree::write_file`] on it fails.
    fn has_staged_edits(&self, path: &str) -> bool;

    /// Apply and persist staged edits and written files.
    async fn flush(&mut self) -> Result<(), TreeError>;

    /// Current (flushed) content of a file.
    async fn read_file(&self, path: &str) -> Result<Option<String>, TreeError>;

    /// Replace a whole file; persisted on the next flush.
    async fn write_file(&mut self, path: &str, content: String) -> Result<(), TreeError>;

    /// Paths of files matching `glob`, sorted.
    async fn paths(&self, glob: &str) -> Result<Vec<String>, TreeError>;
}

/// Adds imports to source files.
#[async_trait::async_trait]
pub trait ImportManager: Send + Sync {
    /// Stage an import of `import` into `file_path`. Returns true iff a new
    /// import statement was added or an existing one was extended.
    async fn add_import(
        &self,
        tree: &mut dyn SourceTree,
        file_path: &str,
        import: &ImportIdentifier,
    ) -> Result<bool, TreeError>;
}

/// Split `text` on top-level commas, ignoring nesting and string literals.
/// Returns byte ranges of non-empty segments.
pub fn split_top_level(text: &str) -> Vec<Range<usize>> {
    let mut segments = Vec::new();
    let mut depth = 0i32;
    let mut angle = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    let mut prev = '\0';

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            prev = c;
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '<' => angle += 1,
            '>' if prev != '=' && angle > 0 => angle -= 1,
            ',' if depth == 0 && angle == 0 => {
                push_segment(text, start..i, &mut segments);
                start = i + 1;
            }
            _ => {}
        }
        prev = c;
    }
    push_segment(text, start..text.len(), &mut segments);
    segments
}

fn push_segment(text: &str, range: Range<usize>, segments: &mut Vec<Range<usize>>) {
    let slice = &text[range.clone()];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    let start = range.start + lead;
    segments.push(start..start + trimmed.len());
}

/// Prepend `item` to a comma-separated list, keeping leading whitespace.
pub fn prepend_to_list(list: &str, item: &str) -> String {
    if list.trim().is_empty() {
        return item.to_string();
    }
    let lead = list.len() - list.trim_start().len();
    format!("{}{}, {}", &list[..lead], item, &list[lead..])
}
