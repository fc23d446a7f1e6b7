//! CS-001: Requirement model types.
//!
//! Requirements are immutable value objects. Their JSON form (the `kind`
//! discriminator plus camelCase variant fields) is the persisted migration
//! artifact format, so field names here are part of the on-disk contract.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Function identification
// ============================================================================

/// Visibility of a callable, which decides where its call sites can live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessLevel {
    PublicFunction,
    PrivateFunction,
    PrivateMethod,
    PublicMethod,
}

impl AccessLevel {
    /// Public callables can be called from any file (and any downstream codebase).
    pub fn is_public(&self) -> bool {
        matches!(self, Self::PublicFunction | Self::PublicMethod)
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PublicFunction => write!(f, "public function"),
            Self::PrivateFunction => write!(f, "private function"),
            Self::PrivateMethod => write!(f, "private method"),
            Self::PublicMethod => write!(f, "public method"),
        }
    }
}

/// Kind of a scope that can enclose a function declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Class,
    Namespace,
}

/// A class or namespace around a declaration, recursively nested outward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnclosingScope {
    pub kind: ScopeKind,
    pub name: String,
    #[serde(default)]
    pub exported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_scope: Option<Box<EnclosingScope>>,
}

impl EnclosingScope {
    /// Build the nested chain from frames listed outermost first.
    pub fn from_frames(frames: &[(ScopeKind, String, bool)]) -> Option<Self> {
        let mut scope: Option<EnclosingScope> = None;
        for (kind, name, exported) in frames {
            scope = Some(EnclosingScope {
                kind: *kind,
                name: name.clone(),
                exported: *exported,
                enclosing_scope: scope.map(Box::new),
            });
        }
        scope
    }

    /// Scope names, innermost first.
    pub fn chain(&self) -> Vec<(ScopeKind, &str)> {
        let mut chain = vec![(self.kind, self.name.as_str())];
        let mut current = self.enclosing_scope.as_deref();
        while let Some(scope) = current {
            chain.push((scope.kind, scope.name.as_str()));
            current = scope.enclosing_scope.as_deref();
        }
        chain
    }

    /// Kind and name of every level match (export flags are not identity).
    pub fn same_scope(&self, other: &EnclosingScope) -> bool {
        self.chain() == other.chain()
    }
}

/// Identifies a callable by name, declaring file, and enclosing scopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallIdentifier {
    pub name: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enclosing_scope: Option<EnclosingScope>,
    pub access: AccessLevel,
}

impl FunctionCallIdentifier {
    /// `Outer.Inner.name`, outermost scope first.
    pub fn qualified_name(&self) -> String {
        let mut parts: Vec<&str> = self
            .enclosing_scope
            .as_ref()
            .map(|s| s.chain().into_iter().map(|(_, n)| n).collect())
            .unwrap_or_default();
        parts.reverse();
        parts.push(&self.name);
        parts.join(".")
    }
}

/// Name, file path and the whole scope chain; access level is not identity.
impl PartialEq for FunctionCallIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.file_path == other.file_path
            && match (&self.enclosing_scope, &other.enclosing_scope) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_scope(b),
                _ => false,
            }
    }
}

impl Eq for FunctionCallIdentifier {}

impl fmt::Display for FunctionCallIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.qualified_name(), self.file_path)
    }
}

// ============================================================================
// Imports
// ============================================================================

/// Where a type used in a signature is imported from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ImportIdentifier {
    /// Declared in a file of the same codebase.
    Local {
        name: String,
        #[serde(rename = "localPath")]
        local_path: String,
    },
    /// Exported by an installed package.
    Library { name: String, library: String },
    /// Needs no import (`string`, `number`, ...).
    BuiltIn { name: String },
}

impl ImportIdentifier {
    pub fn name(&self) -> &str {
        match self {
            Self::Local { name, .. } | Self::Library { name, .. } | Self::BuiltIn { name } => name,
        }
    }
}

// ============================================================================
// Requirements
// ============================================================================

/// How to satisfy a new parameter at call sites inside test code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateInTests {
    pub dummy_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_import: Option<ImportIdentifier>,
}

/// Add a leading parameter to a function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParameter {
    pub function_with_additional_parameter: FunctionCallIdentifier,
    pub parameter_type: ImportIdentifier,
    pub parameter_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub populate_in_tests: Option<PopulateInTests>,
    /// Set when this instance runs against a codebase downstream of the
    /// one that declares the function.
    #[serde(default)]
    pub external: bool,
}

/// Pass an argument to every call of `function_with_additional_parameter`
/// made inside `enclosing_function`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassArgument {
    pub enclosing_function: FunctionCallIdentifier,
    pub function_with_additional_parameter: FunctionCallIdentifier,
    pub argument_value: String,
}

/// Pass a dummy literal at every call site under the test roots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDummyInTests {
    pub function_with_additional_parameter: FunctionCallIdentifier,
    pub dummy_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_import: Option<ImportIdentifier>,
}

/// Persist a downstream-facing requirement for later replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMigration {
    pub downstream_requirement: Box<Requirement>,
}

/// The variant payload, discriminated by `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RequirementKind {
    #[serde(rename = "Add Parameter")]
    AddParameter(AddParameter),
    #[serde(rename = "Pass Argument")]
    PassArgument(PassArgument),
    #[serde(rename = "Pass Dummy In Tests")]
    PassDummyInTests(PassDummyInTests),
    #[serde(rename = "Add Migration")]
    AddMigration(AddMigration),
}

impl RequirementKind {
    /// The wire discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AddParameter(_) => "Add Parameter",
            Self::PassArgument(_) => "Pass Argument",
            Self::PassDummyInTests(_) => "Pass Dummy In Tests",
            Self::AddMigration(_) => "Add Migration",
        }
    }
}

/// Provenance: diagnostics only, never part of equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Why {
    Text(String),
    Requirement(Box<Requirement>),
}

/// A single desired source change plus why it was asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    #[serde(flatten)]
    pub change: RequirementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub why: Option<Why>,
}

impl Requirement {
    pub fn new(change: RequirementKind) -> Self {
        Self { change, why: None }
    }

    pub fn because(mut self, why: Why) -> Self {
        self.why = Some(why);
        self
    }

    /// Provenance pointing at the requirement that triggered this one.
    pub fn caused_by(self, trigger: &Requirement) -> Self {
        self.because(Why::Requirement(Box::new(trigger.clone())))
    }
}

impl From<AddParameter> for Requirement {
    fn from(r: AddParameter) -> Self {
        Self::new(RequirementKind::AddParameter(r))
    }
}

impl From<PassArgument> for Requirement {
    fn from(r: PassArgument) -> Self {
        Self::new(RequirementKind::PassArgument(r))
    }
}

impl From<PassDummyInTests> for Requirement {
    fn from(r: PassDummyInTests) -> Self {
        Self::new(RequirementKind::PassDummyInTests(r))
    }
}

impl From<AddMigration> for Requirement {
    fn from(r: AddMigration) -> Self {
        Self::new(RequirementKind::AddMigration(r))
    }
}

// ============================================================================
// Consequences, changesets, reports
// ============================================================================

/// Changes triggered by trying to satisfy a requirement.
#[derive(Debug, Clone, Default)]
pub struct Consequences {
    /// Belong in the same changeset as their trigger.
    pub concomitant_changes: Vec<Requirement>,
    /// Must be resolved and applied, as their own changesets, first.
    pub prerequisite_changes: Vec<Requirement>,
}

impl Consequences {
    pub fn concat(mut self, other: Consequences) -> Self {
        self.concomitant_changes.extend(other.concomitant_changes);
        self.prerequisite_changes.extend(other.prerequisite_changes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.concomitant_changes.is_empty() && self.prerequisite_changes.is_empty()
    }
}

/// A resolved bundle: the root concern, its concomitant set, and the
/// changesets that must run before it. Built once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct Changeset {
    pub title_requirement: Requirement,
    pub requirements: Vec<Requirement>,
    pub prerequisites: Vec<Changeset>,
}

/// A requirement that produced no effect, and why.
#[derive(Debug, Clone, Serialize)]
pub struct Unimplemented {
    pub requirement: Requirement,
    pub message: String,
}

/// Outcome of applying requirements. Combines by concatenation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub implemented: Vec<Requirement>,
    pub unimplemented: Vec<Unimplemented>,
}

impl Report {
    pub fn implemented(requirement: Requirement) -> Self {
        Self {
            implemented: vec![requirement],
            unimplemented: Vec::new(),
        }
    }

    pub fn unimplemented(requirement: Requirement, message: impl Into<String>) -> Self {
        Self {
            implemented: Vec::new(),
            unimplemented: vec![Unimplemented {
                requirement,
                message: message.into(),
            }],
        }
    }

    pub fn extend(&mut self, other: Report) {
        self.implemented.extend(other.implemented);
        self.unimplemented.extend(other.unimplemented);
    }

    pub fn concat(mut self, other: Report) -> Self {
        self.extend(other);
        self
    }
}

// ============================================================================
// Engine configuration (cascade.yaml)
// ============================================================================

/// Per-project engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Human-readable project name
    pub name: String,

    /// Package name downstream code imports this codebase by
    #[serde(default)]
    pub package: Option<String>,

    /// Files scanned for call sites
    #[serde(default = "default_source_glob")]
    pub source_glob: String,

    /// Directories holding test code, excluded from public call-site scans
    #[serde(default = "default_test_roots")]
    pub test_roots: Vec<String>,

    /// Root directory of persisted migration artifacts
    #[serde(default = "default_migration_dir")]
    pub migration_dir: String,

    /// Changelog receiving breaking-change notes
    #[serde(default = "default_changelog")]
    pub changelog: String,

    /// Package manifest holding the version and dependencies
    #[serde(default = "default_manifest")]
    pub manifest: String,

    /// Where the run journal is written
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: "project".to_string(),
            package: None,
            source_glob: default_source_glob(),
            test_roots: default_test_roots(),
            migration_dir: default_migration_dir(),
            changelog: default_changelog(),
            manifest: default_manifest(),
            state_dir: default_state_dir(),
        }
    }
}

impl EngineConfig {
    /// True if `path` lies under one of the test roots.
    pub fn is_test_path(&self, path: &str) -> bool {
        self.test_roots.iter().any(|root| {
            let root = root.trim_end_matches('/');
            path == root || path.starts_with(&format!("{}/", root))
        })
    }

    /// Globs selecting TypeScript sources under each test root.
    pub fn test_globs(&self) -> Vec<String> {
        self.test_roots
            .iter()
            .map(|root| format!("{}/**/*.ts", root.trim_end_matches('/')))
            .collect()
    }
}

fn default_source_glob() -> String {
    "**/*.ts".to_string()
}

fn default_test_roots() -> Vec<String> {
    vec!["test".to_string()]
}

fn default_migration_dir() -> String {
    "migration".to_string()
}

fn default_changelog() -> String {
    "CHANGELOG.md".to_string()
}

fn default_manifest() -> String {
    "package.json".to_string()
}

fn default_state_dir() -> String {
    ".cascade".to_string()
}

// ============================================================================
// Provenance events
// ============================================================================

/// Event in the JSONL run journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    RunStarted {
        run_id: String,
        title: String,
        cascade_version: String,
    },
    ChangesetCompleted {
        run_id: String,
        title: String,
        implemented: u32,
        unimplemented: u32,
    },
    RequirementUnimplemented {
        run_id: String,
        requirement: String,
        reason: String,
    },
    MigrationReplayed {
        run_id: String,
        version: String,
        artifact: String,
    },
    RunCompleted {
        run_id: String,
        implemented: u32,
        unimplemented: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(name: &str, class: Option<&str>) -> FunctionCallIdentifier {
        FunctionCallIdentifier {
            name: name.to_string(),
            file_path: "src/a.ts".to_string(),
            enclosing_scope: class.map(|c| EnclosingScope {
                kind: ScopeKind::Class,
                name: c.to_string(),
                exported: true,
                enclosing_scope: None,
            }),
            access: AccessLevel::PublicMethod,
        }
    }

    #[test]
    fn test_cs001_identifier_equality_ignores_access() {
        let a = scoped("run", Some("Handler"));
        let mut b = scoped("run", Some("Handler"));
        b.access = AccessLevel::PrivateMethod;
        assert_eq!(a, b);
    }

    #[test]
    fn test_cs001_identifier_equality_checks_scope_chain() {
        assert_ne!(scoped("run", Some("Handler")), scoped("run", Some("Other")));
        assert_ne!(scoped("run", Some("Handler")), scoped("run", None));
        let mut moved = scoped("run", None);
        moved.file_path = "src/b.ts".to_string();
        assert_ne!(scoped("run", None), moved);
    }

    #[test]
    fn test_cs001_scope_from_frames_nests_outward() {
        let scope = EnclosingScope::from_frames(&[
            (ScopeKind::Namespace, "Outer".to_string(), true),
            (ScopeKind::Class, "Inner".to_string(), false),
        ])
        .unwrap();
        assert_eq!(
            scope.chain(),
            vec![(ScopeKind::Class, "Inner"), (ScopeKind::Namespace, "Outer")]
        );
        let id = FunctionCallIdentifier {
            name: "go".to_string(),
            file_path: "x.ts".to_string(),
            enclosing_scope: Some(scope),
            access: AccessLevel::PublicMethod,
        };
        assert_eq!(id.qualified_name(), "Outer.Inner.go");
        assert_eq!(id.to_string(), "Outer.Inner.go in x.ts");
    }

    #[test]
    fn test_cs001_access_level_public() {
        assert!(AccessLevel::PublicFunction.is_public());
        assert!(AccessLevel::PublicMethod.is_public());
        assert!(!AccessLevel::PrivateFunction.is_public());
        assert!(!AccessLevel::PrivateMethod.is_public());
    }

    #[test]
    fn test_cs001_import_identifier_wire_format() {
        let import = ImportIdentifier::Local {
            name: "HandlerContext".to_string(),
            local_path: "lib/context.ts".to_string(),
        };
        let json = serde_json::to_string(&import).unwrap();
        assert!(json.contains("\"kind\":\"local\""));
        assert!(json.contains("\"localPath\":\"lib/context.ts\""));
    }

    #[test]
    fn test_cs001_report_concat_preserves_order() {
        let a = Report::unimplemented(
            Requirement::from(PassDummyInTests {
                function_with_additional_parameter: scoped("a", None),
                dummy_value: "1".to_string(),
                additional_import: None,
            }),
            "first",
        );
        let b = Report::unimplemented(a.unimplemented[0].requirement.clone(), "second");
        let combined = a.concat(b);
        let messages: Vec<_> = combined.unimplemented.iter().map(|u| u.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert!(combined.implemented.is_empty());
    }

    #[test]
    fn test_cs001_config_test_paths() {
        let config = EngineConfig {
            test_roots: vec!["test".to_string(), "spec/".to_string()],
            ..EngineConfig::default()
        };
        assert!(config.is_test_path("test/a.test.ts"));
        assert!(config.is_test_path("spec/deep/b.ts"));
        assert!(!config.is_test_path("testing/c.ts"));
        assert!(!config.is_test_path("lib/test.ts"));
        assert_eq!(config.test_globs(), vec!["test/**/*.ts", "spec/**/*.ts"]);
    }

    #[test]
    fn test_cs001_provenance_event_serde() {
        let event = ProvenanceEvent::ChangesetCompleted {
            run_id: "r-abc".to_string(),
            title: "Add parameter".to_string(),
            implemented: 2,
            unimplemented: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"changeset_completed\""));
        assert!(json.contains("\"run_id\":\"r-abc\""));
    }
}
