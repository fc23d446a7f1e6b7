//! CS-004: Requirement capabilities and dispatch.
//!
//! Every variant payload implements [`Change`]. [`Requirement`] selects the
//! payload's implementation by matching on its kind, so adding a variant is
//! a compile error everywhere it is not yet handled.
//!
//! Identity is structural: each variant names the fields that identify the
//! change, and provenance (`why`) never takes part. The BLAKE3 fingerprint of
//! those fields is the dedup key used by the resolver and the planner.

use super::context::EngineContext;
use super::error::EngineError;
use super::types::*;
use super::{consequences, executor, migration};
use crate::provenance::hasher;

/// Reason reported for a variant without an implementation.
pub const NO_IMPLEMENTATION: &str = "no implementation known";

/// Reason reported when a requirement's effect is already present.
pub const ALREADY_APPLIED: &str = "already applied";

/// What a requirement variant can do.
#[async_trait::async_trait]
pub trait Change: Send + Sync {
    /// Fields that identify this change. Two changes of the same kind with
    /// equal identities are the same change.
    fn identity(&self) -> Vec<String>;

    /// Human-readable summary.
    fn describe(&self) -> String;

    /// Changes needed alongside or before this one. Leaf changes have none.
    async fn find_consequences(
        &self,
        _this: &Requirement,
        _ctx: &EngineContext<'_>,
    ) -> Result<Consequences, EngineError> {
        Ok(Consequences::default())
    }

    /// Stage this change on the context's tree.
    async fn implement(
        &self,
        this: &Requirement,
        _ctx: &mut EngineContext<'_>,
    ) -> Result<Report, EngineError> {
        Ok(Report::unimplemented(this.clone(), NO_IMPLEMENTATION))
    }
}

/// Identity key of a function: file, scope chain with kinds, name.
pub fn function_key(id: &FunctionCallIdentifier) -> String {
    let scopes = id
        .enclosing_scope
        .as_ref()
        .map(|s| {
            s.chain()
                .iter()
                .rev()
                .map(|(kind, name)| format!("{:?}:{}", kind, name))
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();
    format!("{}#{}#{}", id.file_path, scopes, id.name)
}

#[async_trait::async_trait]
impl Change for AddParameter {
    fn identity(&self) -> Vec<String> {
        vec![
            function_key(&self.function_with_additional_parameter),
            self.parameter_name.clone(),
        ]
    }

    fn describe(&self) -> String {
        format!(
            "Add parameter {}: {} to {}",
            self.parameter_name,
            self.parameter_type.name(),
            self.function_with_additional_parameter
        )
    }

    async fn find_consequences(
        &self,
        this: &Requirement,
        ctx: &EngineContext<'_>,
    ) -> Result<Consequences, EngineError> {
        consequences::add_parameter(self, this, ctx).await
    }

    async fn implement(
        &self,
        this: &Requirement,
        ctx: &mut EngineContext<'_>,
    ) -> Result<Report, EngineError> {
        executor::implement_add_parameter(self, this, ctx).await
    }
}

#[async_trait::async_trait]
impl Change for PassArgument {
    fn identity(&self) -> Vec<String> {
        vec![
            function_key(&self.enclosing_function),
            function_key(&self.function_with_additional_parameter),
            self.argument_value.clone(),
        ]
    }

    fn describe(&self) -> String {
        format!(
            "Pass argument {} to {} in {}",
            self.argument_value,
            self.function_with_additional_parameter.qualified_name(),
            self.enclosing_function
        )
    }

    async fn implement(
        &self,
        this: &Requirement,
        ctx: &mut EngineContext<'_>,
    ) -> Result<Report, EngineError> {
        executor::implement_pass_argument(self, this, ctx).await
    }
}

#[async_trait::async_trait]
impl Change for PassDummyInTests {
    fn identity(&self) -> Vec<String> {
        vec![
            function_key(&self.function_with_additional_parameter),
            self.dummy_value.clone(),
        ]
    }

    fn describe(&self) -> String {
        format!(
            "Pass dummy value {} to {} in tests",
            self.dummy_value,
            self.function_with_additional_parameter.qualified_name()
        )
    }

    async fn implement(
        &self,
        this: &Requirement,
        ctx: &mut EngineContext<'_>,
    ) -> Result<Report, EngineError> {
        executor::implement_pass_dummy_in_tests(self, this, ctx).await
    }
}

#[async_trait::async_trait]
impl Change for AddMigration {
    fn identity(&self) -> Vec<String> {
        let inner = &self.downstream_requirement;
        let mut parts = vec![inner.change.kind().to_string()];
        parts.extend(inner.change.as_change().identity());
        parts
    }

    fn describe(&self) -> String {
        format!(
            "Record downstream migration: {}",
            self.downstream_requirement.describe()
        )
    }

    async fn implement(
        &self,
        this: &Requirement,
        ctx: &mut EngineContext<'_>,
    ) -> Result<Report, EngineError> {
        migration::record(self, this, ctx).await
    }
}

impl RequirementKind {
    /// The payload's capabilities.
    pub fn as_change(&self) -> &dyn Change {
        match self {
            Self::AddParameter(c) => c,
            Self::PassArgument(c) => c,
            Self::PassDummyInTests(c) => c,
            Self::AddMigration(c) => c,
        }
    }
}

impl Requirement {
    /// Structural equality: same kind and same identifying fields.
    pub fn same_requirement(&self, other: &Requirement) -> bool {
        self.change.kind() == other.change.kind()
            && self.change.as_change().identity() == other.change.as_change().identity()
    }

    pub fn describe(&self) -> String {
        self.change.as_change().describe()
    }

    /// BLAKE3 hash of kind and identity. Equal iff `same_requirement`.
    pub fn fingerprint(&self) -> String {
        let mut parts = vec![self.change.kind().to_string()];
        parts.extend(self.change.as_change().identity());
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        hasher::composite_hash(&refs)
    }

    pub async fn find_consequences(
        &self,
        ctx: &EngineContext<'_>,
    ) -> Result<Consequences, EngineError> {
        self.change.as_change().find_consequences(self, ctx).await
    }

    pub async fn implement(&self, ctx: &mut EngineContext<'_>) -> Result<Report, EngineError> {
        self.change.as_change().implement(self, ctx).await
    }
}

/// Pretty JSON form persisted as a migration artifact.
pub fn serialize_requirement(requirement: &Requirement) -> Result<String, EngineError> {
    serde_json::to_string_pretty(requirement).map_err(|e| EngineError::Serialization(e.to_string()))
}

/// Rebuild a requirement from JSON, dispatching on `kind`. `origin` names
/// where the JSON came from, for the error.
pub fn deserialize_requirement(json: &str, origin: &str) -> Result<Requirement, EngineError> {
    serde_json::from_str(json).map_err(|e| EngineError::Deserialization {
        origin: origin.to_string(),
        message: e.to_string(),
    })
}
