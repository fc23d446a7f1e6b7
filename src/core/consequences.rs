//! CS-005: Consequence discovery for AddParameter.
//!
//! For every call site of the target, the caller either already has a value
//! of the parameter's type (pass it, stop) or gets the same parameter added
//! as a prerequisite (pass its name, propagate one level up). Public targets
//! also get dummy values in tests and a recorded downstream migration.

use super::context::EngineContext;
use super::error::EngineError;
use super::types::*;
use crate::tree::{MatchedNode, NodeKind, PathExpression};
use tracing::{debug, warn};

/// Call sites of `target` outside test code. Private targets can only be
/// called from their own file.
pub async fn call_sites(
    target: &FunctionCallIdentifier,
    ctx: &EngineContext<'_>,
) -> Result<Vec<MatchedNode>, EngineError> {
    let expression = PathExpression::CallTo {
        name: target.name.clone(),
    };
    let calls = if target.access.is_public() {
        ctx.tree
            .find_matches(&ctx.config.source_glob, &expression)
            .await?
    } else {
        ctx.tree
            .find_matches(&glob::Pattern::escape(&target.file_path), &expression)
            .await?
    };
    Ok(calls
        .into_iter()
        .filter(|c| !ctx.config.is_test_path(&c.file_path))
        .collect())
}

pub async fn add_parameter(
    req: &AddParameter,
    this: &Requirement,
    ctx: &EngineContext<'_>,
) -> Result<Consequences, EngineError> {
    let target = &req.function_with_additional_parameter;
    let mut found = Consequences::default();

    for call in call_sites(target, ctx).await? {
        let enclosing = ctx
            .tree
            .evaluate(&call, &PathExpression::EnclosingFunction)
            .await?;
        let Some(declaration) = enclosing.first() else {
            warn!(
                call = %call.value,
                file = %call.file_path,
                "call outside any function, cannot pass {}",
                req.parameter_name
            );
            continue;
        };
        let NodeKind::FunctionDeclaration(caller) = &declaration.kind else {
            continue;
        };

        let pass = |value: &str| {
            Requirement::from(PassArgument {
                enclosing_function: caller.clone(),
                function_with_additional_parameter: target.clone(),
                argument_value: value.to_string(),
            })
            .caused_by(this)
        };

        // The target calling itself passes its own new parameter along.
        if caller == target {
            found.concomitant_changes.push(pass(&req.parameter_name));
            continue;
        }

        let parameters = ctx
            .tree
            .evaluate(declaration, &PathExpression::Parameters)
            .await?;
        let existing = parameters.first().and_then(|node| match &node.kind {
            NodeKind::ParameterList(list) => list
                .iter()
                .find(|p| p.type_text.as_deref() == Some(req.parameter_type.name()))
                .map(|p| p.name.clone()),
            _ => None,
        });

        match existing {
            Some(name) => {
                debug!(caller = %caller, value = %name, "caller already has a value");
                found.concomitant_changes.push(pass(&name));
            }
            None => {
                debug!(caller = %caller, "propagating parameter to caller");
                found.concomitant_changes.push(pass(&req.parameter_name));
                found.prerequisite_changes.push(
                    Requirement::from(AddParameter {
                        function_with_additional_parameter: caller.clone(),
                        parameter_type: req.parameter_type.clone(),
                        parameter_name: req.parameter_name.clone(),
                        populate_in_tests: req.populate_in_tests.clone(),
                        external: req.external,
                    })
                    .caused_by(this),
                );
            }
        }
    }

    if target.access.is_public() {
        if let Some(policy) = &req.populate_in_tests {
            found.concomitant_changes.push(
                Requirement::from(PassDummyInTests {
                    function_with_additional_parameter: target.clone(),
                    dummy_value: policy.dummy_value.clone(),
                    additional_import: policy.additional_import.clone(),
                })
                .caused_by(this),
            );
        }
        if !req.external {
            found.concomitant_changes.push(
                Requirement::from(AddMigration {
                    downstream_requirement: Box::new(downstream_copy(req, ctx.config)),
                })
                .caused_by(this),
            );
        }
    }

    Ok(found)
}

/// The AddParameter a downstream codebase replays: types declared in this
/// codebase are imported from its package instead.
pub fn downstream_copy(req: &AddParameter, config: &EngineConfig) -> Requirement {
    let externalize = |import: &ImportIdentifier| match (import, &config.package) {
        (ImportIdentifier::Local { name, .. }, Some(package)) => ImportIdentifier::Library {
            name: name.clone(),
            library: package.clone(),
        },
        (ImportIdentifier::Local { name, .. }, None) => {
            warn!(
                type_name = %name,
                "no package configured, downstream import of {} will not resolve",
                name
            );
            import.clone()
        }
        _ => import.clone(),
    };

    Requirement::from(AddParameter {
        function_with_additional_parameter: req.function_with_additional_parameter.clone(),
        parameter_type: externalize(&req.parameter_type),
        parameter_name: req.parameter_name.clone(),
        populate_in_tests: req.populate_in_tests.as_ref().map(|p| PopulateInTests {
            dummy_value: p.dummy_value.clone(),
            additional_import: p.additional_import.as_ref().map(externalize),
        }),
        external: true,
    })
}
