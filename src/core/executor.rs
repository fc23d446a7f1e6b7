//! CS-008: Executor for linearized changesets.
//!
//! Requirements run one at a time, in plan order. Every `implement` is
//! followed by a flush so the next requirement queries edited files. A
//! failing `implement` drops its staged edits and becomes an
//! `unimplemented` entry; the run carries on. After each changeset the
//! injected hook sees the changeset and its report.

use super::context::EngineContext;
use super::error::EngineError;
use super::migration::PendingMigration;
use super::planner;
use super::requirement::ALREADY_APPLIED;
use super::types::*;
use crate::tree::{prepend_to_list, MatchedNode, NodeKind, PathExpression};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Called between changesets. Version control hooks in here.
#[async_trait::async_trait]
pub trait ChangesetHook: Send {
    async fn after_changeset(
        &mut self,
        changeset: &Changeset,
        report: &Report,
    ) -> Result<(), EngineError>;

    /// Called before each replayed migration.
    async fn before_migration(&mut self, _migration: &PendingMigration) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Hook that does nothing.
#[derive(Debug, Default)]
pub struct NoHook;

#[async_trait::async_trait]
impl ChangesetHook for NoHook {
    async fn after_changeset(&mut self, _: &Changeset, _: &Report) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Apply `plan` in order.
pub async fn execute(
    plan: &[&Changeset],
    ctx: &mut EngineContext<'_>,
    hook: &mut dyn ChangesetHook,
) -> Result<Report, EngineError> {
    let mut report = Report::default();

    for changeset in plan {
        let start = Instant::now();
        let mut changeset_report = Report::default();

        for requirement in &changeset.requirements {
            let outcome = match requirement.implement(ctx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    ctx.tree.discard();
                    warn!(requirement = %requirement.describe(), error = %e, "implement failed");
                    Report::unimplemented(requirement.clone(), e.to_string())
                }
            };
            for u in &outcome.unimplemented {
                debug!(requirement = %u.requirement.describe(), reason = %u.message, "not applied");
            }
            ctx.tree.flush().await?;
            changeset_report.extend(outcome);
        }

        info!(
            title = %changeset.title_requirement.describe(),
            implemented = changeset_report.implemented.len(),
            unimplemented = changeset_report.unimplemented.len(),
            seconds = start.elapsed().as_secs_f64(),
            "changeset applied"
        );
        hook.after_changeset(changeset, &changeset_report).await?;
        report.extend(changeset_report);
    }

    Ok(report)
}

/// Build, linearize and execute the changeset for `root`.
pub async fn run(
    root: &Requirement,
    ctx: &mut EngineContext<'_>,
    hook: &mut dyn ChangesetHook,
) -> Result<(Changeset, Report), EngineError> {
    let changeset = planner::changeset_for_requirement(root, ctx).await?;
    let plan = planner::linearize(&changeset);
    info!(
        root = %root.describe(),
        changesets = plan.len(),
        "executing plan"
    );
    let report = execute(&plan, ctx, hook).await?;
    Ok((changeset, report))
}

// ============================================================================
// Per-variant implementations
// ============================================================================

/// Exactly one declaration of `id` in its own file, or the reason there isn't.
async fn single_declaration(
    id: &FunctionCallIdentifier,
    ctx: &EngineContext<'_>,
) -> Result<Result<MatchedNode, String>, EngineError> {
    let mut found = ctx
        .tree
        .find_matches(
            &glob::Pattern::escape(&id.file_path),
            &PathExpression::FunctionDeclaration {
                name: id.name.clone(),
                scope: id.enclosing_scope.clone(),
            },
        )
        .await?;
    if found.len() > 1 {
        return Ok(Err(format!("ambiguous: more than one match for {}", id)));
    }
    Ok(found.pop().ok_or_else(|| format!("function not found: {}", id)))
}

async fn arguments_of(
    call: &MatchedNode,
    ctx: &EngineContext<'_>,
) -> Result<Option<(MatchedNode, Vec<String>)>, EngineError> {
    let nodes = ctx.tree.evaluate(call, &PathExpression::Arguments).await?;
    Ok(nodes.into_iter().next().and_then(|node| match &node.kind {
        NodeKind::ArgumentList(values) => {
            let values = values.clone();
            Some((node, values))
        }
        _ => None,
    }))
}

pub async fn implement_add_parameter(
    req: &AddParameter,
    this: &Requirement,
    ctx: &mut EngineContext<'_>,
) -> Result<Report, EngineError> {
    let target = &req.function_with_additional_parameter;
    let declaration = match single_declaration(target, ctx).await? {
        Ok(node) => node,
        Err(_) if req.external => {
            return Ok(Report::unimplemented(
                this.clone(),
                format!("declared in another codebase: {}", target),
            ))
        }
        Err(reason) => return Ok(Report::unimplemented(this.clone(), reason)),
    };

    let nodes = ctx
        .tree
        .evaluate(&declaration, &PathExpression::Parameters)
        .await?;
    let Some(parameters) = nodes.first() else {
        return Ok(Report::unimplemented(
            this.clone(),
            format!("no parameter list found for {}", target),
        ));
    };
    let NodeKind::ParameterList(list) = &parameters.kind else {
        return Ok(Report::unimplemented(
            this.clone(),
            format!("no parameter list found for {}", target),
        ));
    };

    match list.iter().position(|p| p.name == req.parameter_name) {
        Some(0) => return Ok(Report::unimplemented(this.clone(), ALREADY_APPLIED)),
        Some(i) => {
            return Ok(Report::unimplemented(
                this.clone(),
                format!(
                    "{} already declares {} at position {}",
                    target,
                    req.parameter_name,
                    i + 1
                ),
            ))
        }
        None => {}
    }

    let declared = format!("{}: {}", req.parameter_name, req.parameter_type.name());
    ctx.tree
        .stage(parameters, prepend_to_list(&parameters.value, &declared))?;
    ctx.imports
        .add_import(&mut *ctx.tree, &declaration.file_path, &req.parameter_type)
        .await?;

    info!(function = %target, parameter = %declared, "added parameter");
    Ok(Report::implemented(this.clone()))
}

pub async fn implement_pass_argument(
    req: &PassArgument,
    this: &Requirement,
    ctx: &mut EngineContext<'_>,
) -> Result<Report, EngineError> {
    let declaration = match single_declaration(&req.enclosing_function, ctx).await? {
        Ok(node) => node,
        Err(reason) => return Ok(Report::unimplemented(this.clone(), reason)),
    };
    let target = &req.function_with_additional_parameter;
    let calls = ctx
        .tree
        .evaluate(
            &declaration,
            &PathExpression::CallTo {
                name: target.name.clone(),
            },
        )
        .await?;
    if calls.is_empty() {
        return Ok(Report::unimplemented(
            this.clone(),
            format!("no call to {} in {}", target.name, req.enclosing_function),
        ));
    }

    let mut changed = 0usize;
    for call in &calls {
        let Some((arguments, values)) = arguments_of(call, ctx).await? else {
            continue;
        };
        if values.first() == Some(&req.argument_value) {
            continue;
        }
        ctx.tree.stage(
            &arguments,
            prepend_to_list(&arguments.value, &req.argument_value),
        )?;
        changed += 1;
    }

    if changed == 0 {
        return Ok(Report::unimplemented(this.clone(), ALREADY_APPLIED));
    }
    info!(
        caller = %req.enclosing_function,
        callee = %target.name,
        calls = changed,
        "passed argument"
    );
    Ok(Report::implemented(this.clone()))
}

pub async fn implement_pass_dummy_in_tests(
    req: &PassDummyInTests,
    this: &Requirement,
    ctx: &mut EngineContext<'_>,
) -> Result<Report, EngineError> {
    let target = &req.function_with_additional_parameter;
    let expression = PathExpression::CallTo {
        name: target.name.clone(),
    };
    let mut seen: HashSet<(String, usize)> = HashSet::new();
    let mut touched: Vec<String> = Vec::new();

    for glob in ctx.config.test_globs() {
        for call in ctx.tree.find_matches(&glob, &expression).await? {
            if !seen.insert((call.file_path.clone(), call.span.start)) {
                continue;
            }
            let Some((arguments, values)) = arguments_of(&call, ctx).await? else {
                continue;
            };
            if values.first() == Some(&req.dummy_value) {
                continue;
            }
            ctx.tree
                .stage(&arguments, prepend_to_list(&arguments.value, &req.dummy_value))?;
            if !touched.contains(&call.file_path) {
                touched.push(call.file_path.clone());
            }
        }
    }

    if touched.is_empty() {
        let reason = if seen.is_empty() {
            format!("no calls to {} in tests", target.name)
        } else {
            ALREADY_APPLIED.to_string()
        };
        return Ok(Report::unimplemented(this.clone(), reason));
    }

    if let Some(import) = &req.additional_import {
        for file in &touched {
            ctx.imports.add_import(&mut *ctx.tree, file, import).await?;
        }
    }
    info!(callee = %target.name, files = touched.len(), "passed dummy value in tests");
    Ok(Report::implemented(this.clone()))
}
