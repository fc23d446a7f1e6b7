//! CS-007: Changeset construction and linearization.
//!
//! A changeset is the resolved concomitant set of one root requirement plus
//! one child changeset per prerequisite. Linearizing walks prerequisites
//! first, so every changeset appears after everything it depends on.

use super::context::EngineContext;
use super::error::EngineError;
use super::resolver;
use super::types::*;
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Build the changeset tree rooted at `root`.
pub async fn changeset_for_requirement(
    root: &Requirement,
    ctx: &EngineContext<'_>,
) -> Result<Changeset, EngineError> {
    build(root.clone(), Vec::new(), ctx).await
}

/// `path` holds fingerprints of the roots from the top changeset down to the
/// parent of `root`. A prerequisite already on it would recurse forever.
fn build<'a, 'c>(
    root: Requirement,
    mut path: Vec<String>,
    ctx: &'a EngineContext<'c>,
) -> BoxFuture<'a, Result<Changeset, EngineError>>
where
    'c: 'a,
{
    async move {
        let resolved = resolver::resolve(&root, ctx).await?;
        path.push(root.fingerprint());

        let mut prerequisites = Vec::new();
        for prerequisite in resolved.prerequisite_changes {
            if path.contains(&prerequisite.fingerprint()) {
                warn!(
                    requirement = %prerequisite.describe(),
                    "prerequisite cycle, skipping"
                );
                continue;
            }
            prerequisites.push(build(prerequisite, path.clone(), ctx).await?);
        }

        debug!(
            title = %root.describe(),
            requirements = resolved.concomitant_changes.len(),
            prerequisites = prerequisites.len(),
            "built changeset"
        );
        Ok(Changeset {
            title_requirement: root,
            requirements: resolved.concomitant_changes,
            prerequisites,
        })
    }
    .boxed()
}

/// Flatten prerequisites-first. A changeset reachable along several paths
/// keeps its first position only.
pub fn linearize(changeset: &Changeset) -> Vec<&Changeset> {
    let mut ordered = Vec::new();
    let mut seen = HashSet::new();
    visit(changeset, &mut ordered, &mut seen);
    ordered
}

fn visit<'a>(changeset: &'a Changeset, ordered: &mut Vec<&'a Changeset>, seen: &mut HashSet<String>) {
    for prerequisite in &changeset.prerequisites {
        visit(prerequisite, ordered, seen);
    }
    if seen.insert(changeset.title_requirement.fingerprint()) {
        ordered.push(changeset);
    }
}

/// Total number of changesets in the tree, duplicates included.
pub fn count_changesets(changeset: &Changeset) -> usize {
    1 + changeset
        .prerequisites
        .iter()
        .map(count_changesets)
        .sum::<usize>()
}

/// Human-readable plan: the tree, then the execution order.
pub fn render_plan(changeset: &Changeset) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Changeset tree:");
    render_tree(changeset, 1, &mut out);

    let order = linearize(changeset);
    let _ = writeln!(out, "\nExecution order ({} changesets):", order.len());
    for (i, c) in order.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, c.title_requirement.describe());
        for r in &c.requirements {
            let _ = writeln!(out, "       - {}", r.describe());
        }
    }
    out
}

fn render_tree(changeset: &Changeset, depth: usize, out: &mut String) {
    let _ = writeln!(
        out,
        "{}{} [{} requirements]",
        "  ".repeat(depth),
        changeset.title_requirement.describe(),
        changeset.requirements.len()
    );
    for p in &changeset.prerequisites {
        render_tree(p, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::requirement::fixtures::*;
    use crate::tree::imports::TypeScriptImports;
    use crate::tree::project::Project;
    use proptest::prelude::*;

    const CHAIN: &str = r#"
function target(x: string) {
    return x;
}

function mid() {
    return target("m");
}

function top() {
    return mid();
}
"#;

    fn titles(order: &[&Changeset]) -> Vec<String> {
        order
            .iter()
            .map(|c| match &c.title_requirement.change {
                RequirementKind::AddParameter(p) => p.function_with_additional_parameter.name.clone(),
                other => other.kind().to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_cs007_chain_builds_nested_prerequisites() {
        let mut p = Project::in_memory([("lib/a.ts", CHAIN)]);
        let config = EngineConfig::default();
        let ctx = EngineContext::new(&mut p, &TypeScriptImports, &config);
        let root = add_context("target", "lib/a.ts", AccessLevel::PrivateFunction);

        let changeset = changeset_for_requirement(&root, &ctx).await.unwrap();
        assert_eq!(changeset.prerequisites.len(), 1);
        assert_eq!(changeset.prerequisites[0].prerequisites.len(), 1);
        assert_eq!(count_changesets(&changeset), 3);

        let order = linearize(&changeset);
        assert_eq!(titles(&order), vec!["top", "mid", "target"]);
    }

    #[tokio::test]
    async fn test_cs007_mutual_recursion_terminates() {
        let source = "function ping(n: number) { return pong(n); }\nfunction pong(n: number) { return ping(n); }\nfunction target() { }\nfunction start() { target(); ping(1); }\n";
        let mut p = Project::in_memory([("lib/a.ts", source)]);
        let config = EngineConfig::default();
        let ctx = EngineContext::new(&mut p, &TypeScriptImports, &config);
        let root = add_context("ping", "lib/a.ts", AccessLevel::PrivateFunction);

        let changeset = changeset_for_requirement(&root, &ctx).await.unwrap();
        let order = linearize(&changeset);
        let names = titles(&order);
        assert_eq!(names.last().map(String::as_str), Some("ping"));
        assert!(names.contains(&"pong".to_string()));
        assert!(names.contains(&"start".to_string()));
    }

    #[tokio::test]
    async fn test_cs007_render_plan_lists_order() {
        let mut p = Project::in_memory([("lib/a.ts", CHAIN)]);
        let config = EngineConfig::default();
        let ctx = EngineContext::new(&mut p, &TypeScriptImports, &config);
        let root = add_context("target", "lib/a.ts", AccessLevel::PrivateFunction);
        let changeset = changeset_for_requirement(&root, &ctx).await.unwrap();

        let plan = render_plan(&changeset);
        assert!(plan.contains("Execution order (3 changesets)"));
        assert!(plan.contains("  1. Add parameter context: HandlerContext to top in lib/a.ts"));
        assert!(plan.contains("Pass argument context to mid in top in lib/a.ts"));
    }

    #[tokio::test]
    async fn test_cs007_converging_callers_collapse_to_one_changeset() {
        let source = "function target(x: string) { return x; }\nfunction mid() { return target(\"m\"); }\nfunction other() { return target(\"o\"); }\nfunction top() { mid(); other(); }\n";
        let mut p = Project::in_memory([("lib/a.ts", source)]);
        let config = EngineConfig::default();
        let ctx = EngineContext::new(&mut p, &TypeScriptImports, &config);
        let root = add_context("target", "lib/a.ts", AccessLevel::PrivateFunction);

        let changeset = changeset_for_requirement(&root, &ctx).await.unwrap();
        // top is reached once through mid and once through other
        let tops: Vec<&Changeset> = changeset
            .prerequisites
            .iter()
            .flat_map(|c| c.prerequisites.iter())
            .collect();
        assert_eq!(tops.len(), 2);
        assert!(tops[0].title_requirement.same_requirement(&tops[1].title_requirement));
        let why = |c: &Changeset| format!("{:?}", c.title_requirement.why);
        assert_ne!(why(tops[0]), why(tops[1]));
        assert_eq!(count_changesets(&changeset), 5);

        let order = linearize(&changeset);
        assert_eq!(titles(&order), vec!["top", "mid", "other", "target"]);
    }

    fn leaf(name: &str) -> Requirement {
        add_context(name, "lib/gen.ts", AccessLevel::PrivateFunction)
    }

    fn node(name: &str, prerequisites: Vec<Changeset>) -> Changeset {
        Changeset {
            title_requirement: leaf(name),
            requirements: vec![leaf(name)],
            prerequisites,
        }
    }

    #[test]
    fn test_cs007_diamond_keeps_first_position() {
        let shared = || node("top", Vec::new());
        let root = node(
            "target",
            vec![node("left", vec![shared()]), node("right", vec![shared()])],
        );
        let names: Vec<_> = linearize(&root)
            .iter()
            .map(|c| c.title_requirement.describe())
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names[0].contains(" top "));
        assert!(names[3].contains(" target "));
    }

    #[derive(Debug, Clone)]
    struct Shape(Vec<Shape>);

    fn arb_shape() -> impl Strategy<Value = Shape> {
        Just(Shape(Vec::new())).prop_recursive(4, 32, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(Shape)
        })
    }

    fn materialize(shape: &Shape, next: &mut usize) -> Changeset {
        let prerequisites = shape.0.iter().map(|s| materialize(s, next)).collect();
        *next += 1;
        node(&format!("f{}", next), prerequisites)
    }

    fn assert_prerequisites_first(
        changeset: &Changeset,
        position: &std::collections::HashMap<String, usize>,
    ) {
        let own = position[&changeset.title_requirement.fingerprint()];
        for p in &changeset.prerequisites {
            assert!(position[&p.title_requirement.fingerprint()] < own);
            assert_prerequisites_first(p, position);
        }
    }

    proptest! {
        #[test]
        fn test_cs007_prop_linearize_prerequisites_first(shape in arb_shape()) {
            let changeset = materialize(&shape, &mut 0);
            let order = linearize(&changeset);
            prop_assert_eq!(order.len(), count_changesets(&changeset));
            prop_assert!(order
                .last()
                .is_some_and(|c| c.title_requirement.same_requirement(&changeset.title_requirement)));

            let position: std::collections::HashMap<String, usize> = order
                .iter()
                .enumerate()
                .map(|(i, c)| (c.title_requirement.fingerprint(), i))
                .collect();
            prop_assert_eq!(position.len(), order.len());
            assert_prerequisites_first(&changeset, &position);
        }
    }
}
