//! End-to-end propagation: within one codebase, and from a library to a
//! downstream consumer through recorded migrations.

use cascade::core::changelog::{self, ChangelogUpdate};
use cascade::core::context::EngineContext;
use cascade::core::executor::{self, NoHook};
use cascade::core::migration;
use cascade::core::parser;
use cascade::core::planner;
use cascade::core::requirement::ALREADY_APPLIED;
use cascade::core::types::*;
use cascade::provenance::eventlog::{self, JournalHook};
use cascade::tree::imports::TypeScriptImports;
use cascade::tree::project::Project;
use cascade::tree::SourceTree;
use std::path::Path;

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn read(root: &Path, path: &str) -> String {
    std::fs::read_to_string(root.join(path)).unwrap()
}

fn function(name: &str, file: &str, access: AccessLevel) -> FunctionCallIdentifier {
    FunctionCallIdentifier {
        name: name.to_string(),
        file_path: file.to_string(),
        enclosing_scope: None,
        access,
    }
}

fn handler_context() -> ImportIdentifier {
    ImportIdentifier::Library {
        name: "HandlerContext".to_string(),
        library: "@atomist/automation-client".to_string(),
    }
}

fn add_context(target: FunctionCallIdentifier) -> Requirement {
    Requirement::from(AddParameter {
        function_with_additional_parameter: target,
        parameter_type: handler_context(),
        parameter_name: "context".to_string(),
        populate_in_tests: None,
        external: false,
    })
}

const CHAIN: &str = r#"export function target(x: string) {
    return x;
}

function mid() {
    return target("m");
}

function top() {
    return mid();
}
"#;

#[tokio::test]
async fn upward_chain_propagates_to_the_top() {
    let mut project = Project::in_memory([("lib/chain.ts", CHAIN)]);
    let config = EngineConfig::default();
    let root = add_context(function("target", "lib/chain.ts", AccessLevel::PrivateFunction));

    let ctx = EngineContext::new(&mut project, &TypeScriptImports, &config);
    let changeset = planner::changeset_for_requirement(&root, &ctx).await.unwrap();
    let order: Vec<String> = planner::linearize(&changeset)
        .iter()
        .map(|c| c.title_requirement.describe())
        .collect();
    assert_eq!(order.len(), 3);
    assert!(order[0].contains(" to top "));
    assert!(order[1].contains(" to mid "));
    assert!(order[2].contains(" to target "));

    let mut ctx = EngineContext::new(&mut project, &TypeScriptImports, &config);
    let (_, report) = executor::run(&root, &mut ctx, &mut NoHook).await.unwrap();
    assert!(report.unimplemented.is_empty(), "{:?}", report.unimplemented);
    assert_eq!(report.implemented.len(), 5);

    let content = project.file("lib/chain.ts").unwrap();
    assert_eq!(content.matches("import { HandlerContext }").count(), 1);
    assert!(content.contains("function target(context: HandlerContext, x: string)"));
    assert!(content.contains("function mid(context: HandlerContext)"));
    assert!(content.contains("target(context, \"m\")"));
    assert!(content.contains("function top(context: HandlerContext)"));
    assert!(content.contains("return mid(context);"));

    // applying again changes nothing
    let mut ctx = EngineContext::new(&mut project, &TypeScriptImports, &config);
    let before = project_snapshot(&mut ctx).await;
    let (_, again) = executor::run(&root, &mut ctx, &mut NoHook).await.unwrap();
    assert!(again.implemented.is_empty());
    assert!(again
        .unimplemented
        .iter()
        .all(|u| u.message == ALREADY_APPLIED));
    assert_eq!(project_snapshot(&mut ctx).await, before);
}

const TEMPLATE_CHAIN: &str = r#"export function target(x: string) {
    return x;
}

function mid() {
    return `v=${target("m")}`;
}
"#;

const UTIL: &str = r#"export function unquote(s: string): string {
    return s.replace(/"/g, "");
}
"#;

#[tokio::test]
async fn template_callers_gain_the_parameter_beside_regex_sources() {
    let mut project = Project::in_memory([
        ("lib/chain.ts", TEMPLATE_CHAIN),
        ("lib/util.ts", UTIL),
    ]);
    let config = EngineConfig::default();
    let root = add_context(function("target", "lib/chain.ts", AccessLevel::PrivateFunction));

    let mut ctx = EngineContext::new(&mut project, &TypeScriptImports, &config);
    let (_, report) = executor::run(&root, &mut ctx, &mut NoHook).await.unwrap();
    assert!(report.unimplemented.is_empty(), "{:?}", report.unimplemented);

    let content = project.file("lib/chain.ts").unwrap();
    assert!(content.contains("function mid(context: HandlerContext)"));
    assert!(content.contains("`v=${target(context, \"m\")}`"));
    assert_eq!(project.file("lib/util.ts"), Some(UTIL));
}

async fn project_snapshot(ctx: &mut EngineContext<'_>) -> String {
    ctx.tree.read_file("lib/chain.ts").await.unwrap().unwrap()
}

const LIBRARY_CONFIG: &str = r#"version: "1.0"
name: friendly-lib
package: "@friendly/lib"
"#;

const GIVE: &str = r#"export function giveMeYourContext(stuff: string): string {
    return "I need your context and " + stuff;
}
"#;

const USES: &str = r#"import { giveMeYourContext } from "@friendly/lib";

export function usesFriendly() {
    return giveMeYourContext("and your stuff");
}
"#;

const USES_AFTER: &str = r#"import { HandlerContext } from "@atomist/automation-client";
import { giveMeYourContext } from "@friendly/lib";

export function usesFriendly(context: HandlerContext) {
    return giveMeYourContext(context, "and your stuff");
}
"#;

#[tokio::test]
async fn migration_replays_in_downstream_codebase() {
    let library_dir = tempfile::tempdir().unwrap();
    let lib = library_dir.path();
    write(lib, "cascade.yaml", LIBRARY_CONFIG);
    write(lib, "package.json", "{\"name\": \"@friendly/lib\", \"version\": \"1.1.0\"}\n");
    write(lib, "CHANGELOG.md", "# Changelog\n\n## [Unreleased]\n\n### Changed\n\n## [1.0.0]\n");
    write(lib, "lib/giveMeYourContext.ts", GIVE);

    // library side: change the signature and record the migration
    let library_config = parser::load_project_config(lib).unwrap();
    let mut library = Project::open(lib, &[".cascade"]).await.unwrap();
    let root = add_context(function(
        "giveMeYourContext",
        "lib/giveMeYourContext.ts",
        AccessLevel::PublicFunction,
    ));
    let mut ctx = EngineContext::new(&mut library, &TypeScriptImports, &library_config);
    let (_, report) = executor::run(&root, &mut ctx, &mut NoHook).await.unwrap();
    assert_eq!(report.implemented.len(), 2, "{:?}", report.unimplemented);

    assert!(read(lib, "lib/giveMeYourContext.ts")
        .contains("giveMeYourContext(context: HandlerContext, stuff: string)"));
    let artifact = "migration/1.1.0/add-parameter-context-handlercontext-to-givemeyourcontext-in-lib-givemeyourcontext-ts.json";
    let json = read(lib, artifact);
    assert!(json.contains("\"kind\": \"Add Parameter\""));
    assert!(json.contains("\"external\": true"));
    assert!(read(lib, "CHANGELOG.md").contains(
        "### Changed\n\n-   **BREAKING** Add parameter context: HandlerContext to giveMeYourContext in lib/giveMeYourContext.ts\n"
    ));

    // downstream side: replay against a consumer pinned to the older release
    let downstream_dir = tempfile::tempdir().unwrap();
    let down = downstream_dir.path();
    write(
        down,
        "package.json",
        "{\"name\": \"consumer\", \"dependencies\": {\"@friendly/lib\": \"^1.0.0\"}}\n",
    );
    write(down, "lib/usesFriendly.ts", USES);

    let library = Project::open(lib, &[".cascade"]).await.unwrap();
    let config = parser::load_project_config(down).unwrap();
    let mut downstream = Project::open(down, &[".cascade"]).await.unwrap();
    let mut hook = JournalHook::new(down.join(".cascade"), "r-upgrade");
    let mut ctx = EngineContext::new(&mut downstream, &TypeScriptImports, &config);
    let report = migration::propagate(&library, &library_config, &mut ctx, &mut hook)
        .await
        .unwrap();

    assert_eq!(read(down, "lib/usesFriendly.ts"), USES_AFTER);
    assert_eq!(report.implemented.len(), 2);
    assert_eq!(report.unimplemented.len(), 1);
    assert!(report.unimplemented[0]
        .message
        .starts_with("declared in another codebase"));

    let events = eventlog::read_events(&down.join(".cascade")).unwrap();
    assert!(matches!(
        &events[0].event,
        ProvenanceEvent::MigrationReplayed { version, .. } if version == "1.1.0"
    ));
    assert_eq!(hook.changesets(), 2);
}

#[tokio::test]
async fn up_to_date_downstream_replays_nothing() {
    let library = Project::in_memory([
        ("migration/1.1.0/x.json", "{\"kind\": \"Nope\"}"),
        ("package.json", "{\"version\": \"1.1.0\"}"),
    ]);
    let library_config = EngineConfig {
        package: Some("@friendly/lib".to_string()),
        ..EngineConfig::default()
    };
    let mut downstream = Project::in_memory([
        ("package.json", "{\"dependencies\": {\"@friendly/lib\": \"1.1.0\"}}"),
        ("lib/usesFriendly.ts", USES),
    ]);
    let config = EngineConfig::default();
    let mut ctx = EngineContext::new(&mut downstream, &TypeScriptImports, &config);
    let report = migration::propagate(&library, &library_config, &mut ctx, &mut NoHook)
        .await
        .unwrap();
    assert!(report.implemented.is_empty());
    assert!(report.unimplemented.is_empty());
    assert_eq!(downstream.file("lib/usesFriendly.ts"), Some(USES));
}

#[tokio::test]
async fn changelog_second_record_is_a_no_op() {
    let mut project = Project::in_memory([(
        "CHANGELOG.md",
        "# Changelog\n\n## [Unreleased]\n\n### Changed\n",
    )]);
    let first = changelog::prepare_breaking_change(&project, "CHANGELOG.md", "Drop foo")
        .await
        .unwrap();
    let ChangelogUpdate::Updated(content) = first else {
        panic!("expected an update, got {:?}", first);
    };
    project.write_file("CHANGELOG.md", content).await.unwrap();
    project.flush().await.unwrap();

    let second = changelog::prepare_breaking_change(&project, "CHANGELOG.md", "Drop foo")
        .await
        .unwrap();
    assert_eq!(second, ChangelogUpdate::AlreadyUpdated);
    assert_eq!(
        project.file("CHANGELOG.md").unwrap().matches("**BREAKING** Drop foo").count(),
        1
    );
}
