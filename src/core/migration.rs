//! CS-009: Downstream migrations.
//!
//! A library records each externally visible AddParameter as a JSON artifact
//! under `<migration_dir>/<library-version>/<slug>.json`. Downstream
//! codebases replay the artifacts newer than the library version their
//! manifest declares, through the same planner and executor.

use super::changelog::{self, ChangelogUpdate};
use super::context::EngineContext;
use super::error::{EngineError, TreeError};
use super::executor::{self, ChangesetHook};
use super::requirement::{deserialize_requirement, serialize_requirement, ALREADY_APPLIED};
use super::types::*;
use crate::tree::SourceTree;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use tracing::{info, warn};

static SLUG_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("slug pattern must compile"));

static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:\^|~|>=|=|v)*\s*(\d+)\.(\d+)\.(\d+)").expect("version pattern must compile")
});

/// Manifest sections that may declare the library.
const DEPENDENCY_SECTIONS: &[&str] = &["dependencies", "devDependencies", "peerDependencies"];

/// Lowercase, runs of anything else collapsed to `-`.
pub fn slugify(description: &str) -> String {
    let lower = description.to_lowercase();
    let slug = SLUG_SEPARATOR.replace_all(&lower, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "migration".to_string()
    } else {
        slug.to_string()
    }
}

pub fn artifact_path(dir: &str, version: &str, description: &str) -> String {
    format!(
        "{}/{}/{}.json",
        dir.trim_end_matches('/'),
        version,
        slugify(description)
    )
}

/// Semantic version triple. Pre-release and build suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parse `1.2.3`, also behind a range operator or `v` prefix.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION.captures(text)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

async fn read_manifest(
    tree: &dyn SourceTree,
    path: &str,
) -> Result<Option<serde_json::Value>, EngineError> {
    let Some(content) = tree.read_file(path).await? else {
        return Ok(None);
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| EngineError::Manifest {
            path: path.to_string(),
            message: e.to_string(),
        })
}

/// The codebase's own version from its manifest.
pub async fn library_version(
    tree: &dyn SourceTree,
    config: &EngineConfig,
) -> Result<String, EngineError> {
    let manifest = read_manifest(tree, &config.manifest)
        .await?
        .ok_or_else(|| EngineError::Manifest {
            path: config.manifest.clone(),
            message: "file not found".to_string(),
        })?;
    manifest
        .get("version")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| EngineError::Manifest {
            path: config.manifest.clone(),
            message: "no version field".to_string(),
        })
}

/// The version of `package` a manifest depends on.
pub fn declared_dependency_version(manifest: &serde_json::Value, package: &str) -> Option<Version> {
    DEPENDENCY_SECTIONS
        .iter()
        .filter_map(|section| manifest.get(*section)?.get(package)?.as_str())
        .find_map(Version::parse)
}

/// Persist the downstream requirement and note the breaking change.
pub async fn record(
    req: &AddMigration,
    this: &Requirement,
    ctx: &mut EngineContext<'_>,
) -> Result<Report, EngineError> {
    let downstream = &req.downstream_requirement;
    let version = library_version(&*ctx.tree, ctx.config).await?;
    let description = downstream.describe();
    let path = artifact_path(&ctx.config.migration_dir, &version, &description);
    let content = format!("{}\n", serialize_requirement(downstream)?);

    let changelog_path = &ctx.config.changelog;

    let artifact = match ctx.tree.read_file(&path).await? {
        Some(existing) if existing == content => None,
        _ => Some(content),
    };
    let notes = match changelog::prepare_breaking_change(&*ctx.tree, changelog_path, &description)
        .await?
    {
        ChangelogUpdate::Updated(new) => Some(new),
        _ => None,
    };
    if artifact.is_none() && notes.is_none() {
        return Ok(Report::unimplemented(this.clone(), ALREADY_APPLIED));
    }

    // both files are checked before either is written
    for (target, pending) in [(&path, &artifact), (changelog_path, &notes)] {
        if pending.is_some() && ctx.tree.has_staged_edits(target) {
            return Err(TreeError::PendingEdits(target.clone()).into());
        }
    }
    if let Some(content) = artifact {
        ctx.tree.write_file(&path, content).await?;
    }
    if let Some(new) = notes {
        ctx.tree.write_file(changelog_path, new).await?;
    }
    info!(artifact = %path, version = %version, "recorded migration");
    Ok(Report::implemented(this.clone()))
}

/// A library artifact selected for replay.
#[derive(Debug, Clone)]
pub struct PendingMigration {
    /// Directory name the artifact was recorded under.
    pub version: String,
    pub parsed: Option<Version>,
    pub path: String,
    pub content: String,
}

/// Artifacts recorded in `library`, ascending by version then path.
/// With `since`, only versions strictly newer are kept.
pub async fn gather(
    library: &dyn SourceTree,
    config: &EngineConfig,
    since: Option<&Version>,
) -> Result<Vec<PendingMigration>, EngineError> {
    let dir = config.migration_dir.trim_end_matches('/');
    let glob = format!("{}/*/*.json", glob::Pattern::escape(dir));
    let mut pending = Vec::new();

    for path in library.paths(&glob).await? {
        let Some(version) = path
            .strip_prefix(dir)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.split('/').next())
        else {
            warn!(artifact = %path, dir = %dir, "artifact outside the migration directory, skipping");
            continue;
        };
        let version = version.to_string();
        let parsed = Version::parse(&version);
        match (since, parsed) {
            (Some(since), Some(v)) if v <= *since => continue,
            (Some(_), None) => {
                warn!(artifact = %path, "unversioned migration, replaying anyway")
            }
            _ => {}
        }
        let Some(content) = library.read_file(&path).await? else {
            continue;
        };
        pending.push(PendingMigration {
            version,
            parsed,
            path,
            content,
        });
    }

    pending.sort_by(|a, b| {
        (a.parsed.is_none(), a.parsed, &a.path).cmp(&(b.parsed.is_none(), b.parsed, &b.path))
    });
    Ok(pending)
}

/// Replay one artifact against the downstream codebase.
pub async fn replay(
    migration: &PendingMigration,
    ctx: &mut EngineContext<'_>,
    hook: &mut dyn ChangesetHook,
) -> Result<Report, EngineError> {
    hook.before_migration(migration).await?;
    let requirement = deserialize_requirement(&migration.content, &migration.path)?;
    info!(
        artifact = %migration.path,
        requirement = %requirement.describe(),
        "replaying migration"
    );
    let (_, report) = executor::run(&requirement, ctx, hook).await?;
    Ok(report)
}

/// Replay the library's pending migrations downstream, in order.
pub async fn propagate(
    library: &dyn SourceTree,
    library_config: &EngineConfig,
    downstream: &mut EngineContext<'_>,
    hook: &mut dyn ChangesetHook,
) -> Result<Report, EngineError> {
    let package = library_config
        .package
        .as_deref()
        .unwrap_or(&library_config.name);

    let manifest = match read_manifest(&*downstream.tree, &downstream.config.manifest).await {
        Ok(manifest) => manifest,
        Err(e) => {
            warn!(error = %e, "unreadable downstream manifest");
            None
        }
    };
    let since = manifest
        .as_ref()
        .and_then(|m| declared_dependency_version(m, package));
    if since.is_none() {
        warn!(
            package = %package,
            "downstream declares no version of the library, replaying all migrations"
        );
    }

    let pending = gather(library, library_config, since.as_ref()).await?;
    info!(
        package = %package,
        since = ?since,
        migrations = pending.len(),
        "propagating migrations"
    );

    let mut report = Report::default();
    for migration in &pending {
        report.extend(replay(migration, downstream, hook).await?);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::NoHook;
    use crate::core::requirement::fixtures::*;
    use crate::tree::imports::TypeScriptImports;
    use crate::tree::project::Project;
    use crate::tree::{MatchedNode, NodeKind};
    use proptest::prelude::*;

    const CHANGELOG: &str = "# Changelog\n\n## [Unreleased]\n\n### Changed\n";

    fn library() -> Project {
        Project::in_memory([
            ("lib/a.ts", "export function target(x: string) { }\n"),
            ("package.json", "{\"name\": \"@friendly/lib\", \"version\": \"1.2.0\"}"),
            ("CHANGELOG.md", CHANGELOG),
        ])
    }

    fn migration() -> Requirement {
        let mut inner = add_context("target", "lib/a.ts", AccessLevel::PublicFunction);
        if let RequirementKind::AddParameter(p) = &mut inner.change {
            p.external = true;
        }
        Requirement::from(AddMigration {
            downstream_requirement: Box::new(inner),
        })
    }

    #[test]
    fn test_cs009_slugify() {
        assert_eq!(
            slugify("Add parameter context: HandlerContext to target in lib/a.ts"),
            "add-parameter-context-handlercontext-to-target-in-lib-a-ts"
        );
        assert_eq!(slugify("  ::  "), "migration");
    }

    #[test]
    fn test_cs009_artifact_path() {
        assert_eq!(
            artifact_path("migration/", "1.2.0", "Add X"),
            "migration/1.2.0/add-x.json"
        );
    }

    #[test]
    fn test_cs009_version_parse_and_order() {
        assert_eq!(
            Version::parse("^1.2.3"),
            Some(Version { major: 1, minor: 2, patch: 3 })
        );
        assert_eq!(Version::parse(">=0.10.0").map(|v| v.to_string()), Some("0.10.0".to_string()));
        assert_eq!(Version::parse("v2.0.0-beta.1").map(|v| v.major), Some(2));
        assert_eq!(Version::parse("latest"), None);
        assert!(Version::parse("0.10.0") > Version::parse("0.9.9"));
    }

    #[test]
    fn test_cs009_declared_dependency_version() {
        let manifest: serde_json::Value = serde_json::from_str(
            r#"{"dependencies": {"other": "1.0.0"}, "devDependencies": {"@friendly/lib": "~1.1.0"}}"#,
        )
        .unwrap();
        assert_eq!(
            declared_dependency_version(&manifest, "@friendly/lib").map(|v| v.to_string()),
            Some("1.1.0".to_string())
        );
        assert_eq!(declared_dependency_version(&manifest, "missing"), None);
    }

    #[tokio::test]
    async fn test_cs009_record_writes_artifact_and_changelog() {
        let mut p = library();
        let config = EngineConfig::default();
        let mut ctx = EngineContext::new(&mut p, &TypeScriptImports, &config);
        let req = migration();

        let first = req.implement(&mut ctx).await.unwrap();
        assert_eq!(first.implemented.len(), 1);
        ctx.tree.flush().await.unwrap();
        let second = req.implement(&mut ctx).await.unwrap();
        assert_eq!(second.unimplemented[0].message, ALREADY_APPLIED);

        let path = "migration/1.2.0/add-parameter-context-handlercontext-to-target-in-lib-a-ts.json";
        let artifact = p.file(path).expect("artifact written");
        assert!(artifact.ends_with("}\n"));
        let back = deserialize_requirement(artifact, path).unwrap();
        let RequirementKind::AddMigration(m) = &req.change else {
            unreachable!()
        };
        assert!(back.same_requirement(&m.downstream_requirement));

        let changelog = p.file("CHANGELOG.md").unwrap();
        assert_eq!(changelog.matches("**BREAKING** Add parameter context").count(), 1);
    }

    #[tokio::test]
    async fn test_cs009_record_checks_both_files_before_writing() {
        let mut p = library();
        let head = MatchedNode {
            file_path: "CHANGELOG.md".to_string(),
            kind: NodeKind::FileHead,
            value: String::new(),
            span: 0..0,
        };
        p.stage(&head, "<!-- pending -->\n".to_string()).unwrap();
        let config = EngineConfig::default();
        let mut ctx = EngineContext::new(&mut p, &TypeScriptImports, &config);

        let err = migration().implement(&mut ctx).await.unwrap_err();
        assert!(matches!(
            &err,
            EngineError::Tree(TreeError::PendingEdits(path)) if path == "CHANGELOG.md"
        ));
        assert!(p.paths("migration/**/*.json").await.unwrap().is_empty());
        assert_eq!(p.file("CHANGELOG.md"), Some(CHANGELOG));
    }

    #[tokio::test]
    async fn test_cs009_gather_strips_trailing_slash_from_dir() {
        let p = Project::in_memory([
            ("docs/migration/1.0.0/a.json", "{}"),
            ("docs/migration-old/0.1.0/b.json", "{}"),
        ]);
        let config = EngineConfig {
            migration_dir: "docs/migration/".to_string(),
            ..EngineConfig::default()
        };
        let found = gather(&p, &config, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].version, "1.0.0");
        assert_eq!(found[0].path, "docs/migration/1.0.0/a.json");
    }

    #[tokio::test]
    async fn test_cs009_record_without_manifest_fails() {
        let mut p = Project::in_memory([("lib/a.ts", "")]);
        let config = EngineConfig::default();
        let mut ctx = EngineContext::new(&mut p, &TypeScriptImports, &config);
        let err = migration().implement(&mut ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Manifest { .. }));
    }

    #[tokio::test]
    async fn test_cs009_gather_filters_and_sorts() {
        let p = Project::in_memory([
            ("migration/0.10.0/b.json", "{}"),
            ("migration/0.9.0/a.json", "{}"),
            ("migration/0.10.0/a.json", "{}"),
            ("migration/next/z.json", "{}"),
            ("migration/0.8.0/old.json", "{}"),
            ("migration/README.md", ""),
        ]);
        let config = EngineConfig::default();

        let all = gather(&p, &config, None).await.unwrap();
        let paths: Vec<_> = all.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "migration/0.8.0/old.json",
                "migration/0.9.0/a.json",
                "migration/0.10.0/a.json",
                "migration/0.10.0/b.json",
                "migration/next/z.json",
            ]
        );

        let since = Version::parse("0.9.0").unwrap();
        let newer = gather(&p, &config, Some(&since)).await.unwrap();
        let versions: Vec<_> = newer.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["0.10.0", "0.10.0", "next"]);
    }

    #[tokio::test]
    async fn test_cs009_propagate_bad_artifact_is_fatal() {
        let library = Project::in_memory([("migration/1.0.0/bad.json", "{\"kind\": \"Nope\"}")]);
        let mut downstream = Project::in_memory([("lib/a.ts", "")]);
        let config = EngineConfig::default();
        let mut ctx = EngineContext::new(&mut downstream, &TypeScriptImports, &config);
        let err = propagate(&library, &config, &mut ctx, &mut NoHook)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("migration/1.0.0/bad.json"));
    }

    proptest! {
        #[test]
        fn test_cs009_prop_slug_is_path_safe(description in ".{0,80}") {
            let slug = slugify(&description);
            prop_assert!(!slug.is_empty());
            prop_assert!(!slug.starts_with('-') && !slug.ends_with('-'));
            prop_assert!(!slug.contains("--"));
            prop_assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        }
    }
}
