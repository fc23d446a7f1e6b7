//! CS-003: cascade.yaml parsing and validation.
//!
//! Parses the engine configuration and validates structural constraints:
//! - Version must be "1.0"
//! - Name must not be empty
//! - Test roots must be plain relative directories
//! - `source_glob` must compile

use super::types::EngineConfig;
use std::path::Path;

/// Name of the configuration file at a project root.
pub const CONFIG_FILE: &str = "cascade.yaml";

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a cascade.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<EngineConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a cascade.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<EngineConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Load `<root>/cascade.yaml`, or the defaults when the project has none.
/// The loaded config must validate.
pub fn load_project_config(root: &Path) -> Result<EngineConfig, String> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        tracing::debug!(root = %root.display(), "no {}, using defaults", CONFIG_FILE);
        return Ok(EngineConfig::default());
    }
    let config = parse_config_file(&path)?;
    let errors = validate_config(&config);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(format!("{}: {}", path.display(), messages.join("; ")));
    }
    Ok(config)
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &EngineConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(ValidationError {
            message: format!("version must be \"1.0\", got \"{}\"", config.version),
        });
    }

    if config.name.is_empty() {
        errors.push(ValidationError {
            message: "name must not be empty".to_string(),
        });
    }

    if config.test_roots.is_empty() {
        errors.push(ValidationError {
            message: "test_roots must list at least one directory".to_string(),
        });
    }
    for root in &config.test_roots {
        if root.trim().is_empty() {
            errors.push(ValidationError {
                message: "test root must not be empty".to_string(),
            });
        } else if root.contains(['*', '?', '[', ']']) {
            errors.push(ValidationError {
                message: format!("test root '{}' must be a directory, not a glob", root),
            });
        } else if root.starts_with('/') {
            errors.push(ValidationError {
                message: format!("test root '{}' must be relative to the project", root),
            });
        }
    }

    if let Err(e) = glob::Pattern::new(&config.source_glob) {
        errors.push(ValidationError {
            message: format!("source_glob '{}' is invalid: {}", config.source_glob, e),
        });
    }

    if let Some(message) = migration_dir_error(&config.migration_dir) {
        errors.push(ValidationError { message });
    }

    if config.package.as_deref().is_some_and(str::is_empty) {
        errors.push(ValidationError {
            message: "package must not be empty when set".to_string(),
        });
    }

    errors
}

/// Migration artifacts are matched as `<migration_dir>/*/*.json` against
/// tree-relative paths, so the directory must be a plain relative path.
fn migration_dir_error(dir: &str) -> Option<String> {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        return Some("migration_dir must not be empty".to_string());
    }
    if dir.starts_with('/') {
        return Some(format!("migration_dir '{}' must be relative to the project", dir));
    }
    if dir.contains(['*', '?', '[', ']', '\\']) {
        return Some(format!("migration_dir '{}' must be a directory, not a glob", dir));
    }
    if dir.split('/').any(|segment| matches!(segment, "" | "." | "..")) {
        return Some(format!(
            "migration_dir '{}' must not contain empty, '.' or '..' segments",
            dir
        ));
    }
    None
}

/// Template written by `cascade init`.
pub fn template(name: &str) -> String {
    format!(
        r#"version: "1.0"
name: {name}
# How downstream codebases import this one
# package: "@scope/{name}"
source_glob: "**/*.ts"
test_roots: [test]
migration_dir: migration
changelog: CHANGELOG.md
manifest: package.json
state_dir: .cascade
"#
    )
}
