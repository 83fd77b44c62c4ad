//! Declarative test manifests.
//!
//! A module is a TOML file declaring test sets; each test binds a probe,
//! a built-in primitive the runner knows how to execute. Test content
//! beyond these primitives is user material and stays out of the control
//! plane.
//!
//! ```toml
//! [[test_set]]
//! name = "FilesystemSet"
//! description = "Artifacts visible through the filesystem"
//!
//! [[test_set.test]]
//! name = "docker_env_file"
//! description = "Checks whether /.dockerenv exists"
//! probe = { kind = "path_exists", path = "/.dockerenv", expect = "absent" }
//! ```

use serde::Deserialize;

/// File extension of module manifests inside a package directory.
pub const MANIFEST_EXTENSION: &str = "toml";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid identifier '{0}': must be non-empty and free of '.', ',' and '/'")]
    InvalidIdentifier(String),

    #[error("duplicate test set '{0}' in module")]
    DuplicateTestSet(String),

    #[error("duplicate test '{0}' in test set")]
    DuplicateTest(String),
}

/// A fixture command run around a test set's tests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Expected outcome of a `command` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Success,
    Failure,
}

/// Expected state for presence probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    #[default]
    Present,
    Absent,
}

/// A built-in probe primitive.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Probe {
    /// Runs a program; exit status 0 counts as success.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        expect: Outcome,
    },
    /// Checks whether a filesystem path exists.
    PathExists {
        path: String,
        #[serde(default)]
        expect: Presence,
    },
    /// Checks whether an environment variable is set.
    EnvVar {
        name: String,
        #[serde(default)]
        expect: Presence,
    },
}

/// One declared test.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub probe: Probe,
}

/// One declared test set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TestSetManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub setup: Option<CommandSpec>,
    #[serde(default)]
    pub teardown: Option<CommandSpec>,
    #[serde(default, rename = "test")]
    pub tests: Vec<TestManifest>,
}

/// A parsed module manifest.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ModuleManifest {
    #[serde(default, rename = "test_set")]
    pub test_sets: Vec<TestSetManifest>,
}

impl ModuleManifest {
    /// Parses and validates a manifest from TOML source.
    pub fn parse(source: &str) -> Result<Self, ManifestError> {
        let manifest: ModuleManifest = toml::from_str(source)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), ManifestError> {
        let mut set_names = Vec::new();
        for set in &self.test_sets {
            validate_identifier(&set.name)?;
            if set_names.contains(&set.name.as_str()) {
                return Err(ManifestError::DuplicateTestSet(set.name.clone()));
            }
            set_names.push(&set.name);

            let mut test_names = Vec::new();
            for test in &set.tests {
                validate_identifier(&test.name)?;
                if test_names.contains(&test.name.as_str()) {
                    return Err(ManifestError::DuplicateTest(test.name.clone()));
                }
                test_names.push(&test.name);
            }
        }
        Ok(())
    }
}

/// Names become segments of dotted canonical paths and comma-separated
/// selector lists, so the separators are banned outright.
pub fn validate_identifier(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() || name.contains(['.', ',', '/', '\\']) || name.contains(char::is_whitespace)
    {
        return Err(ManifestError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[[test_set]]
name = "FilesystemSet"
description = "Artifacts visible through the filesystem"
setup = { program = "true" }

[[test_set.test]]
name = "docker_env_file"
description = "Checks whether /.dockerenv exists"
probe = { kind = "path_exists", path = "/.dockerenv", expect = "absent" }

[[test_set.test]]
name = "tracer_pid"
description = "Greps TracerPid out of /proc/self/status"
probe = { kind = "command", program = "grep", args = ["-q", "TracerPid:\t0", "/proc/self/status"] }
"#;

    #[test]
    fn parses_a_full_module() {
        let manifest = ModuleManifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.test_sets.len(), 1);
        let set = &manifest.test_sets[0];
        assert_eq!(set.name, "FilesystemSet");
        assert!(set.setup.is_some());
        assert!(set.teardown.is_none());
        assert_eq!(set.tests.len(), 2);
        assert!(matches!(
            set.tests[0].probe,
            Probe::PathExists {
                expect: Presence::Absent,
                ..
            }
        ));
        assert!(matches!(
            set.tests[1].probe,
            Probe::Command {
                expect: Outcome::Success,
                ..
            }
        ));
    }

    #[test]
    fn rejects_unknown_probe_kind() {
        let source = r#"
[[test_set]]
name = "S"

[[test_set.test]]
name = "t"
probe = { kind = "registry_read", key = "HKLM" }
"#;
        assert!(matches!(
            ModuleManifest::parse(source),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn rejects_dotted_names() {
        let source = r#"
[[test_set]]
name = "a.b"
"#;
        assert!(matches!(
            ModuleManifest::parse(source),
            Err(ManifestError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn rejects_duplicate_tests() {
        let source = r#"
[[test_set]]
name = "S"

[[test_set.test]]
name = "t"
probe = { kind = "env_var", name = "CI" }

[[test_set.test]]
name = "t"
probe = { kind = "env_var", name = "CI" }
"#;
        assert!(matches!(
            ModuleManifest::parse(source),
            Err(ManifestError::DuplicateTest(_))
        ));
    }
}
