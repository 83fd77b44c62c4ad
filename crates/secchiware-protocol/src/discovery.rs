//! Discovery of installed test packages.
//!
//! `discover` walks a test root and produces an immutable [`Registry`]
//! snapshot: the wire tree plus every runnable definition, keyed by
//! canonical name. Services keep the current snapshot behind an atomic
//! swap; a failed rediscovery leaves the previous snapshot in service.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::manifest::{
    validate_identifier, CommandSpec, ManifestError, ModuleManifest, Probe, MANIFEST_EXTENSION,
};
use crate::package::{ModuleInfo, PackageIndex, PackageInfo, TestSetInfo};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to read test root: {0}")]
    Io(#[from] io::Error),

    #[error("{path}: {source}")]
    Manifest {
        path: PathBuf,
        source: ManifestError,
    },
}

/// A runnable test definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTest {
    pub name: String,
    pub description: String,
    pub probe: Probe,
}

/// A test set with its fixtures, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSet {
    /// Canonical dotted name, e.g. `p1.m.FilesystemSet`.
    pub canonical: String,
    pub description: String,
    pub setup: Option<CommandSpec>,
    pub teardown: Option<CommandSpec>,
    /// Sorted by test name.
    pub tests: Vec<LoadedTest>,
}

/// An immutable snapshot of everything installed under a test root.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    packages: PackageIndex,
    package_names: BTreeSet<String>,
    module_names: BTreeSet<String>,
    sets: BTreeMap<String, LoadedSet>,
}

impl Registry {
    /// The wire tree served by `GET /test_sets`.
    pub fn packages(&self) -> &[PackageInfo] {
        self.packages.as_slice()
    }

    pub fn package_names(&self) -> &BTreeSet<String> {
        &self.package_names
    }

    pub fn module_names(&self) -> &BTreeSet<String> {
        &self.module_names
    }

    pub fn sets(&self) -> &BTreeMap<String, LoadedSet> {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

/// Walks `root` and builds a fresh snapshot.
///
/// Directories are packages, `*.toml` files are modules; both are visited
/// in alphabetical order. Entries whose names would not survive canonical
/// naming are rejected, not skipped.
pub fn discover(root: &Path) -> Result<Registry, DiscoveryError> {
    let mut registry = Registry::default();
    let mut roots = Vec::new();
    for entry in sorted_entries(root)? {
        if entry.is_dir() {
            let package = walk_package(&entry, "", &mut registry)?;
            roots.push(package);
        }
    }
    registry.packages = PackageIndex::new(roots);
    Ok(registry)
}

fn walk_package(
    dir: &Path,
    prefix: &str,
    registry: &mut Registry,
) -> Result<PackageInfo, DiscoveryError> {
    let name = file_name(dir)?;
    let canonical = if prefix.is_empty() {
        name.clone()
    } else {
        format!("{prefix}.{name}")
    };
    registry.package_names.insert(canonical.clone());

    let mut subpackages = Vec::new();
    let mut modules = Vec::new();
    for entry in sorted_entries(dir)? {
        if entry.is_dir() {
            subpackages.push(walk_package(&entry, &canonical, registry)?);
        } else if entry.extension().is_some_and(|e| e == MANIFEST_EXTENSION) {
            modules.push(load_module(&entry, &canonical, registry)?);
        }
    }

    Ok(PackageInfo {
        name,
        subpackages,
        modules,
    })
}

fn load_module(
    path: &Path,
    package: &str,
    registry: &mut Registry,
) -> Result<ModuleInfo, DiscoveryError> {
    let name = module_name(path)?;
    let canonical = format!("{package}.{name}");

    let source = fs::read_to_string(path)?;
    let manifest = ModuleManifest::parse(&source).map_err(|source| DiscoveryError::Manifest {
        path: path.to_path_buf(),
        source,
    })?;
    registry.module_names.insert(canonical.clone());

    let mut set_infos = Vec::new();
    for set in manifest.test_sets {
        let set_canonical = format!("{canonical}.{}", set.name);
        let mut tests: Vec<LoadedTest> = set
            .tests
            .into_iter()
            .map(|t| LoadedTest {
                description: if t.description.is_empty() {
                    set.description.clone()
                } else {
                    t.description
                },
                name: t.name,
                probe: t.probe,
            })
            .collect();
        tests.sort_by(|a, b| a.name.cmp(&b.name));

        set_infos.push(TestSetInfo {
            name: set.name.clone(),
            tests: tests.iter().map(|t| t.name.clone()).collect(),
        });
        registry.sets.insert(
            set_canonical.clone(),
            LoadedSet {
                canonical: set_canonical,
                description: set.description,
                setup: set.setup,
                teardown: set.teardown,
                tests,
            },
        );
    }
    set_infos.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(ModuleInfo {
        name,
        test_sets: set_infos,
    })
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with('.'))
        })
        .collect();
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> Result<String, DiscoveryError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    check_name(&name, path)?;
    Ok(name)
}

fn module_name(path: &Path) -> Result<String, DiscoveryError> {
    let name = path
        .file_stem()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    check_name(&name, path)?;
    Ok(name)
}

fn check_name(name: &str, path: &Path) -> Result<(), DiscoveryError> {
    validate_identifier(name).map_err(|source| DiscoveryError::Manifest {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;

    pub(crate) const MODULE_A: &str = r#"
[[test_set]]
name = "S"
description = "Sample set"

[[test_set.test]]
name = "a"
description = "first"
probe = { kind = "env_var", name = "SECCHIWARE_MISSING", expect = "absent" }

[[test_set.test]]
name = "b"
description = "second"
probe = { kind = "path_exists", path = "/", expect = "present" }
"#;

    pub(crate) const MODULE_C: &str = r#"
[[test_set]]
name = "T"

[[test_set.test]]
name = "c"
probe = { kind = "command", program = "true" }
"#;

    /// Builds `p1/m.toml` (tests a, b) and `p2/m.toml` (test c) under a
    /// fresh temp root.
    pub(crate) fn sample_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("p1")).unwrap();
        fs::write(dir.path().join("p1/m.toml"), MODULE_A).unwrap();
        fs::create_dir(dir.path().join("p2")).unwrap();
        fs::write(dir.path().join("p2/m.toml"), MODULE_C).unwrap();
        dir
    }

    #[test]
    fn discovers_packages_alphabetically() {
        let root = sample_root();
        let registry = discover(root.path()).unwrap();
        let names: Vec<&str> = registry.packages().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2"]);
        assert!(registry.package_names().contains("p1"));
        assert!(registry.module_names().contains("p1.m"));
        assert!(registry.sets().contains_key("p1.m.S"));
        assert_eq!(registry.sets()["p1.m.S"].tests.len(), 2);
    }

    #[test]
    fn nested_packages_get_dotted_names() {
        let root = sample_root();
        fs::create_dir(root.path().join("p1/sub")).unwrap();
        fs::write(root.path().join("p1/sub/inner.toml"), MODULE_C).unwrap();
        let registry = discover(root.path()).unwrap();
        assert!(registry.package_names().contains("p1.sub"));
        assert!(registry.sets().contains_key("p1.sub.inner.T"));
    }

    #[test]
    fn tests_inherit_set_description() {
        let root = sample_root();
        let registry = discover(root.path()).unwrap();
        let set = &registry.sets()["p2.m.T"];
        assert_eq!(set.tests[0].description, "");
        let described = &registry.sets()["p1.m.S"];
        assert_eq!(described.tests[0].description, "first");
    }

    #[test]
    fn broken_manifest_fails_discovery() {
        let root = sample_root();
        fs::write(root.path().join("p1/broken.toml"), "not valid [[").unwrap();
        assert!(matches!(
            discover(root.path()),
            Err(DiscoveryError::Manifest { .. })
        ));
    }

    #[test]
    fn loose_files_at_the_root_are_ignored() {
        let root = sample_root();
        fs::write(root.path().join("README.md"), "notes").unwrap();
        let registry = discover(root.path()).unwrap();
        assert_eq!(registry.packages().len(), 2);
    }
}
