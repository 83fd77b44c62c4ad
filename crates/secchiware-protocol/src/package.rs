//! Wire model of the installed-test tree.
//!
//! A package is a named node holding subpackages and modules; modules hold
//! test sets; test sets hold test names. The JSON schema leaves collections
//! unordered, but enumeration here is always alphabetical so that two
//! listings of the same tree are byte-identical.

use serde::{Deserialize, Serialize};

/// A named grouping of tests inside a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSetInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<String>,
}

/// A manifest file inside a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub test_sets: Vec<TestSetInfo>,
}

/// A recursive package node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subpackages: Vec<PackageInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<ModuleInfo>,
}

impl PackageInfo {
    /// Appends the canonical names of every test under this package to
    /// `out`, prefixed with the canonical name of the package itself.
    pub fn collect_canonical_tests(&self, prefix: &str, out: &mut Vec<String>) {
        let base = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{prefix}.{}", self.name)
        };
        for module in &self.modules {
            for set in &module.test_sets {
                for test in &set.tests {
                    out.push(format!("{base}.{}.{}.{test}", module.name, set.name));
                }
            }
        }
        for sub in &self.subpackages {
            sub.collect_canonical_tests(&base, out);
        }
    }
}

/// A list of root packages kept sorted by name.
///
/// Insertion replaces an existing package with the same name; lookups and
/// deletions use binary search. This is the single source of truth services
/// expose through `GET /test_sets`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageIndex {
    packages: Vec<PackageInfo>,
}

impl PackageIndex {
    pub fn new(mut packages: Vec<PackageInfo>) -> Self {
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        packages.dedup_by(|a, b| a.name == b.name);
        Self { packages }
    }

    pub fn as_slice(&self) -> &[PackageInfo] {
        &self.packages
    }

    pub fn get(&self, name: &str) -> Option<&PackageInfo> {
        self.packages
            .binary_search_by(|p| p.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.packages[i])
    }

    /// Inserts a package, replacing any existing one with the same name.
    pub fn insert(&mut self, package: PackageInfo) {
        match self
            .packages
            .binary_search_by(|p| p.name.cmp(&package.name))
        {
            Ok(i) => self.packages[i] = package,
            Err(i) => self.packages.insert(i, package),
        }
    }

    /// Removes a package by name. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.packages.binary_search_by(|p| p.name.as_str().cmp(name)) {
            Ok(i) => {
                self.packages.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Canonical names of every installed test, in enumeration order.
    pub fn canonical_tests(&self) -> Vec<String> {
        let mut out = Vec::new();
        for package in &self.packages {
            package.collect_canonical_tests("", &mut out);
        }
        out
    }
}
