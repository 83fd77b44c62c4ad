//! The master test-package repository.
//!
//! A directory of package trees in the same layout nodes use. Mutations
//! (bundle installs, package deletions) and replication packs run under
//! the broker mutex named by [`Repository::MUTEX`]; plain listings do not
//! take locks and tolerate eventual consistency.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use secchiware_protocol::bundle::{self, BundleError};
use secchiware_protocol::discovery::{self, DiscoveryError};
use secchiware_protocol::manifest::validate_identifier;
use secchiware_protocol::PackageInfo;

#[derive(Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Broker mutex serializing repository mutations across workers.
    pub const MUTEX: &'static str = "repository";

    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the repository directory if it does not exist yet.
    pub fn ensure(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    /// The repository's `PackageInfo` trees, alphabetically.
    pub fn list(&self) -> Result<Vec<PackageInfo>, DiscoveryError> {
        Ok(discovery::discover(&self.root)?.packages().to_vec())
    }

    /// Installs a bundle, replacing the packages it carries.
    pub fn install(&self, bundle_bytes: &[u8]) -> Result<Vec<String>, BundleError> {
        bundle::unpack(bundle_bytes, &self.root)
    }

    /// Removes a root package. Returns false when it does not exist.
    pub fn delete(&self, package: &str) -> io::Result<bool> {
        if validate_identifier(package).is_err() {
            return Ok(false);
        }
        let path = self.root.join(package);
        if !path.is_dir() {
            return Ok(false);
        }
        fs::remove_dir_all(path)?;
        Ok(true)
    }

    /// Packs the named packages into a bundle for replication.
    pub fn pack(&self, packages: &[String]) -> Result<Vec<u8>, BundleError> {
        let mut bundle_bytes = Vec::new();
        bundle::pack(&mut bundle_bytes, packages, &self.root)?;
        Ok(bundle_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULE: &str = r#"
[[test_set]]
name = "S"

[[test_set.test]]
name = "a"
probe = { kind = "path_exists", path = "/" }
"#;

    fn repository() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::new(dir.path().to_path_buf());
        repo.ensure().unwrap();
        fs::create_dir(dir.path().join("p1")).unwrap();
        fs::write(dir.path().join("p1/m.toml"), MODULE).unwrap();
        (dir, repo)
    }

    #[test]
    fn pack_then_install_round_trips() {
        let (_dir, source) = repository();
        let bundle_bytes = source.pack(&["p1".to_string()]).unwrap();

        let target_dir = tempfile::tempdir().unwrap();
        let target = Repository::new(target_dir.path().to_path_buf());
        target.ensure().unwrap();
        let installed = target.install(&bundle_bytes).unwrap();
        assert_eq!(installed, vec!["p1".to_string()]);
        assert_eq!(source.list().unwrap(), target.list().unwrap());
    }

    #[test]
    fn delete_reports_missing_packages() {
        let (_dir, repo) = repository();
        assert!(repo.delete("p1").unwrap());
        assert!(!repo.delete("p1").unwrap());
        // Traversal-shaped names are simply not found.
        assert!(!repo.delete("../p1").unwrap());
        assert!(repo.list().unwrap().is_empty());
    }

    #[test]
    fn pack_of_unknown_package_fails() {
        let (_dir, repo) = repository();
        assert!(matches!(
            repo.pack(&["ghost".to_string()]),
            Err(BundleError::UnknownPackage(_))
        ));
    }
}
