//! Test-bundle packing and unpacking.
//!
//! A bundle is a gzipped tar of one or more top-level package directories.
//! Unpacking replaces any existing package carried by the bundle
//! (delete-then-extract) and leaves every other installed package intact.
//! Entry names are validated before anything touches the filesystem: no
//! `..` segments, no absolute paths, no link entries.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder, EntryType};

use crate::manifest::{validate_identifier, ModuleManifest, MANIFEST_EXTENSION};

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("'{0}' is not a top level package")]
    NotTopLevel(String),

    #[error("no package found with name '{0}'")]
    UnknownPackage(String),

    #[error("unsafe bundle entry '{0}'")]
    UnsafeEntry(String),

    #[error("top level member '{0}' is not a package")]
    NotAPackage(String),

    #[error("invalid manifest '{0}': {1}")]
    InvalidManifest(String, crate::manifest::ManifestError),
}

/// Packs the named top-level packages from `root` into a gzipped tar.
///
/// Dotted names and names of packages that do not exist are errors: the
/// caller gets nothing rather than a partial bundle.
pub fn pack<W: Write>(writer: W, packages: &[String], root: &Path) -> Result<(), BundleError> {
    let mut builder = Builder::new(GzEncoder::new(writer, Compression::default()));
    for name in packages {
        if validate_identifier(name).is_err() {
            return Err(BundleError::NotTopLevel(name.clone()));
        }
        let path = root.join(name);
        if !path.is_dir() {
            return Err(BundleError::UnknownPackage(name.clone()));
        }
        builder.append_dir_all(name, &path)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Unpacks a bundle into `root`, returning the sorted names of the
/// top-level packages it carried.
///
/// The archive is validated in full before extraction starts, so a
/// malformed bundle never leaves the test root half-written.
pub fn unpack(bytes: &[u8], root: &Path) -> Result<Vec<String>, BundleError> {
    let mut top_dirs: Vec<String> = Vec::new();
    let mut manifest_owners: Vec<String> = Vec::new();
    let mut first_components: Vec<String> = Vec::new();

    let mut archive = Archive::new(GzDecoder::new(bytes));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?;
        let name = path
            .to_str()
            .ok_or_else(|| BundleError::UnsafeEntry(path.to_string_lossy().into_owned()))?
            .to_string();

        let (first, depth) = validate_entry_path(&name)?;
        match entry.header().entry_type() {
            EntryType::Directory => {
                if depth == 1 {
                    if !top_dirs.contains(&first) {
                        top_dirs.push(first.clone());
                    }
                }
            }
            EntryType::Regular => {
                if depth == 1 {
                    // A loose file at the top of the archive.
                    return Err(BundleError::NotAPackage(name));
                }
                if name.ends_with(&format!(".{MANIFEST_EXTENSION}")) {
                    // Manifests are parsed up front so a broken bundle is
                    // rejected before anything touches the test root.
                    let mut source = String::new();
                    entry.read_to_string(&mut source)?;
                    ModuleManifest::parse(&source)
                        .map_err(|e| BundleError::InvalidManifest(name.clone(), e))?;
                    if !manifest_owners.contains(&first) {
                        manifest_owners.push(first.clone());
                    }
                }
            }
            _ => return Err(BundleError::UnsafeEntry(name)),
        }

        if !first_components.contains(&first) {
            first_components.push(first);
        }
    }

    for first in &first_components {
        if !top_dirs.contains(first) {
            return Err(BundleError::NotAPackage(first.clone()));
        }
    }
    for dir in &top_dirs {
        if !manifest_owners.contains(dir) {
            return Err(BundleError::NotAPackage(dir.clone()));
        }
    }

    // Incoming packages replace installed ones wholesale.
    for dir in &top_dirs {
        let path = root.join(dir);
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        }
    }

    let mut archive = Archive::new(GzDecoder::new(bytes));
    for entry in archive.entries()? {
        let mut entry = entry?;
        entry.unpack_in(root)?;
    }

    top_dirs.sort();
    Ok(top_dirs)
}

/// Validates one entry name and returns its first component and depth.
///
/// Directory components must be canonical-name identifiers; the final
/// component of a file may additionally carry one extension.
fn validate_entry_path(name: &str) -> Result<(String, usize), BundleError> {
    if name.starts_with('/') || name.contains('\\') {
        return Err(BundleError::UnsafeEntry(name.to_string()));
    }
    let components: Vec<&str> = name
        .split('/')
        .filter(|c| !c.is_empty())
        .collect();
    if components.is_empty() || components.iter().any(|c| *c == ".." || *c == ".") {
        return Err(BundleError::UnsafeEntry(name.to_string()));
    }
    let trailing_file = !name.ends_with('/');
    for (i, component) in components.iter().enumerate() {
        let checked = if trailing_file && i == components.len() - 1 {
            component.split_once('.').map(|(stem, _)| stem).unwrap_or(component)
        } else {
            component
        };
        if validate_identifier(checked).is_err() {
            return Err(BundleError::UnsafeEntry(name.to_string()));
        }
    }
    Ok((components[0].to_string(), components.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{discover, tests::sample_root};

    fn packed(root: &Path, names: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        let names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        pack(&mut buf, &names, root).unwrap();
        buf
    }

    #[test]
    fn pack_unpack_round_trip_preserves_the_tree() {
        let source = sample_root();
        let bundle = packed(source.path(), &["p1", "p2"]);

        let target = tempfile::tempdir().unwrap();
        let installed = unpack(&bundle, target.path()).unwrap();
        assert_eq!(installed, vec!["p1".to_string(), "p2".to_string()]);

        let original = discover(source.path()).unwrap();
        let round_tripped = discover(target.path()).unwrap();
        assert_eq!(original.packages(), round_tripped.packages());

        // Installing the same bundle again yields the same tree.
        let installed = unpack(&bundle, target.path()).unwrap();
        assert_eq!(installed, vec!["p1".to_string(), "p2".to_string()]);
        let again = discover(target.path()).unwrap();
        assert_eq!(round_tripped.packages(), again.packages());
    }

    #[test]
    fn pack_rejects_dotted_and_unknown_names() {
        let source = sample_root();
        let mut buf = Vec::new();
        assert!(matches!(
            pack(&mut buf, &["p1.sub".to_string()], source.path()),
            Err(BundleError::NotTopLevel(_))
        ));
        assert!(matches!(
            pack(&mut buf, &["ghost".to_string()], source.path()),
            Err(BundleError::UnknownPackage(_))
        ));
    }

    #[test]
    fn unpack_replaces_existing_packages_and_keeps_others() {
        let source = sample_root();
        let bundle = packed(source.path(), &["p1"]);

        let target = sample_root();
        // A module that the incoming p1 does not carry.
        std::fs::write(
            target.path().join("p1/extra.toml"),
            crate::discovery::tests::MODULE_C,
        )
        .unwrap();

        unpack(&bundle, target.path()).unwrap();
        assert!(!target.path().join("p1/extra.toml").exists());
        assert!(target.path().join("p1/m.toml").exists());
        // p2 was not in the bundle and survives untouched.
        assert!(target.path().join("p2/m.toml").exists());
    }

    #[test]
    fn entry_path_validation_rejects_escapes() {
        for name in ["../evil.toml", "/abs/evil.toml", "pkg/../evil.toml", "pkg/./x", ""] {
            assert!(
                matches!(validate_entry_path(name), Err(BundleError::UnsafeEntry(_))),
                "accepted {name:?}"
            );
        }
        assert_eq!(
            validate_entry_path("pkg/sub/m.toml").unwrap(),
            ("pkg".to_string(), 3)
        );
    }

    #[test]
    fn loose_top_level_file_is_rejected() {
        let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        let data = b"[[test_set]]\nname = \"S\"\n";
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "loose.toml", data.as_slice())
            .unwrap();
        let bundle = builder.into_inner().unwrap().finish().unwrap();

        let target = tempfile::tempdir().unwrap();
        assert!(matches!(
            unpack(&bundle, target.path()),
            Err(BundleError::NotAPackage(_))
        ));
    }

    #[test]
    fn package_without_manifest_is_rejected() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir(source.path().join("empty")).unwrap();
        std::fs::write(source.path().join("empty/notes.txt"), "no manifests").unwrap();
        let bundle = packed(source.path(), &["empty"]);

        let target = tempfile::tempdir().unwrap();
        assert!(matches!(
            unpack(&bundle, target.path()),
            Err(BundleError::NotAPackage(_))
        ));
        assert!(!target.path().join("empty").exists());
    }
}
