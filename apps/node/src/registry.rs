//! The node's installed-test registry.
//!
//! Holds the current [`Registry`] snapshot behind an atomic swap. Reloads
//! build a whole new snapshot from disk and only replace the current one on
//! success, so a broken bundle can never leave the node without a working
//! tree. Filesystem mutations are serialized by a single writer lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use secchiware_protocol::discovery::{self, DiscoveryError, Registry};

pub struct SharedRegistry {
    root: PathBuf,
    current: RwLock<Arc<Registry>>,
    writer: Mutex<()>,
}

impl SharedRegistry {
    /// Discovers the test root and builds the initial snapshot.
    pub fn open(root: PathBuf) -> Result<Self, DiscoveryError> {
        let registry = discovery::discover(&root)?;
        Ok(Self {
            root,
            current: RwLock::new(Arc::new(registry)),
            writer: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The current snapshot. Cheap; safe to hold across an execution.
    pub fn snapshot(&self) -> Arc<Registry> {
        self.current.read().clone()
    }

    /// Serializes filesystem mutations of the test root.
    pub fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Rediscovers the test root and swaps in the new snapshot.
    ///
    /// On error the previous snapshot stays in service.
    pub fn reload(&self) -> Result<(), DiscoveryError> {
        let registry = discovery::discover(&self.root)?;
        *self.current.write() = Arc::new(registry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MODULE: &str = r#"
[[test_set]]
name = "S"

[[test_set.test]]
name = "a"
probe = { kind = "path_exists", path = "/" }
"#;

    #[test]
    fn reload_picks_up_new_packages() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SharedRegistry::open(dir.path().to_path_buf()).unwrap();
        assert!(registry.snapshot().is_empty());

        fs::create_dir(dir.path().join("p1")).unwrap();
        fs::write(dir.path().join("p1/m.toml"), MODULE).unwrap();
        registry.reload().unwrap();
        assert!(registry.snapshot().sets().contains_key("p1.m.S"));
    }

    #[test]
    fn failed_reload_keeps_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("p1")).unwrap();
        fs::write(dir.path().join("p1/m.toml"), MODULE).unwrap();
        let registry = SharedRegistry::open(dir.path().to_path_buf()).unwrap();

        fs::write(dir.path().join("p1/broken.toml"), "not [[ toml").unwrap();
        assert!(registry.reload().is_err());
        // The old snapshot is still served.
        assert!(registry.snapshot().sets().contains_key("p1.m.S"));
    }
}
