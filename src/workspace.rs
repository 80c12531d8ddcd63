//! Isolated per-invocation workspaces.
//!
//! Every invocation (and every rectification-staging call inside one) gets
//! its own directory tree, so concurrent invocations can never observe or
//! mutate each other's artifacts. Isolation comes entirely from
//! collision-free naming; there is no locking.
//!
//! ## Naming
//!
//! A workspace is named `{prefix}_{unix_secs}_{pid}_{seq}` where `seq` is a
//! process-wide counter that increments on every acquire. The clock alone is
//! too coarse (two acquires in the same second collide) and the counter
//! alone resets across processes; the combination with the pid makes the
//! name unique across rapid repeated calls, across threads, and across
//! processes sharing one base directory.
//!
//! ## Release
//!
//! [`Workspace::release`] removes the whole tree and is idempotent:
//! "already gone" is success. Removal failures are logged and swallowed —
//! a cleanup hiccup must never override the pipeline's own result. A `Drop`
//! impl backstops release so the tree is reclaimed even on a panic path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Process-wide acquire counter; see module docs for the naming invariant.
static ACQUIRE_SEQ: AtomicU64 = AtomicU64::new(0);

/// An exclusively-owned transient directory tree.
///
/// Owned by exactly one invocation (outer workspace) or one rectification
/// call (inner staging). Never shared, never reused.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    released: bool,
}

impl Workspace {
    /// Create a fresh, guaranteed-unique workspace under `base`.
    ///
    /// The base directory is created if missing. The workspace root itself
    /// is created with `create_dir` (not `create_dir_all`) so an impossible
    /// name collision surfaces as an error instead of silent sharing.
    pub fn acquire(base: &Path, prefix: &str) -> std::io::Result<Workspace> {
        std::fs::create_dir_all(base)?;

        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let seq = ACQUIRE_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = format!("{prefix}_{secs}_{}_{seq}", std::process::id());

        let root = base.join(name);
        std::fs::create_dir(&root)?;
        debug!("workspace acquired: {}", root.display());

        Ok(Workspace {
            root,
            released: false,
        })
    }

    /// Path of the workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create (if needed) and return a named child directory.
    pub fn subdir(&self, name: &str) -> std::io::Result<PathBuf> {
        let dir = self.root.join(name);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Recursively remove the workspace.
    ///
    /// Safe to call whether the tree is fully populated, partially consumed,
    /// or already gone. Never returns an error: removal failures are logged
    /// at `warn` and suppressed.
    pub fn release(mut self) {
        self.remove_tree();
        self.released = true;
    }

    fn remove_tree(&self) {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!("workspace released: {}", self.root.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove workspace {}: {e}", self.root.display()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.released {
            self.remove_tree();
        }
    }
}
