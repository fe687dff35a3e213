//! Shared test scaffolding: a `TIX_ROOT` guard so integration tests
//! never touch the real working tree's `.tix/` directory.

use std::ffi::OsString;
use std::path::PathBuf;

/// RAII guard that points `TIX_ROOT` at a fresh temp directory for the
/// life of the test, restoring whatever was there before on drop.
pub struct RootGuard {
    dir: tempfile::TempDir,
    original: Option<OsString>,
}

impl RootGuard {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let original = std::env::var_os("TIX_ROOT");
        // SAFETY: tests using this guard are marked #[serial].
        unsafe { std::env::set_var("TIX_ROOT", dir.path().join(".tix")) };
        RootGuard { dir, original }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join(".tix")
    }
}

impl Drop for RootGuard {
    fn drop(&mut self) {
        // SAFETY: tests using this guard are marked #[serial].
        unsafe {
            match &self.original {
                Some(v) => std::env::set_var("TIX_ROOT", v),
                None => std::env::remove_var("TIX_ROOT"),
            }
        }
    }
}
