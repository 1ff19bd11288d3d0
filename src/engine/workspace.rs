//! Per-run workspace
//!
//! Each run gets an exclusive temporary directory holding its source file.
//! The directory is bind-mounted read-write into the container and removed
//! during teardown.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::core::{ExecutionError, ExecutionResult};

/// Exclusive temporary directory for one run
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace under `root` (system temp dir if `None`)
    pub fn create(run_id: &str, root: Option<&Path>) -> ExecutionResult<Self> {
        let prefix = format!("run-{}-", run_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| ExecutionError::workspace("create workspace", e))?;

        // Runner images may use an unprivileged user that compiles into
        // the workspace (javac writes Main.class next to the source)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o777))
                .map_err(|e| ExecutionError::workspace("set workspace permissions", e))?;
        }

        debug!("Created workspace {:?} for run {}", dir.path(), run_id);
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the submitted source under `file_name`
    pub async fn write_source(&self, file_name: &str, code: &str) -> ExecutionResult<PathBuf> {
        let path = self.dir.path().join(file_name);
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| ExecutionError::workspace(format!("write {}", file_name), e))?;
        Ok(path)
    }

    /// Recursively delete the workspace
    pub fn cleanup(self) -> ExecutionResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|e| ExecutionError::workspace(format!("remove {:?}", path), e))
    }
}
