use rand::Rng;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// No session file; the one-time interactive login has not been run
    #[error("Session file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("Session file is empty: {}", .0.display())]
    Empty(PathBuf),

    #[error("Session I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// On-disk storage for the opaque MTProto session blob.
///
/// Writes go to a uniquely named sibling temp file which is then renamed over
/// the target, so readers never observe a partial blob. The directory is
/// created owner-only and the file is 0600.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn load(&self) -> Result<Vec<u8>, SessionError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Err(SessionError::Empty(self.path.clone())),
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SessionError::Missing(self.path.clone()))
            }
            Err(e) => Err(self.io_error(e)),
        }
    }

    pub fn save(&self, blob: &[u8]) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_private_dir(parent).map_err(|e| SessionError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let suffix: u64 = rand::rng().random();
        let temp_path = self.path.with_extension(format!("tmp.{suffix:016x}"));

        let result = write_new_private(&temp_path, blob)
            .and_then(|()| std::fs::rename(&temp_path, &self.path));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(self.io_error(e));
        }

        tracing::debug!(path = %self.path.display(), bytes = blob.len(), "Session saved");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
        if !dir.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(dir)?;
        }
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

/// Create `path` (which must not exist) with mode 0600 and write `data`.
fn write_new_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
