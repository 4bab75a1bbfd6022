//! Atomic file placement and the staged bundle directory

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};
use tempfile::{NamedTempFile, TempDir};

use crate::error::{BuildError, BuildResult};

const STAGING_PREFIX: &str = ".kiln-staging-";
const BACKUP_PREFIX: &str = ".kiln-previous-";

/// Write `bytes` to `dest` through a temporary file in the same directory
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> BuildResult<()> {
    let mut temp = temp_file_for(dest)?;
    temp.write_all(bytes)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|err| BuildError::write("writing", dest, err))?;
    persist(temp, dest)
}

/// Copy `source` to `dest` through a temporary file, keeping permissions
pub fn copy_atomic(source: &Path, dest: &Path) -> BuildResult<()> {
    let mut reader = File::open(source).map_err(|err| BuildError::write("copying", source, err))?;
    let permissions = reader
        .metadata()
        .map_err(|err| BuildError::write("copying", source, err))?
        .permissions();

    let mut temp = temp_file_for(dest)?;
    io::copy(&mut reader, &mut temp)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|err| BuildError::write("copying", dest, err))?;
    fs::set_permissions(temp.path(), permissions)
        .map_err(|err| BuildError::write("copying", dest, err))?;
    persist(temp, dest)
}

fn temp_file_for(dest: &Path) -> BuildResult<NamedTempFile> {
    let parent = dest
        .parent()
        .ok_or_else(|| BuildError::write("creating", dest, io::ErrorKind::InvalidInput.into()))?;
    fs::create_dir_all(parent).map_err(|err| BuildError::write("creating", parent, err))?;
    NamedTempFile::new_in(parent).map_err(|err| BuildError::write("creating", parent, err))
}

fn persist(temp: NamedTempFile, dest: &Path) -> BuildResult<()> {
    temp.persist(dest)
        .map(|_| ())
        .map_err(|err| BuildError::write("renaming into", dest, err.error))
}

/// Mark a file as executable for its owner, group and others
#[cfg(unix)]
pub fn set_executable(path: &Path) -> BuildResult<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = fs::metadata(path)
        .map_err(|err| BuildError::write("chmod", path, err))?
        .permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    fs::set_permissions(path, permissions).map_err(|err| BuildError::write("chmod", path, err))
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> BuildResult<()> {
    Ok(())
}

/// Whether two files hold the same bytes
pub fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

/// A bundle under construction next to its final location
///
/// Dropping an uncommitted `StagedBundle` removes everything written so far.
#[derive(Debug)]
pub struct StagedBundle {
    staging: TempDir,
    target: PathBuf,
}

impl StagedBundle {
    /// Create a private staging directory inside `dist_dir` for bundle `name`
    pub fn create(dist_dir: &Path, name: &str) -> BuildResult<Self> {
        fs::create_dir_all(dist_dir).map_err(|err| BuildError::write("creating", dist_dir, err))?;
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(dist_dir)
            .map_err(|err| BuildError::write("creating", dist_dir, err))?;
        debug!("Staging bundle '{name}' in {}", staging.path().display());
        Ok(Self {
            staging,
            target: dist_dir.join(name),
        })
    }

    /// Root of the staged tree, the future `<dist>/<name>`
    pub fn root(&self) -> &Path {
        self.staging.path()
    }

    /// Where the bundle will live once committed
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Swap the staged tree into place
    ///
    /// An existing bundle is first moved aside and only deleted once the new
    /// one is in place; if the final rename fails it is moved back.
    pub fn commit(self) -> BuildResult<PathBuf> {
        let Self { staging, target } = self;
        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let backup = if target.exists() {
            let holder = tempfile::Builder::new()
                .prefix(BACKUP_PREFIX)
                .tempdir_in(&parent)
                .map_err(|err| BuildError::write("creating", &parent, err))?;
            let previous = holder.path().join("bundle");
            fs::rename(&target, &previous)
                .map_err(|err| BuildError::write("moving aside", &target, err))?;
            Some((holder, previous))
        } else {
            None
        };

        let staged = staging.keep();
        if let Err(err) = fs::rename(&staged, &target) {
            if let Err(cleanup) = fs::remove_dir_all(&staged) {
                warn!("Failed to remove staging directory {}: {cleanup}", staged.display());
            }
            if let Some((_holder, previous)) = &backup
                && let Err(restore) = fs::rename(previous, &target)
            {
                warn!(
                    "Failed to restore previous bundle from {}: {restore}",
                    previous.display()
                );
            }
            return Err(BuildError::write("committing", &target, err));
        }

        // The backup holder removes the previous bundle when dropped
        drop(backup);
        debug!("Committed bundle to {}", target.display());
        Ok(target)
    }
}
