//! Tool configuration
//!
//! Configuration is layered, lowest precedence first:
//! 1. built-in defaults
//! 2. the user config file (`<config dir>/kiln/kiln.toml`)
//! 3. the project config file (`kiln.toml` next to the manifest, or `--config`)
//! 4. `KILN_*` environment variables
//! 5. command-line flags (applied by the binary)
//!
//! The manifest describes *what* to bundle; this describes the build host.

use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::Deserialize;

use crate::dirs;

/// Python 3 minor version assumed when nothing is configured
pub const DEFAULT_PYTHON_MINOR: u8 = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Python 3 minor version used for stdlib classification
    pub python_minor: u8,
    /// Extra module search roots, searched after the manifest's `pathex`
    pub search_paths: Vec<PathBuf>,
    /// Standard library of the target interpreter (the directory holding `os.py`)
    pub stdlib_path: Option<PathBuf>,
    /// Directories searched for shared libraries
    pub library_paths: Vec<PathBuf>,
    /// Extra regexes matching library names to treat as host-provided
    pub system_library_excludes: Vec<String>,
    /// Bundle libraries that every host of the target OS provides anyway
    pub bundle_system_libraries: bool,
    /// Worker threads for parallel inspection and copying (`None` = all cores)
    pub jobs: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python_minor: DEFAULT_PYTHON_MINOR,
            search_paths: Vec::new(),
            stdlib_path: None,
            library_paths: Vec::new(),
            system_library_excludes: Vec::new(),
            bundle_system_libraries: false,
            jobs: None,
        }
    }
}

/// On-disk representation; every field optional so files can be layered
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
struct ConfigFile {
    python_version: Option<String>,
    search_paths: Option<Vec<PathBuf>>,
    stdlib_path: Option<PathBuf>,
    library_paths: Option<Vec<PathBuf>>,
    system_library_excludes: Option<Vec<String>>,
    bundle_system_libraries: Option<bool>,
    jobs: Option<usize>,
}

impl Config {
    /// Load configuration for a project rooted at `project_dir`
    ///
    /// `explicit` replaces the project file lookup; it must exist.
    pub fn load(project_dir: Option<&Path>, explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(user_file) = dirs::user_config_file()
            && user_file.is_file()
        {
            config.merge_file(&user_file)?;
        }

        match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(anyhow!("config file {} does not exist", path.display()));
                }
                config.merge_file(path)?;
            }
            None => {
                if let Some(project_file) =
                    project_dir.map(|dir| dir.join(dirs::CONFIG_FILE_NAME))
                    && project_file.is_file()
                {
                    config.merge_file(&project_file)?;
                }
            }
        }

        config.apply_env_with(|key| env::var_os(key))?;
        Ok(config)
    }

    /// Merge a config file over the current values
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        debug!("Loading config from {}", path.display());
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: ConfigFile = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        self.merge(file, base)
    }

    fn merge(&mut self, file: ConfigFile, base: &Path) -> Result<()> {
        if let Some(version) = file.python_version {
            self.python_minor = parse_python_version(&version)?;
        }
        if let Some(paths) = file.search_paths {
            self.search_paths = paths.into_iter().map(|p| base.join(p)).collect();
        }
        if let Some(path) = file.stdlib_path {
            self.stdlib_path = Some(base.join(path));
        }
        if let Some(paths) = file.library_paths {
            self.library_paths = paths.into_iter().map(|p| base.join(p)).collect();
        }
        if let Some(patterns) = file.system_library_excludes {
            self.system_library_excludes = patterns;
        }
        if let Some(bundle) = file.bundle_system_libraries {
            self.bundle_system_libraries = bundle;
        }
        if file.jobs.is_some() {
            self.jobs = file.jobs;
        }
        Ok(())
    }

    /// Apply `KILN_*` overrides read through `lookup`
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<OsString>,
    ) -> Result<()> {
        if let Some(version) = lookup("KILN_PYTHON_VERSION") {
            self.python_minor = parse_python_version(&version.to_string_lossy())
                .context("invalid KILN_PYTHON_VERSION")?;
        }
        if let Some(paths) = lookup("KILN_SEARCH_PATH") {
            self.search_paths
                .extend(env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
        }
        if let Some(path) = lookup("KILN_STDLIB_PATH").filter(|path| !path.is_empty()) {
            self.stdlib_path = Some(PathBuf::from(path));
        }
        if let Some(paths) = lookup("KILN_LIBRARY_PATH") {
            self.library_paths
                .extend(env::split_paths(&paths).filter(|p| !p.as_os_str().is_empty()));
        }
        if let Some(jobs) = lookup("KILN_JOBS") {
            let jobs = jobs.to_string_lossy();
            self.jobs = Some(
                jobs.parse()
                    .with_context(|| format!("invalid KILN_JOBS value '{jobs}'"))?,
            );
        }
        Ok(())
    }
}

/// Parse `3.X` into the minor version `X`
pub fn parse_python_version(text: &str) -> Result<u8> {
    let trimmed = text.trim();
    let minor = trimmed
        .strip_prefix("3.")
        .ok_or_else(|| anyhow!("python version '{trimmed}' must look like 3.X"))?;
    minor
        .parse::<u8>()
        .with_context(|| format!("python version '{trimmed}' has an invalid minor version"))
}
