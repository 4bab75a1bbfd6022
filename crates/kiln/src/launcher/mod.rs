//! Launcher generation
//!
//! Produces the files that start a bundle: the launcher script at the bundle
//! root, `bootstrap.py` and `launch.toml` in the internal directory. The
//! assembler writes them; [`verify`] then walks the startup sequence against
//! the staged tree before it is committed.

mod config;
mod render;
mod startup;

use std::{
    fs,
    path::{Path, PathBuf},
};

pub use config::{LAUNCH_CONFIG_FILE, LaunchConfig, LaunchHook};
use log::debug;
pub use render::{LauncherKind, render_launcher};
pub use startup::{HookExecutor, ProcessState, Startup, StartupFailure, StartupState};

use crate::{
    analyzer::parse_imports,
    assembler::{Archive, GeneratedFile, INTERNAL_DIR, internal_dir, read_archive},
    error::{BuildError, BuildResult},
};

pub const BOOTSTRAP_FILE: &str = "bootstrap.py";

/// Python program the launcher runs; see `bootstrap.py`
pub const BOOTSTRAP_SOURCE: &str = include_str!("bootstrap.py");

/// Every launcher artifact for `config`, paths relative to the bundle root
pub fn generate(config: &LaunchConfig, kind: LauncherKind) -> BuildResult<Vec<GeneratedFile>> {
    let launch_toml = config.to_toml().map_err(BuildError::LaunchConfigEncoding)?;
    let internal = PathBuf::from(INTERNAL_DIR);

    Ok(vec![
        render_launcher(config, kind),
        GeneratedFile {
            path: internal.join(BOOTSTRAP_FILE),
            contents: BOOTSTRAP_SOURCE.as_bytes().to_vec(),
            executable: false,
        },
        GeneratedFile {
            path: internal.join(LAUNCH_CONFIG_FILE),
            contents: launch_toml.into_bytes(),
            executable: false,
        },
    ])
}

/// Checks a bundle on disk in place of running it
///
/// Hooks must exist and parse; the entry module must be in the archive.
#[derive(Debug)]
pub struct BundleVerifier {
    internal_dir: PathBuf,
    archive: Archive,
}

impl BundleVerifier {
    pub fn new(root: &Path) -> BuildResult<Self> {
        Ok(Self {
            internal_dir: internal_dir(root),
            archive: read_archive(root)?,
        })
    }
}

impl HookExecutor for BundleVerifier {
    fn run_hook(&mut self, hook: &LaunchHook, process: &mut ProcessState) -> Result<(), String> {
        let path = hook
            .path
            .split('/')
            .fold(self.internal_dir.clone(), |path, part| path.join(part));
        let source = fs::read_to_string(&path)
            .map_err(|err| format!("cannot read {}: {err}", path.display()))?;
        parse_imports(&source).map_err(|(line, message)| {
            format!("{} line {line}: {message}", path.display())
        })?;
        process
            .environment
            .insert(format!("hook.{}", hook.index), hook.name.clone());
        Ok(())
    }

    fn run_entry_point(&mut self, module: &str, _process: &mut ProcessState) -> Result<(), String> {
        if self.archive.contains(module) {
            Ok(())
        } else {
            Err(format!("'{module}' is not in the archive"))
        }
    }
}

/// Walk the startup sequence of the bundle rooted at `root`
pub fn verify(root: &Path, config: &LaunchConfig) -> BuildResult<ProcessState> {
    let mut verifier = BundleVerifier::new(root)?;
    let internal = verifier.internal_dir.clone();
    let process = Startup::new(config, internal)
        .run(&mut verifier)
        .map_err(|failure| match failure {
            StartupFailure::Hook {
                index, hook, cause, ..
            } => BuildError::HookConfiguration {
                index,
                hook,
                reason: cause,
            },
            other => other.into(),
        })?;
    debug!(
        "Verified startup of '{}': {} hook(s), entry '{}'",
        config.name,
        process.completed_hooks.len(),
        config.entry_module
    );
    Ok(process)
}
