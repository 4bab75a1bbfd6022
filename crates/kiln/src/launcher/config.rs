//! The immutable launch configuration written to `launch.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::render::LauncherKind;

use crate::{
    assembler::{ARCHIVE_FILE, BIN_DIR, DATA_DIR},
    manifest::{HookSpec, Manifest},
    types::{BinaryProvenance, BinaryRef, ModuleSet},
};

pub const LAUNCH_CONFIG_FILE: &str = "launch.toml";

/// A hook as the bootstrap sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchHook {
    pub index: usize,
    pub name: String,
    /// Relative to the internal directory
    pub path: String,
}

impl From<&HookSpec> for LaunchHook {
    fn from(hook: &HookSpec) -> Self {
        Self {
            index: hook.index,
            name: hook.name.clone(),
            path: slash_path(&hook.dest),
        }
    }
}

/// Everything the bootstrap needs, built once per bundle
///
/// All paths are relative to the bundle's internal directory and use `/`
/// separators so the file reads the same on every host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub name: String,
    pub entry_module: String,
    pub console: bool,
    pub python_version: String,
    pub archive: String,
    pub bin_dir: String,
    pub data_dir: String,
    /// Standard library sources the interpreter needs before the archive
    /// importer is installed
    pub stdlib_dir: String,
    /// Bundled interpreter, relative to the bin directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub hooks: Vec<LaunchHook>,
}

impl LaunchConfig {
    pub fn new(
        manifest: &Manifest,
        modules: &ModuleSet,
        binaries: &[BinaryRef],
        python_minor: u8,
        kind: LauncherKind,
    ) -> Self {
        let interpreter = manifest.interpreter.as_ref().and_then(|wanted| {
            let wanted = wanted.canonicalize().unwrap_or_else(|_| wanted.clone());
            binaries
                .iter()
                .find(|binary| {
                    binary.provenance == BinaryProvenance::Manifest && binary.source == wanted
                })
                .map(|binary| slash_path(&binary.dest))
        });

        Self {
            name: manifest.name.clone(),
            entry_module: modules.entry.clone(),
            console: manifest.console,
            python_version: format!("3.{python_minor}"),
            archive: ARCHIVE_FILE.to_owned(),
            bin_dir: BIN_DIR.to_owned(),
            data_dir: DATA_DIR.to_owned(),
            stdlib_dir: "lib/python3.12".to_owned(),
            interpreter,
            hooks: manifest.runtime_hooks.iter().map(LaunchHook::from).collect(),
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

pub(crate) fn slash_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Interpreter path inside the bundle, relative to the bundle root
pub(crate) fn bundled_interpreter(config: &LaunchConfig) -> Option<PathBuf> {
    config.interpreter.as_ref().map(|interpreter| {
        Path::new(crate::assembler::INTERNAL_DIR)
            .join(&config.bin_dir)
            .join(interpreter)
    })
}
