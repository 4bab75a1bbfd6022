//! Bundle manifest
//!
//! The manifest is a TOML document describing one application:
//!
//! ```toml
//! name = "TorrentMax"
//! entry = "torrentmax/main.py"
//! console = false
//! pathex = ["."]
//! hiddenimports = ["PyQt6.sip"]
//! excludes = ["tkinter"]
//! runtime_hooks = ["pyi_rth_libtorrent.py"]
//!
//! [[binaries]]
//! source = "libtorrent-rasterbar.so.2.0"
//! dest = "."
//!
//! [[datas]]
//! source = "torrentmax/assets/*.png"
//! dest = "torrentmax/assets"
//!
//! [hints]
//! "pyqtgraph" = ["pyqtgraph.graphicsItems.ViewBox.axisCtrlTemplate_pyqt6"]
//! ```
//!
//! Relative paths are resolved against the manifest's directory. Loading
//! validates everything that can be checked without analysis.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use globset::Glob;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::{
    error::{BuildError, BuildResult},
    exclusion::ExclusionRule,
    types::is_valid_module_name,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    name: String,
    entry: PathBuf,
    #[serde(default = "default_console")]
    console: bool,
    #[serde(default)]
    pathex: Vec<PathBuf>,
    #[serde(default)]
    hiddenimports: Vec<String>,
    #[serde(default)]
    excludes: Vec<String>,
    #[serde(default)]
    runtime_hooks: Vec<PathBuf>,
    #[serde(default)]
    binaries: Vec<RawBinary>,
    #[serde(default)]
    datas: Vec<RawData>,
    #[serde(default)]
    hints: IndexMap<String, Vec<String>>,
    python: Option<RawPython>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawBinary {
    source: String,
    #[serde(default = "default_dest")]
    dest: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawData {
    source: String,
    #[serde(default = "default_dest")]
    dest: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPython {
    interpreter: Option<PathBuf>,
}

fn default_console() -> bool {
    true
}

fn default_dest() -> String {
    ".".to_owned()
}

/// Where a manifest binary comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySource {
    /// An explicit path; authoritative, no search
    Path(PathBuf),
    /// A bare file name searched on the library and module search roots
    Name(String),
}

impl BinarySource {
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Name(name) => name.clone(),
        }
    }
}

/// An explicitly requested binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinarySpec {
    pub source: BinarySource,
    /// Directory inside the binary tree; empty for the tree root
    pub dest_dir: PathBuf,
}

/// A static data request: a file, a directory or a glob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    /// Absolute path or absolute glob pattern
    pub source: String,
    /// Directory inside the data tree; empty for the tree root
    pub dest_dir: PathBuf,
}

/// A runtime hook in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    /// Zero-based position; hooks run in this order
    pub index: usize,
    /// File stem, used to identify the hook in reports
    pub name: String,
    pub source: PathBuf,
    /// Location inside the bundle's internal directory
    pub dest: PathBuf,
}

impl HookSpec {
    pub fn new(index: usize, source: PathBuf) -> Self {
        let name = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("hook{index}"));
        let dest = Path::new("hooks").join(format!("{index:02}_{name}.py"));
        Self {
            index,
            name,
            source,
            dest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Manifest {
    /// Path the manifest was loaded from
    pub path: PathBuf,
    /// Directory relative paths were resolved against
    pub base_dir: PathBuf,
    pub name: String,
    pub entry: PathBuf,
    pub console: bool,
    pub pathex: Vec<PathBuf>,
    pub hidden_imports: Vec<String>,
    pub excludes: Vec<ExclusionRule>,
    pub runtime_hooks: Vec<HookSpec>,
    pub binaries: Vec<BinarySpec>,
    pub datas: Vec<DataSpec>,
    /// Imports implied by a module once it is part of the bundle
    pub hints: IndexMap<String, Vec<String>>,
    pub interpreter: Option<PathBuf>,
}

impl Manifest {
    /// Read and validate a manifest file
    pub fn load(path: &Path) -> BuildResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| BuildError::ManifestRead {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::parse(&text, path, &base_dir)
    }

    /// Parse manifest text, resolving relative paths against `base_dir`
    pub fn parse(text: &str, path: &Path, base_dir: &Path) -> BuildResult<Self> {
        let raw: RawManifest = toml::from_str(text)
            .map_err(|err| BuildError::invalid_manifest(path, err.message().to_owned()))?;
        let base_dir = base_dir
            .canonicalize()
            .unwrap_or_else(|_| base_dir.to_path_buf());
        let invalid = |reason: String| BuildError::invalid_manifest(path, reason);

        if raw.name.is_empty()
            || raw.name == "."
            || raw.name == ".."
            || raw.name.contains(['/', '\\'])
        {
            return Err(invalid(format!(
                "name '{}' must be a single path component",
                raw.name
            )));
        }

        let entry = base_dir.join(&raw.entry);
        if !entry.is_file() {
            return Err(invalid(format!(
                "entry script {} does not exist",
                entry.display()
            )));
        }

        for module in &raw.hiddenimports {
            check_module_name(module, "hiddenimports").map_err(&invalid)?;
        }
        for pattern in &raw.excludes {
            check_module_name(pattern, "excludes").map_err(&invalid)?;
        }
        for (trigger, targets) in &raw.hints {
            check_module_name(trigger, "hints").map_err(&invalid)?;
            for target in targets {
                check_module_name(target, "hints").map_err(&invalid)?;
            }
        }

        let mut runtime_hooks = Vec::with_capacity(raw.runtime_hooks.len());
        for (index, hook) in raw.runtime_hooks.iter().enumerate() {
            let source = base_dir.join(hook);
            if !source.is_file() {
                return Err(invalid(format!(
                    "runtime hook {} does not exist",
                    source.display()
                )));
            }
            runtime_hooks.push(HookSpec::new(index, source));
        }

        let binaries = raw
            .binaries
            .iter()
            .map(|binary| {
                let dest_dir = relative_dest(&binary.dest).ok_or_else(|| {
                    invalid(format!("binary destination '{}' must be relative", binary.dest))
                })?;
                Ok(BinarySpec {
                    source: binary_source(&binary.source, &base_dir),
                    dest_dir,
                })
            })
            .collect::<BuildResult<Vec<_>>>()?;

        let datas = raw
            .datas
            .iter()
            .map(|data| {
                let dest_dir = relative_dest(&data.dest).ok_or_else(|| {
                    invalid(format!("data destination '{}' must be relative", data.dest))
                })?;
                let source = base_dir.join(&data.source).to_string_lossy().into_owned();
                if is_glob(&source) {
                    Glob::new(&source).map_err(|err| BuildError::InvalidDataPattern {
                        pattern: data.source.clone(),
                        source: err,
                    })?;
                }
                Ok(DataSpec { source, dest_dir })
            })
            .collect::<BuildResult<Vec<_>>>()?;

        Ok(Self {
            path: path.to_path_buf(),
            name: raw.name,
            entry,
            console: raw.console,
            pathex: raw.pathex.iter().map(|p| base_dir.join(p)).collect(),
            hidden_imports: raw.hiddenimports,
            excludes: raw.excludes.into_iter().map(ExclusionRule::new).collect(),
            runtime_hooks,
            binaries,
            datas,
            hints: raw.hints,
            interpreter: raw
                .python
                .and_then(|python| python.interpreter)
                .map(|interpreter| base_dir.join(interpreter)),
            base_dir,
        })
    }
}

fn check_module_name(name: &str, field: &str) -> Result<(), String> {
    if is_valid_module_name(name) {
        Ok(())
    } else {
        Err(format!("'{name}' in {field} is not a valid dotted module name"))
    }
}

/// Whether a data source is a glob pattern rather than a literal path
pub(crate) fn is_glob(source: &str) -> bool {
    source.contains(['*', '?', '[', '{'])
}

/// A value with a path separator is a path; anything else is searched for
fn binary_source(text: &str, base_dir: &Path) -> BinarySource {
    if text.contains(['/', '\\']) || Path::new(text).is_absolute() {
        BinarySource::Path(base_dir.join(text))
    } else {
        BinarySource::Name(text.to_owned())
    }
}

/// Normalize a destination directory, rejecting anything that escapes the tree
pub(crate) fn relative_dest(text: &str) -> Option<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in Path::new(text).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(normalized)
}
