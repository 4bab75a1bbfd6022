//! Build failures and warnings
//!
//! Every fatal condition is a [`BuildError`] variant naming the entity that
//! caused it. Each variant belongs to exactly one pipeline [`Stage`], which
//! decides the process exit code. Non-fatal conditions are [`BuildWarning`]s
//! collected in a [`Diagnostics`] sink and reported once the build ends.

use std::{fmt, io, path::PathBuf};

use log::warn;
use thiserror::Error;

/// Pipeline stage a diagnostic originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Manifest,
    Analyzer,
    Resolver,
    Assembler,
    Launcher,
}

impl Stage {
    /// Process exit code used when this stage fails
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Manifest => 1,
            Self::Analyzer => 3,
            Self::Resolver => 4,
            Self::Assembler => 5,
            Self::Launcher => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manifest => "manifest",
            Self::Analyzer => "analyzer",
            Self::Resolver => "resolver",
            Self::Assembler => "assembler",
            Self::Launcher => "launcher",
        };
        f.write_str(name)
    }
}

/// Result alias for pipeline stages
pub type BuildResult<T> = Result<T, BuildError>;

/// Fatal build failures
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("failed to read {path}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "no standard library found for Python {python_version}; set `stdlib-path` in kiln.toml, `[python].interpreter` in the manifest, or activate a virtual environment"
    )]
    StdlibNotFound { python_version: String },

    #[error("cannot parse {path} (module '{module}'): {message} at line {line}")]
    UnparseableSource {
        module: String,
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("failed to read source of module '{module}' at {path}")]
    SourceRead {
        module: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("module '{importer}' imports '{module}', which cannot be found on any search path")]
    UnresolvableImport { module: String, importer: String },

    #[error("hidden import '{module}'{} cannot be found on any search path", declared_by.as_ref().map(|m| format!(" (hint of '{m}')")).unwrap_or_default())]
    MissingHiddenImport {
        module: String,
        /// Module whose hint declared it, `None` for top-level hidden imports
        declared_by: Option<String>,
    },

    #[error("required binary {requested} not found{}", found_at.as_ref().map(|p| format!(" (looked at {})", p.display())).unwrap_or_default())]
    MissingRequiredBinary {
        requested: String,
        found_at: Option<PathBuf>,
    },

    #[error("failed to read binary {path}")]
    BinaryRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(
        "destination {dest} claimed by both {existing} and {incoming} with different contents"
    )]
    DestinationCollision {
        stage: Stage,
        dest: PathBuf,
        existing: PathBuf,
        incoming: PathBuf,
    },

    #[error("binaries form a load-order cycle: {}", format_cycle(cycle))]
    BinaryDependencyCycle { cycle: Vec<PathBuf> },

    #[error("invalid data pattern '{pattern}'")]
    InvalidDataPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("bundle write interrupted while {operation} {path}; output rolled back")]
    PartialWriteInterrupted {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read module archive {path}")]
    ArchiveRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("runtime hook #{index} '{hook}' is misconfigured: {reason}")]
    HookConfiguration {
        index: usize,
        hook: String,
        reason: String,
    },

    #[error("runtime hook #{index} '{hook}' failed: {cause}")]
    HookExecutionFailure {
        index: usize,
        hook: String,
        cause: String,
    },

    #[error("entry module '{module}' is missing from the bundle archive")]
    EntryNotBundled { module: String },

    #[error("cannot encode launch configuration")]
    LaunchConfigEncoding(#[source] toml::ser::Error),
}

fn format_cycle(cycle: &[PathBuf]) -> String {
    cycle
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl BuildError {
    /// Stage responsible for this failure
    pub fn stage(&self) -> Stage {
        match self {
            Self::InvalidManifest { .. }
            | Self::ManifestRead { .. }
            | Self::InvalidDataPattern { .. }
            | Self::StdlibNotFound { .. } => Stage::Manifest,
            Self::UnparseableSource { .. }
            | Self::SourceRead { .. }
            | Self::UnresolvableImport { .. }
            | Self::MissingHiddenImport { .. } => Stage::Analyzer,
            Self::MissingRequiredBinary { .. }
            | Self::BinaryRead { .. }
            | Self::BinaryDependencyCycle { .. } => Stage::Resolver,
            Self::DestinationCollision { stage, .. } => *stage,
            Self::PartialWriteInterrupted { .. } | Self::ArchiveRead { .. } => Stage::Assembler,
            Self::HookConfiguration { .. }
            | Self::HookExecutionFailure { .. }
            | Self::EntryNotBundled { .. }
            | Self::LaunchConfigEncoding(_) => Stage::Launcher,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.stage().exit_code()
    }

    pub(crate) fn invalid_manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::PartialWriteInterrupted {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Non-fatal build conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildWarning {
    /// An exclusion pattern matched no discovered module
    ExclusionNoMatch { pattern: String },

    /// An optional import (inside `try` or a conditional) resolved nowhere
    OptionalImportMissing { module: String, importer: String },

    /// A hidden import was kept although an exclusion pattern matches it
    HiddenImportOverridesExclusion { module: String, pattern: String },

    /// A retained module may import things the analyzer cannot see
    StaticallyOpaqueModule { module: String, reason: String },

    /// A linked library was not found on the build host
    MissingOptionalBinary { name: String, required_by: PathBuf },

    /// A binary could not be parsed as an object file
    UninspectableBinary { path: PathBuf, reason: String },

    /// No standard library root is known; its modules are listed but not bundled
    StdlibNotLocated { python_version: String },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExclusionNoMatch { pattern } => {
                write!(f, "exclusion '{pattern}' matched no module")
            }
            Self::OptionalImportMissing { module, importer } => write!(
                f,
                "optional import '{module}' in '{importer}' not found; assuming absent at runtime"
            ),
            Self::HiddenImportOverridesExclusion { module, pattern } => write!(
                f,
                "hidden import '{module}' kept despite exclusion '{pattern}'"
            ),
            Self::StaticallyOpaqueModule { module, reason } => write!(
                f,
                "module '{module}' uses {reason}; its imports must be declared as hidden imports"
            ),
            Self::MissingOptionalBinary { name, required_by } => write!(
                f,
                "library '{name}' needed by {} not found; the feature it backs is assumed absent",
                required_by.display()
            ),
            Self::UninspectableBinary { path, reason } => write!(
                f,
                "cannot inspect {} for linked libraries: {reason}",
                path.display()
            ),
            Self::StdlibNotLocated { python_version } => write!(
                f,
                "standard library for Python {python_version} not found; its modules are listed but cannot be bundled"
            ),
        }
    }
}

/// A warning together with the stage that raised it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageWarning {
    pub stage: Stage,
    pub warning: BuildWarning,
}

impl fmt::Display for StageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.warning)
    }
}

/// Collects warnings across the whole build
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<StageWarning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and log it immediately
    pub fn warn(&mut self, stage: Stage, warning: BuildWarning) {
        warn!("{stage}: {warning}");
        self.warnings.push(StageWarning { stage, warning });
    }

    pub fn warnings(&self) -> &[StageWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<StageWarning> {
        self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
