//! Shared type definitions for the kiln crate
//!
//! This module contains the records that flow between pipeline stages:
//! module references produced by the analyzer and binary references produced
//! by the native resolver. Both are plain data; stages never hold references
//! back into one another.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;

/// What kind of code unit a module is backed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    /// A `.py` file (plain module or a package `__init__.py`)
    PureSource,

    /// A compiled extension module (`.so`, `.pyd`)
    NativeExtension,

    /// A directory without `__init__.py`
    NamespacePackage,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PureSource => write!(f, "source"),
            Self::NativeExtension => write!(f, "native"),
            Self::NamespacePackage => write!(f, "namespace"),
        }
    }
}

/// Where a module was found
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleOrigin {
    /// A file on the build host (source or extension)
    File(PathBuf),

    /// Every directory contributing a portion of a namespace package,
    /// in search-root order
    Namespace(Vec<PathBuf>),

    /// Compiled into the interpreter; nothing to copy
    BuiltIn,

    /// A standard library module whose file was not located because no
    /// standard library root is known
    Unlocated,
}

impl ModuleOrigin {
    /// The backing file, or the first namespace portion
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::Namespace(portions) => portions.first().map(PathBuf::as_path),
            Self::BuiltIn | Self::Unlocated => None,
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::BuiltIn)
    }
}

impl fmt::Display for ModuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Namespace(portions) => {
                let joined = portions
                    .iter()
                    .map(|portion| portion.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "namespace [{joined}]")
            }
            Self::BuiltIn => write!(f, "<built-in>"),
            Self::Unlocated => write!(f, "<stdlib, not located>"),
        }
    }
}

/// Why a module ended up in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryReason {
    /// The application entry point itself
    EntryPoint,

    /// An import statement (or a literal dynamic import) in analyzed source
    StaticImport,

    /// Declared in the manifest (`hiddenimports` or `hints`)
    ManifestHidden,

    /// Parent package required to load a native extension module
    TransitiveNativeDependency,

    /// Loaded by the interpreter or the bootstrap before the archive is reachable
    InterpreterStartup,
}

impl fmt::Display for DiscoveryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryPoint => write!(f, "entry-point"),
            Self::StaticImport => write!(f, "static-import"),
            Self::ManifestHidden => write!(f, "manifest-hidden"),
            Self::TransitiveNativeDependency => write!(f, "transitive-native-dependency"),
            Self::InterpreterStartup => write!(f, "interpreter-startup"),
        }
    }
}

/// Why a module's imports cannot be fully known from its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpaqueReason {
    /// Compiled code; imports performed from C are invisible
    NativeCode,

    /// Calls `importlib.import_module` or `__import__` with a computed name
    DynamicImport { call_count: usize },
}

impl fmt::Display for OpaqueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NativeCode => write!(f, "compiled extension code"),
            Self::DynamicImport { call_count } => {
                write!(f, "{call_count} dynamic import call(s) with a computed name")
            }
        }
    }
}

/// A named unit of code tracked through the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRef {
    /// Fully-qualified dotted name
    pub name: String,
    pub origin: ModuleOrigin,
    pub kind: ModuleKind,
    /// Whether submodules may live below this module
    pub is_package: bool,
    /// Every reason this module was discovered, merged on re-discovery
    pub discovered_via: BTreeSet<DiscoveryReason>,
    /// Set when the module can import things static analysis cannot see
    pub statically_opaque: Option<OpaqueReason>,
}

impl ModuleRef {
    pub fn new(
        name: impl Into<String>,
        origin: ModuleOrigin,
        kind: ModuleKind,
        is_package: bool,
        reason: DiscoveryReason,
    ) -> Self {
        let statically_opaque =
            (kind == ModuleKind::NativeExtension).then_some(OpaqueReason::NativeCode);
        Self {
            name: name.into(),
            origin,
            kind,
            is_package,
            discovered_via: BTreeSet::from([reason]),
            statically_opaque,
        }
    }

    /// Record another discovery of the same module
    pub fn merge_reason(&mut self, reason: DiscoveryReason) {
        self.discovered_via.insert(reason);
    }

    /// Name of the enclosing package, if any
    pub fn parent_name(&self) -> Option<&str> {
        parent_module_name(&self.name)
    }
}

/// Name of the package containing `name` (`a.b.c` -> `a.b`)
pub fn parent_module_name(name: &str) -> Option<&str> {
    name.rsplit_once('.').map(|(parent, _)| parent)
}

/// Check whether a string is a well-formed dotted module name
pub fn is_valid_module_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        })
}

/// Immutable snapshot of the analyzer's retained modules
///
/// Ordered by module name, which makes every downstream iteration
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleSet {
    /// Dotted name the entry point was registered under
    pub entry: String,
    modules: BTreeMap<String, ModuleRef>,
}

impl ModuleSet {
    pub fn new(entry: String, modules: impl IntoIterator<Item = ModuleRef>) -> Self {
        Self {
            entry,
            modules: modules
                .into_iter()
                .map(|module| (module.name.clone(), module))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModuleRef> {
        self.modules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleRef> {
        self.modules.values()
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.modules.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules backed by compiled extension files
    pub fn native_extensions(&self) -> impl Iterator<Item = &ModuleRef> {
        self.iter()
            .filter(|module| module.kind == ModuleKind::NativeExtension)
    }
}

/// How a binary came to be included
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryProvenance {
    /// Listed under `[[binaries]]` in the manifest
    Manifest,

    /// File backing a native extension module
    ExtensionModule(String),

    /// Linked against by another bundled binary
    LinkDependency {
        /// Destination of the first binary found to require it
        required_by: PathBuf,
    },
}

/// A native shared-object file tracked for inclusion and load order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryRef {
    /// Absolute path on the build host
    pub source: PathBuf,
    /// Path relative to the bundle's binary tree
    pub dest: PathBuf,
    /// Destinations of the binaries that must be loaded before this one
    pub depends_on: Vec<PathBuf>,
    pub provenance: BinaryProvenance,
}

impl BinaryRef {
    pub fn file_name(&self) -> String {
        self.dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
