//! Standard library detection utilities
//!
//! Three questions get answered here: is a name part of the standard library
//! at all, is it compiled into the interpreter, and where on the build host
//! does the target interpreter's standard library live.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use ruff_python_stdlib::sys;

use crate::config::Config;

/// File whose presence marks a directory as a standard library root
pub const STDLIB_LANDMARK: &str = "os.py";

/// Modules compiled into every CPython build this tool targets
///
/// Sorted for binary search. Platform-specific entries (`posix`, `nt`,
/// `winreg`) are listed together; on the other platform nothing imports them.
const BUILTIN_MODULES: &[&str] = &[
    "_abc",
    "_ast",
    "_codecs",
    "_collections",
    "_frozen_importlib",
    "_frozen_importlib_external",
    "_functools",
    "_imp",
    "_io",
    "_locale",
    "_operator",
    "_signal",
    "_sre",
    "_stat",
    "_string",
    "_symtable",
    "_thread",
    "_tokenize",
    "_tracemalloc",
    "_typing",
    "_warnings",
    "_weakref",
    "_winapi",
    "atexit",
    "builtins",
    "errno",
    "faulthandler",
    "gc",
    "itertools",
    "marshal",
    "msvcrt",
    "nt",
    "posix",
    "pwd",
    "sys",
    "time",
    "winreg",
    "xxsubtype",
];

/// Modules the interpreter imports from disk before any user code runs
///
/// `encodings` looks codecs up by name at runtime, so the codecs used for
/// the filesystem and the standard streams are listed explicitly.
pub const INTERPRETER_STARTUP_MODULES: &[&str] = &[
    "codecs",
    "encodings",
    "encodings.aliases",
    "encodings.ascii",
    "encodings.cp1252",
    "encodings.latin_1",
    "encodings.utf_8",
    "io",
    "os",
];

/// Check if a module name represents a Python standard library module
///
/// This uses ruff's stdlib database and handles both direct matches and
/// submodules (e.g., both "os" and "os.path" are recognized).
///
/// # Arguments
/// * `module_name` - The module name to check
/// * `python_minor` - The Python 3 minor version (e.g., 11 for Python 3.11)
pub fn is_stdlib_module(module_name: &str, python_minor: u8) -> bool {
    // __future__ is always stdlib but not in ruff's table
    if module_name == "__future__" {
        return true;
    }

    if sys::is_known_standard_library(python_minor, module_name) {
        return true;
    }

    module_name
        .split('.')
        .next()
        .is_some_and(|top_level| sys::is_known_standard_library(python_minor, top_level))
}

/// Check if a module is compiled into the interpreter binary
pub fn is_builtin_module(module_name: &str) -> bool {
    BUILTIN_MODULES.binary_search(&module_name).is_ok()
}

/// Standard library of the target interpreter on the build host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StdlibLayout {
    /// Directory holding the pure-Python modules (`lib/python3.X`, `Lib`)
    pub root: PathBuf,
    /// Directory holding extension modules (`lib-dynload`, `DLLs`)
    pub dynload: Option<PathBuf>,
}

impl StdlibLayout {
    /// Layout rooted at `root`, if it holds the landmark
    pub fn at(root: &Path) -> Option<Self> {
        if !root.join(STDLIB_LANDMARK).is_file() {
            return None;
        }
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        let dynload = std::iter::once(root.join("lib-dynload"))
            .chain(root.parent().map(|prefix| prefix.join("DLLs")))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.canonicalize().unwrap_or(dir));
        Some(Self { root, dynload })
    }

    /// Layout of the installation an interpreter binary in `bin_dir` belongs to
    ///
    /// Posix installs keep the library in `<prefix>/lib/python3.X` next to
    /// `<prefix>/bin`; Windows installs keep it in `Lib` beside the executable.
    pub fn for_bin_dir(bin_dir: &Path, python_minor: u8) -> Option<Self> {
        let versioned = format!("python3.{python_minor}");
        let mut candidates = vec![bin_dir.join("Lib"), bin_dir.join("lib").join(&versioned)];
        if let Some(prefix) = bin_dir.parent() {
            candidates.push(prefix.join("lib").join(&versioned));
        }
        candidates.iter().find_map(|candidate| Self::at(candidate))
    }

    /// Find the target standard library
    ///
    /// In order: the configured `stdlib-path`, the installation of the
    /// manifest's interpreter, the base installation of a virtual environment.
    pub fn locate(
        config: &Config,
        interpreter: Option<&Path>,
        virtual_envs: &[PathBuf],
    ) -> Option<Self> {
        let found = config
            .stdlib_path
            .as_deref()
            .and_then(Self::at)
            .or_else(|| {
                interpreter
                    .and_then(Path::parent)
                    .and_then(|bin_dir| Self::for_bin_dir(bin_dir, config.python_minor))
            })
            .or_else(|| {
                virtual_envs
                    .iter()
                    .filter_map(|venv| virtualenv_home(venv))
                    .find_map(|home| Self::for_bin_dir(&home, config.python_minor))
            });
        match &found {
            Some(layout) => debug!("Standard library at {}", layout.root.display()),
            None => debug!("No standard library found for Python 3.{}", config.python_minor),
        }
        found
    }

    /// Module search directories this layout contributes, in priority order
    pub fn search_dirs(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.root.as_path()).chain(self.dynload.as_deref())
    }

    /// Whether `path` lives inside this standard library
    pub fn contains(&self, path: &Path) -> bool {
        self.search_dirs().any(|dir| path.starts_with(dir))
    }

    /// `path` relative to the pure-Python root
    pub fn relative(&self, path: &Path) -> Option<PathBuf> {
        path.strip_prefix(&self.root).ok().map(Path::to_path_buf)
    }
}

/// `home` directory recorded in a virtual environment's `pyvenv.cfg`
fn virtualenv_home(venv: &Path) -> Option<PathBuf> {
    let text = fs::read_to_string(venv.join("pyvenv.cfg")).ok()?;
    text.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        (key.trim() == "home").then(|| PathBuf::from(value.trim()))
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::{fs, io, path::Path};

    /// Minimal standard library: the startup set plus a few common modules
    pub(crate) fn fake_stdlib(root: &Path) -> io::Result<()> {
        let files: &[(&str, &str)] = &[
            ("os.py", "import abc\nimport sys\nimport stat\nif 'posix' in sys.builtin_module_names:\n    import posixpath as path\nelse:\n    import ntpath as path\n"),
            ("abc.py", "from _abc import get_cache_token\n"),
            ("stat.py", "try:\n    from _stat import *\nexcept ImportError:\n    pass\n"),
            ("posixpath.py", "import os\nimport genericpath\n"),
            ("ntpath.py", "import os\nimport genericpath\n"),
            ("genericpath.py", "import os\n"),
            ("io.py", "import abc\nimport _io\n"),
            ("codecs.py", "import builtins\nimport sys\nfrom _codecs import *\n"),
            ("encodings/__init__.py", "import codecs\nfrom . import aliases\n"),
            ("encodings/aliases.py", "aliases = {}\n"),
            ("encodings/ascii.py", "import codecs\n"),
            ("encodings/cp1252.py", "import codecs\n"),
            ("encodings/latin_1.py", "import codecs\n"),
            ("encodings/utf_8.py", "import codecs\n"),
            ("hashlib.py", "try:\n    import _hashlib\nexcept ImportError:\n    pass\n"),
            ("runpy.py", "import sys\nimport importlib.machinery\n"),
            ("traceback.py", "import sys\n"),
            ("importlib/__init__.py", "import sys\n"),
            ("importlib/machinery.py", "from importlib import _bootstrap_external\n"),
            ("importlib/_bootstrap_external.py", "import _imp\n"),
            ("json/__init__.py", "from .decoder import JSONDecoder\n"),
            ("json/decoder.py", "import re\ntry:\n    from _json import scanstring\nexcept ImportError:\n    scanstring = None\n"),
            ("re.py", "import _sre\n"),
            ("struct.py", "from _struct import *\n"),
            ("platform.py", "import os\nimport sys\n"),
            ("lib-dynload/_struct.cpython-312-x86_64-linux-gnu.so", "\u{7f}ELF struct"),
        ];
        for (relative, contents) in files {
            let path = root.join(relative);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(())
    }
}
