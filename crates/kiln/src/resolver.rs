use std::{
    env,
    ffi::OsStr,
    fs,
    path::{Path, PathBuf},
};

use indexmap::{IndexMap, IndexSet};
use log::{debug, warn};

use crate::{
    config::Config,
    stdlib_detection::{StdlibLayout, is_builtin_module, is_stdlib_module},
    types::{ModuleKind, ModuleOrigin},
};

/// A scoped guard for safely setting and cleaning up an environment variable.
///
/// The variable is restored to its original value when the guard is dropped,
/// even if a panic occurs during testing.
///
/// # Example
///
/// ```rust
/// use kiln::resolver::EnvVarGuard;
/// let _guard = EnvVarGuard::set("PYTHONPATH", "/tmp/test");
/// // PYTHONPATH is now "/tmp/test" until `_guard` goes out of scope
/// ```
#[derive(Debug)]
#[must_use = "EnvVarGuard must be held in scope to ensure cleanup"]
pub struct EnvVarGuard {
    key: &'static str,
    /// The original value, `None` if the variable was not set
    original_value: Option<String>,
}

impl EnvVarGuard {
    /// Set `key` to `new_value` until the guard is dropped
    pub fn set(key: &'static str, new_value: &str) -> Self {
        let original_value = env::var(key).ok();

        // SAFETY: only used from tests serialized on the environment
        unsafe {
            env::set_var(key, new_value);
        }

        Self {
            key,
            original_value,
        }
    }

    /// Remove `key` until the guard is dropped
    pub fn unset(key: &'static str) -> Self {
        let original_value = env::var(key).ok();

        // SAFETY: only used from tests serialized on the environment
        unsafe {
            env::remove_var(key);
        }

        Self {
            key,
            original_value,
        }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        // Restore even while unwinding; a panic here would abort the test run
        #[allow(clippy::disallowed_methods)]
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            // SAFETY: restoring the environment to its original state
            unsafe {
                match self.original_value.take() {
                    Some(original) => env::set_var(self.key, original),
                    None => env::remove_var(self.key),
                }
            }
        }));
    }
}

/// Where a module name resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub origin: ModuleOrigin,
    pub kind: ModuleKind,
    pub is_package: bool,
}

impl ResolvedModule {
    fn builtin() -> Self {
        Self {
            origin: ModuleOrigin::BuiltIn,
            kind: ModuleKind::PureSource,
            is_package: false,
        }
    }

    fn unlocated() -> Self {
        Self {
            origin: ModuleOrigin::Unlocated,
            kind: ModuleKind::PureSource,
            is_package: false,
        }
    }
}

/// Environment values the search roots depend on
///
/// Tests pass explicit values; the build reads them from the process.
#[derive(Debug, Clone, Default)]
pub struct SearchEnvironment {
    pub pythonpath: Option<String>,
    pub virtual_env: Option<PathBuf>,
    /// Directory searched for `.venv`-style environments when `virtual_env` is unset
    pub working_dir: Option<PathBuf>,
}

impl SearchEnvironment {
    pub fn from_process() -> Self {
        Self {
            pythonpath: env::var("PYTHONPATH").ok(),
            virtual_env: env::var_os("VIRTUAL_ENV").map(PathBuf::from),
            working_dir: env::current_dir().ok(),
        }
    }

    /// Virtual environments to search: `VIRTUAL_ENV`, else `.venv`-style
    /// directories below the working directory
    pub fn virtual_envs(&self) -> Vec<PathBuf> {
        match &self.virtual_env {
            Some(venv) => vec![venv.clone()],
            None => self
                .working_dir
                .as_deref()
                .map(detect_fallback_virtualenv_paths)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug)]
pub struct ModuleResolver {
    /// Deduplicated, canonicalized search roots in priority order
    search_dirs: Vec<PathBuf>,
    /// Index of the first site-packages root in `search_dirs`
    site_start: usize,
    stdlib: Option<StdlibLayout>,
    /// Cache of resolved modules, including negative results
    module_cache: IndexMap<String, Option<ResolvedModule>>,
    /// Python version for stdlib classification
    python_minor: u8,
}

impl ModuleResolver {
    /// Build the search roots for an application whose entry script is `entry`
    ///
    /// Order: entry directory, `PYTHONPATH`, `pathex`, configured search paths,
    /// site-packages of the virtual environment.
    pub fn new(entry: &Path, pathex: &[PathBuf], config: &Config, environment: &SearchEnvironment) -> Self {
        let mut unique_dirs = IndexSet::new();

        if let Some(entry_dir) = entry.parent() {
            add_directory(&mut unique_dirs, entry_dir);
        }

        if let Some(pythonpath) = &environment.pythonpath {
            for path in env::split_paths(pythonpath) {
                if !path.as_os_str().is_empty() {
                    add_directory(&mut unique_dirs, &path);
                }
            }
        }

        for dir in pathex.iter().chain(&config.search_paths) {
            add_directory(&mut unique_dirs, dir);
        }

        let site_start = unique_dirs.len();
        for venv in environment.virtual_envs() {
            for site_packages in virtualenv_site_packages_directories(&venv) {
                add_directory(&mut unique_dirs, &site_packages);
            }
        }

        let search_dirs: Vec<PathBuf> = unique_dirs.into_iter().collect();
        debug!("Module search roots: {search_dirs:?}");

        Self {
            search_dirs,
            site_start,
            stdlib: None,
            module_cache: IndexMap::new(),
            python_minor: config.python_minor,
        }
    }

    /// Search the target standard library after the application roots and
    /// before site-packages, the order the interpreter uses
    #[must_use]
    pub fn with_stdlib(mut self, layout: StdlibLayout) -> Self {
        let mut unique_dirs: IndexSet<PathBuf> =
            self.search_dirs[..self.site_start].iter().cloned().collect();
        unique_dirs.extend(layout.search_dirs().map(Path::to_path_buf));
        let site_start = unique_dirs.len();
        unique_dirs.extend(self.search_dirs[self.site_start..].iter().cloned());

        self.search_dirs = unique_dirs.into_iter().collect();
        self.site_start = site_start;
        self.stdlib = Some(layout);
        self.module_cache.clear();
        debug!("Module search roots: {:?}", self.search_dirs);
        self
    }

    /// Search roots in priority order
    pub fn search_directories(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    pub fn stdlib(&self) -> Option<&StdlibLayout> {
        self.stdlib.as_ref()
    }

    /// Resolve an absolute dotted module name
    ///
    /// Top-level names are looked up across every root; submodules only in
    /// the directories of their parent package. Standard library names found
    /// nowhere are compiled in when the standard library is known, and
    /// unlocated when it is not.
    pub fn resolve(&mut self, module_name: &str) -> Option<ResolvedModule> {
        if let Some(cached) = self.module_cache.get(module_name) {
            return cached.clone();
        }

        let resolved = self.find(module_name);
        match &resolved {
            Some(found) => debug!("Resolved '{module_name}' to {}", found.origin),
            None => debug!("'{module_name}' not found on any search root"),
        }

        self.module_cache
            .insert(module_name.to_owned(), resolved.clone());
        resolved
    }

    fn find(&mut self, module_name: &str) -> Option<ResolvedModule> {
        let found = match module_name.rsplit_once('.') {
            None if is_builtin_module(module_name) => return Some(ResolvedModule::builtin()),
            None => find_module(&self.search_dirs, module_name),
            Some((parent, last)) => {
                let parent = self.resolve(parent)?;
                match &parent.origin {
                    ModuleOrigin::Unlocated => return Some(ResolvedModule::unlocated()),
                    // Only packages have submodules
                    _ if !parent.is_package => return None,
                    ModuleOrigin::File(init) => {
                        let package_dir = init.parent()?.to_path_buf();
                        find_module(std::slice::from_ref(&package_dir), last)
                    }
                    ModuleOrigin::Namespace(portions) => find_module(portions, last),
                    ModuleOrigin::BuiltIn => None,
                }
            }
        };
        found.or_else(|| self.stdlib_fallback(module_name))
    }

    fn stdlib_fallback(&self, module_name: &str) -> Option<ResolvedModule> {
        if !is_stdlib_module(module_name, self.python_minor) {
            return None;
        }
        match self.stdlib {
            None => Some(ResolvedModule::unlocated()),
            Some(_) => (!module_name.contains('.')).then(ResolvedModule::builtin),
        }
    }
}

/// Turn a relative import into an absolute module name
///
/// `importer_is_package` decides whether one dot means the importer itself
/// (an `__init__`) or its parent. Returns `None` when the dots climb above
/// the top-level package.
pub fn resolve_relative_name(
    importer: &str,
    importer_is_package: bool,
    level: u32,
    module: Option<&str>,
) -> Option<String> {
    let mut package_parts: Vec<&str> = importer.split('.').collect();
    if !importer_is_package {
        package_parts.pop();
    }

    // One dot means the current package
    let climb = usize::try_from(level).ok()?.checked_sub(1)?;
    if climb >= package_parts.len() {
        return None;
    }
    package_parts.truncate(package_parts.len() - climb);

    if let Some(module) = module.filter(|m| !m.is_empty()) {
        package_parts.push(module);
    }
    Some(package_parts.join("."))
}

fn add_directory(unique_dirs: &mut IndexSet<PathBuf>, dir: &Path) {
    if !dir.is_dir() {
        debug!("Skipping missing search directory {}", dir.display());
        return;
    }
    unique_dirs.insert(canonicalize_path(dir.to_path_buf()));
}

/// Canonicalize a path, handling errors gracefully
fn canonicalize_path(path: PathBuf) -> PathBuf {
    match path.canonicalize() {
        Ok(canonical) => canonical,
        Err(e) => {
            warn!("Failed to canonicalize path {}: {}", path.display(), e);
            path
        }
    }
}

/// Find `name` in `dirs`, the way the interpreter's path finder does
///
/// Every directory is checked for a regular module first; the first hit
/// wins even when an earlier directory has a bare `name/` directory. Only
/// when no directory has one do the bare directories become the portions of
/// a namespace package.
fn find_module(dirs: &[PathBuf], name: &str) -> Option<ResolvedModule> {
    dirs.iter()
        .find_map(|dir| find_regular_module(dir, name))
        .or_else(|| {
            let portions: Vec<PathBuf> = dirs
                .iter()
                .map(|dir| dir.join(name))
                .filter(|portion| portion.is_dir())
                .map(canonicalize_path)
                .collect();
            (!portions.is_empty()).then(|| ResolvedModule {
                origin: ModuleOrigin::Namespace(portions),
                kind: ModuleKind::NamespacePackage,
                is_package: true,
            })
        })
}

/// In order: package `__init__.py`, extension module, `name.py`
fn find_regular_module(dir: &Path, name: &str) -> Option<ResolvedModule> {
    let package_init = dir.join(name).join("__init__.py");
    if package_init.is_file() {
        return Some(ResolvedModule {
            origin: ModuleOrigin::File(canonicalize_path(package_init)),
            kind: ModuleKind::PureSource,
            is_package: true,
        });
    }

    if let Some(extension) = find_extension_module(dir, name) {
        return Some(ResolvedModule {
            origin: ModuleOrigin::File(canonicalize_path(extension)),
            kind: ModuleKind::NativeExtension,
            is_package: false,
        });
    }

    let module_file = dir.join(format!("{name}.py"));
    module_file.is_file().then(|| ResolvedModule {
        origin: ModuleOrigin::File(canonicalize_path(module_file)),
        kind: ModuleKind::PureSource,
        is_package: false,
    })
}

/// Find `name.so`, `name.pyd` or `name.<abi-tag>.so|pyd` in `dir`
///
/// The untagged file wins; among tagged files the lexically first one does.
fn find_extension_module(dir: &Path, name: &str) -> Option<PathBuf> {
    for suffix in ["so", "pyd"] {
        let plain = dir.join(format!("{name}.{suffix}"));
        if plain.is_file() {
            return Some(plain);
        }
    }

    let prefix = format!("{name}.");
    let mut tagged: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            let Some(file_name) = path.file_name().and_then(OsStr::to_str) else {
                return false;
            };
            let Some(rest) = file_name.strip_prefix(&prefix) else {
                return false;
            };
            let tag = rest
                .strip_suffix(".so")
                .or_else(|| rest.strip_suffix(".pyd"));
            tag.is_some_and(|tag| !tag.is_empty() && !tag.contains(['/', '\\']))
                && path.is_file()
        })
        .collect();
    tagged.sort();
    tagged.into_iter().next()
}

/// Detect common virtual environment directory names
fn detect_fallback_virtualenv_paths(working_dir: &Path) -> Vec<PathBuf> {
    let common_venv_names = [".venv", "venv", "env", ".virtualenv", "virtualenv"];

    common_venv_names
        .iter()
        .map(|name| working_dir.join(name))
        .filter(|venv_path| {
            // Check if it looks like a virtual environment
            venv_path.join("pyvenv.cfg").is_file()
                || ((venv_path.join("bin").is_dir() || venv_path.join("Scripts").is_dir())
                    && venv_path.join("lib").is_dir())
        })
        .collect()
}

/// Get site-packages directories for a virtual environment
fn virtualenv_site_packages_directories(venv_path: &Path) -> Vec<PathBuf> {
    let mut site_packages_dirs = Vec::new();

    // Unix-style virtual environment
    let lib_dir = venv_path.join("lib");
    if lib_dir.is_dir()
        && let Ok(entries) = fs::read_dir(&lib_dir)
    {
        let mut found: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path().join("site-packages"))
            .filter(|site_packages| site_packages.is_dir())
            .collect();
        found.sort();
        site_packages_dirs.extend(found);
    }

    // Windows-style virtual environment
    let lib_site_packages = venv_path.join("Lib").join("site-packages");
    if lib_site_packages.is_dir() {
        site_packages_dirs.push(lib_site_packages);
    }

    site_packages_dirs
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;
    use crate::stdlib_detection::fixtures;

    fn create_test_file(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn resolver_for(entry: &Path, pathex: &[PathBuf]) -> ModuleResolver {
        ModuleResolver::new(
            entry,
            pathex,
            &Config::default(),
            &SearchEnvironment::default(),
        )
    }

    fn file_origin(path: &Path) -> Result<ModuleOrigin> {
        Ok(ModuleOrigin::File(path.canonicalize()?))
    }

    #[test]
    fn test_package_preferred_over_module() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.py"), "")?;
        create_test_file(&root.join("foo/__init__.py"), "# Package")?;
        create_test_file(&root.join("foo.py"), "# Module")?;

        let mut resolver = resolver_for(&root.join("main.py"), &[]);
        let resolved = resolver.resolve("foo").expect("foo should resolve");

        assert_eq!(resolved.origin, file_origin(&root.join("foo/__init__.py"))?);
        assert!(resolved.is_package);
        Ok(())
    }

    #[test]
    fn test_entry_dir_first_in_search_path() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let entry_dir = root.join("src/app");
        let entry_file = entry_dir.join("main.py");
        create_test_file(&entry_file, "# Main")?;
        create_test_file(&entry_dir.join("helper.py"), "# Helper")?;

        let other_src = root.join("lib");
        create_test_file(&other_src.join("helper.py"), "# Other helper")?;

        let mut resolver = resolver_for(&entry_file, std::slice::from_ref(&other_src));
        let resolved = resolver.resolve("helper").expect("helper should resolve");
        assert_eq!(resolved.origin, file_origin(&entry_dir.join("helper.py"))?);

        let search_dirs = resolver.search_directories();
        assert_eq!(search_dirs[0], entry_dir.canonicalize()?);
        assert_eq!(search_dirs[1], other_src.canonicalize()?);
        Ok(())
    }

    #[test]
    fn test_extension_module_resolution() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.py"), "")?;
        create_test_file(&root.join("PIL/__init__.py"), "")?;
        create_test_file(
            &root.join("PIL/_imaging.cpython-312-x86_64-linux-gnu.so"),
            "ELF",
        )?;
        create_test_file(&root.join("PIL/_imaging.py"), "# shadowed")?;
        create_test_file(&root.join("libtorrent.pyd"), "MZ")?;

        let mut resolver = resolver_for(&root.join("main.py"), &[]);

        let imaging = resolver.resolve("PIL._imaging").expect("extension should resolve");
        assert_eq!(imaging.kind, ModuleKind::NativeExtension);
        assert_eq!(
            imaging.origin,
            file_origin(&root.join("PIL/_imaging.cpython-312-x86_64-linux-gnu.so"))?
        );

        let libtorrent = resolver.resolve("libtorrent").expect("pyd should resolve");
        assert_eq!(libtorrent.kind, ModuleKind::NativeExtension);
        assert!(!libtorrent.is_package);
        Ok(())
    }

    #[test]
    fn test_namespace_package() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.py"), "")?;
        create_test_file(&root.join("namespace_pkg/subpkg/module.py"), "")?;

        let mut resolver = resolver_for(&root.join("main.py"), &[]);

        let namespace = resolver
            .resolve("namespace_pkg")
            .expect("namespace_pkg should resolve");
        assert_eq!(namespace.kind, ModuleKind::NamespacePackage);
        assert_eq!(
            namespace.origin,
            ModuleOrigin::Namespace(vec![root.join("namespace_pkg").canonicalize()?])
        );

        let module = resolver
            .resolve("namespace_pkg.subpkg.module")
            .expect("nested module should resolve");
        assert_eq!(module.kind, ModuleKind::PureSource);
        Ok(())
    }

    #[test]
    fn test_regular_module_in_later_root_beats_namespace_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        let app = root.join("app");
        let vendor = root.join("vendor");
        create_test_file(&app.join("main.py"), "")?;
        // a data directory that happens to share the module's name
        create_test_file(&app.join("helpers/notes.txt"), "")?;
        create_test_file(&vendor.join("helpers.py"), "")?;
        create_test_file(&app.join("shared/readme.txt"), "")?;
        create_test_file(&vendor.join("shared/__init__.py"), "")?;
        create_test_file(&app.join("codec/fixtures/a.bin"), "")?;
        create_test_file(&vendor.join("codec.pyd"), "MZ")?;

        let mut resolver = resolver_for(&app.join("main.py"), std::slice::from_ref(&vendor));

        let helpers = resolver.resolve("helpers").expect("helpers should resolve");
        assert_eq!(helpers.origin, file_origin(&vendor.join("helpers.py"))?);
        assert_eq!(helpers.kind, ModuleKind::PureSource);

        let shared = resolver.resolve("shared").expect("shared should resolve");
        assert_eq!(shared.origin, file_origin(&vendor.join("shared/__init__.py"))?);
        assert!(shared.is_package);

        let codec = resolver.resolve("codec").expect("codec should resolve");
        assert_eq!(codec.kind, ModuleKind::NativeExtension);
        Ok(())
    }

    #[test]
    fn test_namespace_portions_span_roots() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        let app = root.join("app");
        let vendor = root.join("vendor");
        create_test_file(&app.join("main.py"), "")?;
        create_test_file(&app.join("plugins/rss.py"), "")?;
        create_test_file(&vendor.join("plugins/atom.py"), "")?;

        let mut resolver = resolver_for(&app.join("main.py"), std::slice::from_ref(&vendor));

        let plugins = resolver.resolve("plugins").expect("plugins should resolve");
        assert_eq!(
            plugins.origin,
            ModuleOrigin::Namespace(vec![
                app.join("plugins").canonicalize()?,
                vendor.join("plugins").canonicalize()?,
            ])
        );
        assert_eq!(
            resolver.resolve("plugins.atom").map(|m| m.origin),
            Some(file_origin(&vendor.join("plugins/atom.py"))?)
        );
        assert!(resolver.resolve("plugins.rss").is_some());
        Ok(())
    }

    #[test]
    fn test_submodules_are_searched_in_their_package_only() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        let app = root.join("app");
        let vendor = root.join("vendor");
        create_test_file(&app.join("main.py"), "")?;
        create_test_file(&app.join("pkg/__init__.py"), "")?;
        create_test_file(&vendor.join("pkg/extra.py"), "")?;
        create_test_file(&app.join("single.py"), "")?;

        let mut resolver = resolver_for(&app.join("main.py"), std::slice::from_ref(&vendor));
        assert!(resolver.resolve("pkg").is_some_and(|m| m.is_package));
        assert_eq!(resolver.resolve("pkg.extra"), None);
        // a plain module has no submodules
        assert_eq!(resolver.resolve("single.part"), None);
        Ok(())
    }

    #[test]
    fn test_stdlib_names_without_layout_are_unlocated() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.py"), "")?;

        let mut resolver = resolver_for(&root.join("main.py"), &[]);
        assert_eq!(resolver.resolve("json"), Some(ResolvedModule::unlocated()));
        assert_eq!(resolver.resolve("json.decoder"), Some(ResolvedModule::unlocated()));
        assert_eq!(resolver.resolve("sys"), Some(ResolvedModule::builtin()));
        assert_eq!(resolver.resolve("definitely_not_installed"), None);
        Ok(())
    }

    #[test]
    fn test_stdlib_resolves_to_files_under_layout() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("app/main.py"), "")?;
        let stdlib_root = root.join("python/lib/python3.12");
        fixtures::fake_stdlib(&stdlib_root)?;
        let site_packages = root.join("venv/lib/python3.12/site-packages");
        create_test_file(&site_packages.join("psutil/__init__.py"), "")?;

        let layout = StdlibLayout::at(&stdlib_root).expect("fixture has os.py");
        let environment = SearchEnvironment {
            virtual_env: Some(root.join("venv")),
            ..Default::default()
        };
        let mut resolver = ModuleResolver::new(
            &root.join("app/main.py"),
            &[],
            &Config::default(),
            &environment,
        )
        .with_stdlib(layout);

        assert_eq!(
            resolver.search_directories(),
            &[
                root.join("app").canonicalize()?,
                stdlib_root.canonicalize()?,
                stdlib_root.join("lib-dynload").canonicalize()?,
                site_packages.canonicalize()?,
            ]
        );

        let json = resolver.resolve("json").expect("json should resolve");
        assert_eq!(json.origin, file_origin(&stdlib_root.join("json/__init__.py"))?);
        assert!(json.is_package);
        assert_eq!(
            resolver.resolve("json.decoder").map(|m| m.origin),
            Some(file_origin(&stdlib_root.join("json/decoder.py"))?)
        );

        let extension = resolver.resolve("_struct").expect("_struct should resolve");
        assert_eq!(extension.kind, ModuleKind::NativeExtension);

        // compiled into this interpreter build
        assert_eq!(resolver.resolve("_json"), Some(ResolvedModule::builtin()));
        // set up by `os` itself, never a file
        assert_eq!(resolver.resolve("os.path"), None);
        assert!(resolver.resolve("psutil").is_some());
        Ok(())
    }

    #[test]
    fn test_local_module_shadows_stdlib() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("main.py"), "")?;
        create_test_file(&root.join("json.py"), "")?;

        let mut resolver = resolver_for(&root.join("main.py"), &[]);
        let resolved = resolver.resolve("json").expect("json should resolve");
        assert_eq!(resolved.origin, file_origin(&root.join("json.py"))?);
        Ok(())
    }

    #[test]
    fn test_virtualenv_site_packages_are_searched_last() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("app/main.py"), "")?;
        let site_packages = root.join("venv/lib/python3.12/site-packages");
        create_test_file(&site_packages.join("psutil/__init__.py"), "")?;

        let environment = SearchEnvironment {
            virtual_env: Some(root.join("venv")),
            ..Default::default()
        };
        let mut resolver = ModuleResolver::new(
            &root.join("app/main.py"),
            &[],
            &Config::default(),
            &environment,
        );

        assert_eq!(
            resolver.search_directories().last(),
            Some(&site_packages.canonicalize()?)
        );
        assert!(resolver.resolve("psutil").is_some());
        Ok(())
    }

    #[test]
    fn test_fallback_virtualenv_detection() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        create_test_file(&root.join("app/main.py"), "")?;
        create_test_file(&root.join(".venv/pyvenv.cfg"), "home = /usr/bin\n")?;
        let site_packages = root.join(".venv/lib/python3.11/site-packages");
        create_test_file(&site_packages.join("requests/__init__.py"), "")?;

        let environment = SearchEnvironment {
            working_dir: Some(root.to_path_buf()),
            ..Default::default()
        };
        let mut resolver = ModuleResolver::new(
            &root.join("app/main.py"),
            &[],
            &Config::default(),
            &environment,
        );
        assert!(resolver.resolve("requests").is_some());
        Ok(())
    }

    #[test]
    fn test_relative_name_arithmetic() {
        // from a module inside a package
        assert_eq!(
            resolve_relative_name("pkg.sub.mod", false, 1, Some("sibling")),
            Some("pkg.sub.sibling".to_owned())
        );
        assert_eq!(
            resolve_relative_name("pkg.sub.mod", false, 2, Some("core")),
            Some("pkg.core".to_owned())
        );
        assert_eq!(
            resolve_relative_name("pkg.sub.mod", false, 1, None),
            Some("pkg.sub".to_owned())
        );

        // from a package __init__
        assert_eq!(
            resolve_relative_name("pkg.sub", true, 1, Some("mod")),
            Some("pkg.sub.mod".to_owned())
        );

        // too many dots
        assert_eq!(resolve_relative_name("pkg.mod", false, 3, Some("x")), None);
        // a top-level module has no package
        assert_eq!(resolve_relative_name("main", false, 1, Some("x")), None);
    }
}
