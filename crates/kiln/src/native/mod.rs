//! Native-binary resolver
//!
//! Locates every native extension module and manifest binary, follows their
//! link-time dependencies, and assigns each file a collision-free destination
//! inside the bundle's binary tree. The result is in load order: a binary
//! always comes after everything it links against.

mod inspect;
mod system;

use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use cow_utils::CowUtils;
use indexmap::IndexMap;
use log::{debug, info, trace};
use petgraph::{
    algo::{tarjan_scc, toposort},
    graph::{DiGraph, NodeIndex},
};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

pub use self::{
    inspect::{BinaryFormat, InspectError, LinkInfo, LinkInspector, ObjectInspector, parse_link_info},
    system::SystemLibraries,
};
use crate::{
    config::Config,
    error::{BuildError, BuildResult, BuildWarning, Diagnostics, Stage},
    manifest::{BinarySource, Manifest},
    types::{BinaryProvenance, BinaryRef, ModuleOrigin, ModuleSet},
};

/// Directories searched for libraries, in priority order after the
/// requiring binary's own directory and its rpaths
#[derive(Debug, Clone, Default)]
pub struct LibrarySearch {
    /// Configured library paths
    pub library_paths: Vec<PathBuf>,
    /// Module search roots from the analyzer
    pub module_roots: Vec<PathBuf>,
    /// The platform's loader path variable (`LD_LIBRARY_PATH`, `DYLD_LIBRARY_PATH`, `PATH`)
    pub host_paths: Vec<PathBuf>,
}

impl LibrarySearch {
    pub fn new(config: &Config, module_roots: &[PathBuf]) -> Self {
        Self {
            library_paths: config.library_paths.clone(),
            module_roots: module_roots.to_vec(),
            host_paths: host_library_paths(|key| env::var_os(key)),
        }
    }

    /// Path of `path` below the innermost module root containing it
    ///
    /// Roots nest (`lib-dynload` sits inside the standard library root), and
    /// the innermost one is the directory the interpreter searches.
    fn relative_to_module_root(&self, path: &Path) -> Option<PathBuf> {
        self.module_roots
            .iter()
            .filter_map(|root| {
                path.strip_prefix(root)
                    .or_else(|_| path.strip_prefix(canonical(root)))
                    .ok()
                    .map(Path::to_path_buf)
            })
            .min_by_key(|relative| relative.components().count())
    }
}

/// Library directories from the loader's environment variable
pub fn host_library_paths(lookup: impl Fn(&str) -> Option<OsString>) -> Vec<PathBuf> {
    let key = if cfg!(windows) {
        "PATH"
    } else if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else {
        "LD_LIBRARY_PATH"
    };
    lookup(key)
        .map(|value| {
            env::split_paths(&value)
                .filter(|path| !path.as_os_str().is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Resolve all binaries for a bundle
pub fn resolve_binaries(
    manifest: &Manifest,
    modules: &ModuleSet,
    config: &Config,
    search: LibrarySearch,
    inspector: &dyn LinkInspector,
    diagnostics: &mut Diagnostics,
) -> BuildResult<Vec<BinaryRef>> {
    let system = SystemLibraries::new(
        &config.system_library_excludes,
        config.bundle_system_libraries,
    )
    .map_err(|reason| BuildError::invalid_manifest(crate::dirs::CONFIG_FILE_NAME, reason))?;
    NativeResolver::new(search, system, inspector, diagnostics).resolve(manifest, modules)
}

#[derive(Debug)]
struct Placement {
    source: PathBuf,
    provenance: BinaryProvenance,
    depends_on: Vec<PathBuf>,
}

pub struct NativeResolver<'a> {
    search: LibrarySearch,
    system: SystemLibraries,
    inspector: &'a dyn LinkInspector,
    diagnostics: &'a mut Diagnostics,
    /// Destination -> placement, in discovery order
    placements: IndexMap<PathBuf, Placement>,
    /// Canonical source -> destination it was first placed at
    by_source: FxHashMap<PathBuf, PathBuf>,
}

impl std::fmt::Debug for NativeResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeResolver")
            .field("search", &self.search)
            .field("placements", &self.placements)
            .finish_non_exhaustive()
    }
}

impl<'a> NativeResolver<'a> {
    pub fn new(
        search: LibrarySearch,
        system: SystemLibraries,
        inspector: &'a dyn LinkInspector,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        Self {
            search,
            system,
            inspector,
            diagnostics,
            placements: IndexMap::new(),
            by_source: FxHashMap::default(),
        }
    }

    pub fn resolve(mut self, manifest: &Manifest, modules: &ModuleSet) -> BuildResult<Vec<BinaryRef>> {
        let mut wave = self.place_seeds(manifest, modules)?;

        while !wave.is_empty() {
            trace!("Inspecting {} binaries", wave.len());
            let placements = &self.placements;
            let inspector = self.inspector;
            let inspected: Vec<(PathBuf, Result<LinkInfo, InspectError>)> = wave
                .par_iter()
                .map(|dest| (dest.clone(), inspector.inspect(&placements[dest].source)))
                .collect();

            let mut next = Vec::new();
            for (dest, result) in inspected {
                match result {
                    Ok(info) => next.extend(self.place_dependencies(&dest, &info)?),
                    Err(InspectError::Io { source, .. }) => {
                        return Err(BuildError::BinaryRead {
                            path: self.placements[&dest].source.clone(),
                            source,
                        });
                    }
                    Err(InspectError::Unrecognized(reason)) => {
                        self.diagnostics.warn(
                            Stage::Resolver,
                            BuildWarning::UninspectableBinary {
                                path: self.placements[&dest].source.clone(),
                                reason,
                            },
                        );
                    }
                }
            }
            wave = next;
        }

        let ordered = self.load_order()?;
        info!("Resolved {} native binaries", ordered.len());
        Ok(ordered)
    }

    /// Place manifest binaries first, then extension modules
    fn place_seeds(&mut self, manifest: &Manifest, modules: &ModuleSet) -> BuildResult<Vec<PathBuf>> {
        let mut wave = Vec::new();

        for binary in &manifest.binaries {
            // Keep the requested file name; the canonical one may be a versioned target
            let found = self.locate_manifest_binary(&binary.source)?;
            let dest = binary.dest_dir.join(found.file_name().unwrap_or_default());
            wave.extend(self.place(dest, canonical(&found), BinaryProvenance::Manifest)?);
        }

        if let Some(interpreter) = &manifest.interpreter {
            if !interpreter.is_file() {
                return Err(BuildError::MissingRequiredBinary {
                    requested: interpreter.display().to_string(),
                    found_at: Some(interpreter.clone()),
                });
            }
            let source = canonical(interpreter);
            let dest = PathBuf::from(interpreter.file_name().unwrap_or_default());
            wave.extend(self.place(dest, source, BinaryProvenance::Manifest)?);
        }

        for module in modules.native_extensions() {
            let ModuleOrigin::File(path) = &module.origin else {
                continue;
            };
            let source = canonical(path);
            let dest = extension_destination(&module.name, &source);
            wave.extend(self.place(
                dest,
                source,
                BinaryProvenance::ExtensionModule(module.name.clone()),
            )?);
        }

        Ok(wave)
    }

    fn locate_manifest_binary(&self, source: &BinarySource) -> BuildResult<PathBuf> {
        match source {
            BinarySource::Path(path) => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(BuildError::MissingRequiredBinary {
                        requested: source.describe(),
                        found_at: Some(path.clone()),
                    })
                }
            }
            BinarySource::Name(name) => self
                .search
                .library_paths
                .iter()
                .chain(&self.search.module_roots)
                .map(|dir| dir.join(name))
                .find(|candidate| candidate.is_file())
                .ok_or_else(|| BuildError::MissingRequiredBinary {
                    requested: name.clone(),
                    found_at: None,
                }),
        }
    }

    /// Record a placement; returns the destination when it is new
    fn place(
        &mut self,
        dest: PathBuf,
        source: PathBuf,
        provenance: BinaryProvenance,
    ) -> BuildResult<Option<PathBuf>> {
        if let Some(existing) = self.placements.get(&dest) {
            if existing.source == source || same_contents(&existing.source, &source)? {
                debug!(
                    "{} already placed at {}; merging",
                    source.display(),
                    dest.display()
                );
                return Ok(None);
            }
            return Err(BuildError::DestinationCollision {
                stage: Stage::Resolver,
                dest,
                existing: existing.source.clone(),
                incoming: source,
            });
        }

        debug!("Placing {} at {}", source.display(), dest.display());
        self.by_source
            .entry(source.clone())
            .or_insert_with(|| dest.clone());
        self.placements.insert(
            dest.clone(),
            Placement {
                source,
                provenance,
                depends_on: Vec::new(),
            },
        );
        Ok(Some(dest))
    }

    fn place_dependencies(&mut self, dest: &Path, info: &LinkInfo) -> BuildResult<Vec<PathBuf>> {
        let requiring = self.placements[dest].source.clone();
        let mut new = Vec::new();
        let mut depends_on = Vec::new();

        for needed in &info.needed {
            if self.system.is_system_library(needed) {
                trace!("Skipping system library {needed}");
                continue;
            }

            let Some(found) = self.locate_dependency(needed, &requiring, &info.rpaths) else {
                self.diagnostics.warn(
                    Stage::Resolver,
                    BuildWarning::MissingOptionalBinary {
                        name: needed.clone(),
                        required_by: dest.to_path_buf(),
                    },
                );
                continue;
            };

            let source = canonical(&found);
            if source == requiring {
                continue;
            }

            let dep_dest = match self.by_source.get(&source) {
                Some(existing) => existing.clone(),
                None => {
                    let dep_dest = self.dependency_destination(needed, &found);
                    let provenance = BinaryProvenance::LinkDependency {
                        required_by: dest.to_path_buf(),
                    };
                    new.extend(self.place(dep_dest.clone(), source, provenance)?);
                    dep_dest
                }
            };
            if !depends_on.contains(&dep_dest) {
                depends_on.push(dep_dest);
            }
        }

        if let Some(placement) = self.placements.get_mut(dest) {
            placement.depends_on.extend(depends_on);
        }
        Ok(new)
    }

    /// Root-relative path for files under a module root, else the requested
    /// name at the tree root
    fn dependency_destination(&self, needed: &str, found: &Path) -> PathBuf {
        // Resolve `..` from rpath expansion but keep the file name the loader asked for
        let located = match (found.parent(), found.file_name()) {
            (Some(dir), Some(name)) => canonical(dir).join(name),
            _ => found.to_path_buf(),
        };
        if let Some(relative) = self.search.relative_to_module_root(&located) {
            return relative;
        }
        Path::new(needed)
            .file_name()
            .map_or_else(|| PathBuf::from(needed), PathBuf::from)
    }

    /// Find a needed library the way the loader would
    fn locate_dependency(&self, needed: &str, requiring: &Path, rpaths: &[String]) -> Option<PathBuf> {
        let origin = requiring.parent().unwrap_or_else(|| Path::new("/"));

        if let Some(rest) = needed
            .strip_prefix("@loader_path/")
            .or_else(|| needed.strip_prefix("@executable_path/"))
        {
            return existing_file(origin.join(rest));
        }

        let needed_path = Path::new(needed);
        if needed_path.is_absolute() {
            return existing_file(needed_path.to_path_buf());
        }

        let relative = needed.strip_prefix("@rpath/").unwrap_or(needed);
        let rpath_dirs = rpaths.iter().map(|rpath| expand_origin(rpath, origin));

        std::iter::once(origin.to_path_buf())
            .chain(rpath_dirs)
            .chain(self.search.library_paths.iter().cloned())
            .chain(self.search.module_roots.iter().cloned())
            .chain(self.search.host_paths.iter().cloned())
            .find_map(|dir| existing_file(dir.join(relative)))
    }

    /// Order placements so dependencies load first; cycles are fatal
    fn load_order(self) -> BuildResult<Vec<BinaryRef>> {
        let order: Vec<PathBuf> = {
            let mut graph: DiGraph<&Path, ()> = DiGraph::new();
            let nodes: IndexMap<&Path, NodeIndex> = self
                .placements
                .keys()
                .map(|dest| (dest.as_path(), graph.add_node(dest.as_path())))
                .collect();

            for (dest, placement) in &self.placements {
                for dependency in &placement.depends_on {
                    if let (Some(&from), Some(&to)) =
                        (nodes.get(dependency.as_path()), nodes.get(dest.as_path()))
                    {
                        graph.update_edge(from, to, ());
                    }
                }
            }

            let sorted = toposort(&graph, None).map_err(|_| {
                let cycle = tarjan_scc(&graph)
                    .into_iter()
                    .find(|component| component.len() > 1)
                    .map(|component| {
                        let mut members: Vec<PathBuf> =
                            component.iter().map(|n| graph[*n].to_path_buf()).collect();
                        members.sort();
                        members
                    })
                    .unwrap_or_default();
                BuildError::BinaryDependencyCycle { cycle }
            })?;
            sorted.iter().map(|n| graph[*n].to_path_buf()).collect()
        };

        let mut placements = self.placements;
        Ok(order
            .into_iter()
            .filter_map(|dest| {
                let placement = placements.swap_remove(&dest)?;
                let mut depends_on = placement.depends_on;
                depends_on.sort();
                Some(BinaryRef {
                    source: placement.source,
                    dest,
                    depends_on,
                    provenance: placement.provenance,
                })
            })
            .collect())
    }
}

/// `PIL._imaging` backed by `.../_imaging.cpython-312-x86_64-linux-gnu.so`
/// lands at `PIL/_imaging.cpython-312-x86_64-linux-gnu.so`
fn extension_destination(module_name: &str, source: &Path) -> PathBuf {
    let mut dest: PathBuf = module_name.split('.').collect();
    dest.pop();
    if let Some(file_name) = source.file_name() {
        dest.push(file_name);
    }
    dest
}

fn expand_origin(rpath: &str, origin: &Path) -> PathBuf {
    let origin_text = origin.to_string_lossy();
    let expanded = rpath.cow_replace("${ORIGIN}", origin_text.as_ref());
    let expanded = expanded.cow_replace("$ORIGIN", origin_text.as_ref());
    let expanded = expanded.cow_replace("@loader_path", origin_text.as_ref());
    let expanded = expanded.cow_replace("@executable_path", origin_text.as_ref());
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        path
    } else {
        origin.join(path)
    }
}

fn existing_file(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn same_contents(a: &Path, b: &Path) -> BuildResult<bool> {
    Ok(file_digest(a)? == file_digest(b)?)
}

fn file_digest(path: &Path) -> BuildResult<[u8; 32]> {
    let bytes = fs::read(path).map_err(|source| BuildError::BinaryRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Sha256::digest(&bytes).into())
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, path::Path};

    use anyhow::Result;
    use tempfile::TempDir;

    use super::*;
    use crate::types::{DiscoveryReason, ModuleKind, ModuleRef};

    /// Link info keyed by file name; files not listed are unrecognized
    #[derive(Default)]
    struct FakeInspector {
        needed: HashMap<String, Vec<String>>,
    }

    impl FakeInspector {
        fn with(mut self, file: &str, needed: &[&str]) -> Self {
            self.needed.insert(
                file.to_owned(),
                needed.iter().map(|n| (*n).to_owned()).collect(),
            );
            self
        }
    }

    impl LinkInspector for FakeInspector {
        fn inspect(&self, path: &Path) -> Result<LinkInfo, InspectError> {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            self.needed
                .get(&name)
                .map(|needed| LinkInfo {
                    format: BinaryFormat::Elf,
                    needed: needed.clone(),
                    rpaths: Vec::new(),
                })
                .ok_or_else(|| InspectError::Unrecognized(format!("unknown {name}")))
        }
    }

    fn touch(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    fn manifest_for(root: &Path, extra: &str) -> Result<Manifest> {
        touch(&root.join("main.py"), "")?;
        let text = format!("name = \"app\"\nentry = \"main.py\"\n{extra}");
        Ok(Manifest::parse(&text, &root.join("app.kiln.toml"), root)?)
    }

    fn extension(name: &str, path: &Path) -> ModuleRef {
        ModuleRef::new(
            name,
            ModuleOrigin::File(path.to_path_buf()),
            ModuleKind::NativeExtension,
            false,
            DiscoveryReason::StaticImport,
        )
    }

    fn search(root: &Path, libs: &Path) -> Result<LibrarySearch> {
        Ok(LibrarySearch {
            library_paths: vec![libs.canonicalize()?],
            module_roots: vec![root.canonicalize()?],
            host_paths: Vec::new(),
        })
    }

    #[test]
    fn test_load_order_and_destinations() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("site");
        let libs = temp_dir.path().join("libs");
        touch(&root.join("PIL/_imaging.cpython-312.so"), "imaging")?;
        touch(&root.join("PIL.libs/libwebp.so.7"), "webp")?;
        touch(&libs.join("libsharpyuv.so.0"), "sharpyuv")?;
        let manifest = manifest_for(temp_dir.path(), "")?;

        let modules = ModuleSet::new(
            "main".to_owned(),
            [extension("PIL._imaging", &root.join("PIL/_imaging.cpython-312.so"))],
        );
        let inspector = FakeInspector::default()
            .with("_imaging.cpython-312.so", &["libc.so.6", "libwebp.so.7"])
            .with("libwebp.so.7", &["libsharpyuv.so.0"])
            .with("libsharpyuv.so.0", &[]);
        // libwebp lives next to the extension's package in PIL.libs
        let mut search = search(&root, &libs)?;
        search
            .library_paths
            .push(root.join("PIL.libs").canonicalize()?);

        let mut diagnostics = Diagnostics::new();
        let binaries = NativeResolver::new(search, SystemLibraries::default(), &inspector, &mut diagnostics)
            .resolve(&manifest, &modules)?;

        let dests: Vec<_> = binaries.iter().map(|b| b.dest.clone()).collect();
        assert_eq!(
            dests,
            vec![
                PathBuf::from("libsharpyuv.so.0"),
                PathBuf::from("PIL.libs/libwebp.so.7"),
                PathBuf::from("PIL/_imaging.cpython-312.so"),
            ]
        );
        assert_eq!(
            binaries[2].depends_on,
            vec![PathBuf::from("PIL.libs/libwebp.so.7")]
        );
        assert!(diagnostics.is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_manifest_binary_is_fatal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        fs::create_dir_all(root.join("libs"))?;
        let manifest = manifest_for(root, "[[binaries]]\nsource = \"libtorrent-rasterbar.so.2.0\"\n")?;

        let mut diagnostics = Diagnostics::new();
        let inspector = FakeInspector::default();
        let result = NativeResolver::new(
            search(root, &root.join("libs"))?,
            SystemLibraries::default(),
            &inspector,
            &mut diagnostics,
        )
        .resolve(&manifest, &ModuleSet::default());

        match result {
            Err(error @ BuildError::MissingRequiredBinary { .. }) => {
                assert_eq!(error.exit_code(), 4);
            }
            other => panic!("expected MissingRequiredBinary, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_missing_dependency_warns() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        touch(&root.join("libs/libtorrent-rasterbar.so.2.0"), "lt")?;
        let manifest = manifest_for(root, "[[binaries]]\nsource = \"libtorrent-rasterbar.so.2.0\"\n")?;
        let inspector =
            FakeInspector::default().with("libtorrent-rasterbar.so.2.0", &["libGeoIP.so.1"]);

        let mut diagnostics = Diagnostics::new();
        let binaries = NativeResolver::new(
            search(root, &root.join("libs"))?,
            SystemLibraries::default(),
            &inspector,
            &mut diagnostics,
        )
        .resolve(&manifest, &ModuleSet::default())?;

        assert_eq!(binaries.len(), 1);
        assert!(matches!(
            &diagnostics.warnings()[0].warning,
            BuildWarning::MissingOptionalBinary { name, .. } if name == "libGeoIP.so.1"
        ));
        Ok(())
    }

    #[test]
    fn test_collisions() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        touch(&root.join("a/libz.so.1"), "zlib 1.3")?;
        touch(&root.join("b/libz.so.1"), "zlib 1.3")?;
        touch(&root.join("c/libz.so.1"), "zlib 1.2")?;

        let identical = manifest_for(
            root,
            "[[binaries]]\nsource = \"a/libz.so.1\"\n[[binaries]]\nsource = \"b/libz.so.1\"\n",
        )?;
        let inspector = FakeInspector::default().with("libz.so.1", &[]);
        let mut diagnostics = Diagnostics::new();
        let binaries = NativeResolver::new(
            search(root, root)?,
            SystemLibraries::default(),
            &inspector,
            &mut diagnostics,
        )
        .resolve(&identical, &ModuleSet::default())?;
        assert_eq!(binaries.len(), 1);

        let conflicting = manifest_for(
            root,
            "[[binaries]]\nsource = \"a/libz.so.1\"\n[[binaries]]\nsource = \"c/libz.so.1\"\n",
        )?;
        let result = NativeResolver::new(
            search(root, root)?,
            SystemLibraries::default(),
            &inspector,
            &mut diagnostics,
        )
        .resolve(&conflicting, &ModuleSet::default());
        assert!(matches!(
            result,
            Err(BuildError::DestinationCollision {
                stage: Stage::Resolver,
                ..
            })
        ));
        Ok(())
    }

    #[test]
    fn test_dependency_cycle_is_fatal() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();
        touch(&root.join("libs/liba.so"), "a")?;
        touch(&root.join("libs/libb.so"), "b")?;
        fs::create_dir_all(root.join("site"))?;
        let manifest = manifest_for(root, "[[binaries]]\nsource = \"liba.so\"\n")?;
        let inspector = FakeInspector::default()
            .with("liba.so", &["libb.so"])
            .with("libb.so", &["liba.so"]);

        let mut diagnostics = Diagnostics::new();
        let result = NativeResolver::new(
            search(&root.join("site"), &root.join("libs"))?,
            SystemLibraries::default(),
            &inspector,
            &mut diagnostics,
        )
        .resolve(&manifest, &ModuleSet::default());

        match result {
            Err(BuildError::BinaryDependencyCycle { cycle }) => {
                assert_eq!(cycle, vec![PathBuf::from("liba.so"), PathBuf::from("libb.so")]);
            }
            other => panic!("expected BinaryDependencyCycle, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_origin_expansion() {
        let origin = Path::new("/opt/app/lib");
        assert_eq!(
            expand_origin("$ORIGIN/../deps", origin),
            PathBuf::from("/opt/app/lib/../deps")
        );
        assert_eq!(
            expand_origin("${ORIGIN}", origin),
            PathBuf::from("/opt/app/lib")
        );
        assert_eq!(expand_origin("/usr/local/lib", origin), PathBuf::from("/usr/local/lib"));
    }

    #[test]
    fn test_host_library_paths() {
        let paths = host_library_paths(|_| Some(OsString::from("/opt/a::/opt/b")));
        if !cfg!(windows) {
            assert_eq!(paths, vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]);
        }
    }

    #[test]
    fn test_innermost_module_root_wins() {
        let search = LibrarySearch {
            module_roots: vec![
                PathBuf::from("/opt/python/lib/python3.12"),
                PathBuf::from("/opt/python/lib/python3.12/lib-dynload"),
            ],
            ..LibrarySearch::default()
        };
        assert_eq!(
            search.relative_to_module_root(Path::new("/opt/python/lib/python3.12/lib-dynload/libmpdec.so.2")),
            Some(PathBuf::from("libmpdec.so.2"))
        );
        assert_eq!(
            search.relative_to_module_root(Path::new("/opt/python/lib/python3.12/vendor/libz.so")),
            Some(PathBuf::from("vendor/libz.so"))
        );
        assert_eq!(search.relative_to_module_root(Path::new("/usr/lib/libc.so.6")), None);
    }
}
