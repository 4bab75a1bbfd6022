//! Import-graph analyzer
//!
//! Breadth-first walk from the roots (entry point, modules the interpreter
//! and the bootstrap load at startup, imports of runtime hooks, hidden
//! imports) over statically discoverable imports. Imports cut by an
//! exclusion rule stay in the graph as severed edges; the result is the set
//! of modules reachable from a root over live edges.

use std::{
    collections::{BTreeSet, VecDeque},
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use log::{debug, info, trace};
use ruff_python_parser::parse_module;
use ruff_text_size::TextSize;
use rustc_hash::FxHashSet;

use crate::{
    config::Config,
    error::{BuildError, BuildResult, BuildWarning, Diagnostics, Stage},
    exclusion::{ExclusionRule, ExclusionSet},
    launcher::BOOTSTRAP_SOURCE,
    manifest::{HookSpec, Manifest},
    module_graph::{Edge, ModuleGraph, ModuleId},
    resolver::{ModuleResolver, ResolvedModule, SearchEnvironment, resolve_relative_name},
    stdlib_detection::{INTERPRETER_STARTUP_MODULES, StdlibLayout},
    types::{
        DiscoveryReason, ModuleKind, ModuleOrigin, ModuleRef, ModuleSet, OpaqueReason,
        parent_module_name,
    },
    visitors::{DiscoveredImport, ImportKind, ModuleImports, discover_imports},
};

/// Output of the analyzer stage
#[derive(Debug, Clone)]
pub struct Analysis {
    pub modules: ModuleSet,
    /// Search roots in priority order, reused by the native resolver
    pub search_roots: Vec<PathBuf>,
    /// Target standard library, when one was located
    pub stdlib: Option<StdlibLayout>,
    /// Modules matched by an exclusion rule and not retained
    pub excluded: BTreeSet<String>,
    /// Direct imports per retained module
    pub edges: IndexMap<String, Vec<String>>,
}

/// A standard library source the interpreter needs before the archive
/// importer exists
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StartupSource {
    pub source: PathBuf,
    /// Path below the standard library root
    pub relative: PathBuf,
}

impl Analysis {
    /// Standard library sources reachable from the interpreter startup
    /// modules over retained imports
    pub fn startup_sources(&self) -> Vec<StartupSource> {
        let Some(stdlib) = &self.stdlib else {
            return Vec::new();
        };
        let mut seen = FxHashSet::default();
        let mut queue: VecDeque<&str> = INTERPRETER_STARTUP_MODULES.iter().copied().collect();
        let mut sources = Vec::new();
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            let Some(module) = self.modules.get(name) else {
                continue;
            };
            if let ModuleOrigin::File(path) = &module.origin
                && module.kind == ModuleKind::PureSource
                && let Some(relative) = stdlib.relative(path)
            {
                sources.push(StartupSource {
                    source: path.clone(),
                    relative,
                });
                if let Some(dependencies) = self.edges.get(name) {
                    queue.extend(dependencies.iter().map(String::as_str));
                }
            }
        }
        sources.sort();
        sources
    }
}

/// Who an import belongs to
#[derive(Debug, Clone, Copy)]
enum Importer<'a> {
    Module {
        id: ModuleId,
        name: &'a str,
        is_package: bool,
    },
    Hook(&'a HookSpec),
    /// The generated bootstrap, before any user code runs
    Startup,
}

impl Importer<'_> {
    fn describe(&self) -> String {
        match self {
            Self::Module { name, .. } => (*name).to_owned(),
            Self::Hook(hook) => format!("runtime hook '{}'", hook.name),
            Self::Startup => "interpreter startup".to_owned(),
        }
    }

    fn module_name(&self) -> Option<&str> {
        match self {
            Self::Module { name, .. } => Some(*name),
            Self::Hook(_) | Self::Startup => None,
        }
    }
}

/// Run the analyzer over a manifest
pub fn analyze(
    manifest: &Manifest,
    config: &Config,
    environment: &SearchEnvironment,
    diagnostics: &mut Diagnostics,
) -> BuildResult<Analysis> {
    let mut resolver = ModuleResolver::new(&manifest.entry, &manifest.pathex, config, environment);
    match StdlibLayout::locate(config, manifest.interpreter.as_deref(), &environment.virtual_envs()) {
        Some(layout) => resolver = resolver.with_stdlib(layout),
        None => diagnostics.warn(
            Stage::Analyzer,
            BuildWarning::StdlibNotLocated {
                python_version: format!("3.{}", config.python_minor),
            },
        ),
    }
    ImportGraphAnalyzer::new(manifest, resolver, diagnostics).run()
}

struct ImportGraphAnalyzer<'a> {
    manifest: &'a Manifest,
    resolver: ModuleResolver,
    graph: ModuleGraph,
    exclusions: ExclusionSet,
    /// Hidden imports, their parent packages and the startup modules;
    /// exclusion rules never apply to these
    exempt: FxHashSet<String>,
    /// Every name an exclusion rule matched
    matched: BTreeSet<String>,
    queue: VecDeque<ModuleId>,
    queued: FxHashSet<ModuleId>,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> ImportGraphAnalyzer<'a> {
    fn new(
        manifest: &'a Manifest,
        resolver: ModuleResolver,
        diagnostics: &'a mut Diagnostics,
    ) -> Self {
        let mut exempt: FxHashSet<String> = INTERPRETER_STARTUP_MODULES
            .iter()
            .map(|name| (*name).to_owned())
            .collect();
        for hidden in &manifest.hidden_imports {
            let mut name = hidden.as_str();
            exempt.insert(name.to_owned());
            while let Some(parent) = parent_module_name(name) {
                exempt.insert(parent.to_owned());
                name = parent;
            }
        }

        Self {
            manifest,
            resolver,
            graph: ModuleGraph::new(),
            exclusions: ExclusionSet::new(manifest.excludes.iter().cloned()),
            exempt,
            matched: BTreeSet::new(),
            queue: VecDeque::new(),
            queued: FxHashSet::default(),
            diagnostics,
        }
    }

    fn run(mut self) -> BuildResult<Analysis> {
        let entry_name = self.add_entry_point();
        self.add_startup_modules()?;
        self.add_hidden_imports()?;
        self.add_hook_imports()?;

        while let Some(id) = self.queue.pop_front() {
            self.expand(id)?;
        }

        let unmatched: Vec<String> = self
            .exclusions
            .unmatched()
            .map(|rule| rule.pattern().to_owned())
            .collect();
        for pattern in unmatched {
            self.diagnostics
                .warn(Stage::Analyzer, BuildWarning::ExclusionNoMatch { pattern });
        }

        let modules = self.graph.to_module_set(&entry_name);
        for module in modules.iter() {
            let Some(reason) = &module.statically_opaque else {
                continue;
            };
            if self.in_stdlib(&module.origin) {
                trace!("Standard library module '{}' is {reason}", module.name);
                continue;
            }
            self.diagnostics.warn(
                Stage::Analyzer,
                BuildWarning::StaticallyOpaqueModule {
                    module: module.name.clone(),
                    reason: reason.to_string(),
                },
            );
        }

        let edges = modules
            .iter()
            .filter_map(|module| {
                let id = self.graph.id_of(&module.name)?;
                let dependencies = self
                    .graph
                    .dependencies(id)
                    .into_iter()
                    .filter(|name| modules.contains(name))
                    .map(str::to_owned)
                    .collect();
                Some((module.name.clone(), dependencies))
            })
            .collect();

        let excluded: BTreeSet<String> = self
            .matched
            .into_iter()
            .filter(|name| !modules.contains(name))
            .collect();

        info!(
            "Analyzed {} modules ({} retained, {} excluded)",
            self.graph.module_count(),
            modules.len(),
            excluded.len()
        );

        Ok(Analysis {
            modules,
            search_roots: self.resolver.search_directories().to_vec(),
            stdlib: self.resolver.stdlib().cloned(),
            excluded,
            edges,
        })
    }

    /// Register the entry script under its file stem
    fn add_entry_point(&mut self) -> String {
        let entry = &self.manifest.entry;
        let name = entry
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "__main__".to_owned());
        let path = entry.canonicalize().unwrap_or_else(|_| entry.clone());

        let (id, _) = self.graph.add_module(ModuleRef::new(
            name.clone(),
            ModuleOrigin::File(path),
            ModuleKind::PureSource,
            false,
            DiscoveryReason::EntryPoint,
        ));
        self.graph.add_root(id);
        self.enqueue(id);
        name
    }

    /// Modules loaded before user code: the interpreter's own startup set
    /// and everything the bootstrap imports
    fn add_startup_modules(&mut self) -> BuildResult<()> {
        for name in INTERPRETER_STARTUP_MODULES {
            self.import_module(Importer::Startup, name, true, DiscoveryReason::InterpreterStartup)?;
        }
        let imports = parse_imports(BOOTSTRAP_SOURCE).map_err(|(line, message)| {
            BuildError::UnparseableSource {
                module: "bootstrap".to_owned(),
                path: PathBuf::from(crate::launcher::BOOTSTRAP_FILE),
                line,
                message,
            }
        })?;
        self.process_imports(Importer::Startup, &imports)
    }

    fn add_hidden_imports(&mut self) -> BuildResult<()> {
        let manifest = self.manifest;
        for name in &manifest.hidden_imports {
            if let Some(rule) = self.exclusions.check(name) {
                self.diagnostics.warn(
                    Stage::Analyzer,
                    BuildWarning::HiddenImportOverridesExclusion {
                        module: name.clone(),
                        pattern: rule.pattern().to_owned(),
                    },
                );
            }
            let resolved =
                self.resolver
                    .resolve(name)
                    .ok_or_else(|| BuildError::MissingHiddenImport {
                        module: name.clone(),
                        declared_by: None,
                    })?;
            let id = self.insert(name, resolved, DiscoveryReason::ManifestHidden);
            self.graph.add_root(id);
            self.enqueue(id);
        }
        Ok(())
    }

    /// Imports performed by runtime hooks are roots
    fn add_hook_imports(&mut self) -> BuildResult<()> {
        let manifest = self.manifest;
        for hook in &manifest.runtime_hooks {
            let source = fs::read_to_string(&hook.source).map_err(|err| {
                BuildError::HookConfiguration {
                    index: hook.index,
                    hook: hook.name.clone(),
                    reason: format!("cannot read {}: {err}", hook.source.display()),
                }
            })?;
            let imports = parse_imports(&source).map_err(|(line, message)| {
                BuildError::HookConfiguration {
                    index: hook.index,
                    hook: hook.name.clone(),
                    reason: format!("syntax error at line {line}: {message}"),
                }
            })?;
            self.process_imports(Importer::Hook(hook), &imports)?;
        }
        Ok(())
    }

    fn expand(&mut self, id: ModuleId) -> BuildResult<()> {
        let module = self.graph.module(id).clone();
        trace!("Expanding '{}'", module.name);
        if matches!(module.origin, ModuleOrigin::BuiltIn | ModuleOrigin::Unlocated) {
            return Ok(());
        }
        let importer = Importer::Module {
            id,
            name: &module.name,
            is_package: module.is_package,
        };

        if let Some(parent) = parent_module_name(&module.name) {
            let reason = if module.kind == ModuleKind::NativeExtension {
                DiscoveryReason::TransitiveNativeDependency
            } else {
                DiscoveryReason::StaticImport
            };
            self.import_module(importer, parent, false, reason)?;
        }

        if module.kind == ModuleKind::PureSource
            && let ModuleOrigin::File(path) = &module.origin
        {
            let imports = read_module_imports(&module.name, path)?;
            if imports.opaque_dynamic_calls > 0 {
                self.graph.module_mut(id).statically_opaque = Some(OpaqueReason::DynamicImport {
                    call_count: imports.opaque_dynamic_calls,
                });
            }
            self.process_imports(importer, &imports)?;
        }

        let manifest = self.manifest;
        if let Some(targets) = manifest.hints.get(&module.name) {
            for target in targets {
                self.add_hint(importer, target)?;
            }
        }
        Ok(())
    }

    /// A manifest hint: the target must exist unless a rule cuts it
    fn add_hint(&mut self, importer: Importer<'_>, target: &str) -> BuildResult<()> {
        let rule = self.exclusion_for(importer, target);
        let Some(resolved) = self.resolver.resolve(target) else {
            if rule.is_some() {
                debug!("Hint target '{target}' is excluded and absent");
                self.matched.insert(target.to_owned());
                return Ok(());
            }
            return Err(BuildError::MissingHiddenImport {
                module: target.to_owned(),
                declared_by: importer.module_name().map(str::to_owned),
            });
        };
        self.link(importer, target, resolved, rule.as_ref(), DiscoveryReason::ManifestHidden);
        Ok(())
    }

    fn process_imports(
        &mut self,
        importer: Importer<'_>,
        imports: &ModuleImports,
    ) -> BuildResult<()> {
        let reason = match importer {
            Importer::Startup => DiscoveryReason::InterpreterStartup,
            Importer::Module { .. } | Importer::Hook(_) => DiscoveryReason::StaticImport,
        };
        for import in &imports.imports {
            let Some(target) = self.absolute_target(importer, import)? else {
                continue;
            };

            let resolved = self.import_module(importer, &target, import.is_optional, reason)?;

            // `from a import b` may name the submodule `a.b`
            if let ImportKind::FromImport { names } = &import.kind
                && resolved.is_some_and(|r| r.is_package)
            {
                for name in names.iter().filter(|name| name.as_str() != "*") {
                    self.import_submodule(importer, &format!("{target}.{name}"), reason);
                }
            }
        }
        Ok(())
    }

    /// Absolute module name an import refers to
    fn absolute_target(
        &self,
        importer: Importer<'_>,
        import: &DiscoveredImport,
    ) -> BuildResult<Option<String>> {
        if import.level == 0 {
            return Ok(import.module_name.clone());
        }

        let relative = match importer {
            Importer::Module {
                name, is_package, ..
            } => resolve_relative_name(name, is_package, import.level, import.module_name.as_deref()),
            Importer::Hook(_) | Importer::Startup => None,
        };
        match relative {
            Some(target) => Ok(Some(target)),
            None => {
                let dots = ".".repeat(import.level as usize);
                let written = format!("{dots}{}", import.module_name.as_deref().unwrap_or(""));
                if import.is_optional {
                    debug!(
                        "Optional relative import '{written}' in {} has no package",
                        importer.describe()
                    );
                    Ok(None)
                } else {
                    Err(BuildError::UnresolvableImport {
                        module: written,
                        importer: importer.describe(),
                    })
                }
            }
        }
    }

    /// Resolve and record one import; returns the resolution when it exists
    fn import_module(
        &mut self,
        importer: Importer<'_>,
        name: &str,
        optional: bool,
        reason: DiscoveryReason,
    ) -> BuildResult<Option<ResolvedModule>> {
        let rule = self.exclusion_for(importer, name);

        let Some(resolved) = self.resolver.resolve(name) else {
            if rule.is_some() {
                self.matched.insert(name.to_owned());
                return Ok(None);
            }
            // `import os.path`: the parent module binds the name itself
            if let Some(parent) = parent_module_name(name)
                && self
                    .resolver
                    .resolve(parent)
                    .is_some_and(|resolved| !resolved.is_package)
            {
                trace!("'{name}' is an attribute of module '{parent}'");
                return self.import_module(importer, parent, optional, reason);
            }
            self.missing_import(importer, name, optional)?;
            return Ok(None);
        };

        self.link(importer, name, resolved.clone(), rule.as_ref(), reason);
        Ok(Some(resolved))
    }

    /// Record `name` and the edge reaching it; only live edges expand it
    fn link(
        &mut self,
        importer: Importer<'_>,
        name: &str,
        resolved: ResolvedModule,
        rule: Option<&ExclusionRule>,
        reason: DiscoveryReason,
    ) {
        let id = self.insert(name, resolved, reason);
        let edge = match rule {
            Some(rule) => {
                self.matched.insert(name.to_owned());
                if rule.cuts_import_from(importer.module_name()) {
                    debug!("Import of '{name}' by {} cut by '{rule}'", importer.describe());
                    Edge::Severed
                } else {
                    Edge::Import
                }
            }
            None => Edge::Import,
        };

        match importer {
            Importer::Module { id: from, .. } => self.graph.add_dependency(from, id, edge),
            Importer::Hook(_) | Importer::Startup => {
                if edge == Edge::Import {
                    self.graph.add_root(id);
                }
            }
        }
        if edge == Edge::Import {
            self.enqueue(id);
        }
    }

    fn missing_import(
        &mut self,
        importer: Importer<'_>,
        name: &str,
        optional: bool,
    ) -> BuildResult<()> {
        if let Importer::Module { id, .. } = importer
            && self.in_stdlib(&self.graph.module(id).origin)
        {
            debug!("Standard library import '{name}' in {} not found", importer.describe());
            return Ok(());
        }
        if optional || matches!(importer, Importer::Startup) {
            self.diagnostics.warn(
                Stage::Analyzer,
                BuildWarning::OptionalImportMissing {
                    module: name.to_owned(),
                    importer: importer.describe(),
                },
            );
            return Ok(());
        }
        Err(BuildError::UnresolvableImport {
            module: name.to_owned(),
            importer: importer.describe(),
        })
    }

    /// Try `a.b` for `from a import b`; an attribute of `a` is not an error
    fn import_submodule(&mut self, importer: Importer<'_>, name: &str, reason: DiscoveryReason) {
        if self.graph.id_of(name).is_none() && self.resolver.resolve(name).is_none() {
            trace!("'{name}' is not a submodule");
            return;
        }
        if let Err(err) = self.import_module(importer, name, true, reason) {
            debug!("Ignoring submodule candidate '{name}': {err}");
        }
    }

    /// The rule matching an import of `name`, unless the import is exempt
    fn exclusion_for(&mut self, importer: Importer<'_>, name: &str) -> Option<ExclusionRule> {
        if matches!(importer, Importer::Startup) || self.exempt.contains(name) {
            return None;
        }
        self.exclusions.check(name)
    }

    fn in_stdlib(&self, origin: &ModuleOrigin) -> bool {
        match origin {
            ModuleOrigin::Unlocated => true,
            _ => origin
                .path()
                .zip(self.resolver.stdlib())
                .is_some_and(|(path, stdlib)| stdlib.contains(path)),
        }
    }

    fn insert(&mut self, name: &str, resolved: ResolvedModule, reason: DiscoveryReason) -> ModuleId {
        let (id, _) = self.graph.add_module(ModuleRef::new(
            name,
            resolved.origin,
            resolved.kind,
            resolved.is_package,
            reason,
        ));
        id
    }

    fn enqueue(&mut self, id: ModuleId) {
        if self.queued.insert(id) {
            self.queue.push_back(id);
        }
    }
}

fn read_module_imports(module: &str, path: &Path) -> BuildResult<ModuleImports> {
    let source = fs::read_to_string(path).map_err(|source| BuildError::SourceRead {
        module: module.to_owned(),
        path: path.to_path_buf(),
        source,
    })?;
    parse_imports(&source).map_err(|(line, message)| BuildError::UnparseableSource {
        module: module.to_owned(),
        path: path.to_path_buf(),
        line,
        message,
    })
}

/// Parse Python source and collect its imports; errors carry (line, message)
pub(crate) fn parse_imports(source: &str) -> Result<ModuleImports, (usize, String)> {
    match parse_module(source) {
        Ok(parsed) => Ok(discover_imports(parsed.syntax())),
        Err(err) => Err((
            line_number(source, err.location.start()),
            err.error.to_string(),
        )),
    }
}

fn line_number(source: &str, offset: TextSize) -> usize {
    let offset = usize::from(offset).min(source.len());
    source.as_bytes()[..offset]
        .iter()
        .filter(|byte| **byte == b'\n')
        .count()
        + 1
}
