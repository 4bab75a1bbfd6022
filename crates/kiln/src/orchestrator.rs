//! Runs the build pipeline
//!
//! Manifest -> analyzer -> native resolver -> assembler -> launcher. Each
//! stage consumes the previous stage's result; warnings from every stage
//! land in one [`Diagnostics`] sink and are returned with the outcome.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::{
    analyzer::{Analysis, analyze},
    assembler::{self, AssemblySummary, BundleContents, StagedBundle, collect_data},
    config::Config,
    error::{BuildError, BuildResult, Diagnostics, StageWarning},
    launcher::{self, LaunchConfig, LauncherKind},
    manifest::Manifest,
    native::{LibrarySearch, LinkInspector, ObjectInspector, resolve_binaries},
    resolver::SearchEnvironment,
    types::{BinaryRef, ModuleSet},
};

/// Default output directory, relative to the manifest
pub const DEFAULT_DIST_DIR: &str = "dist";

/// A finished bundle
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub bundle_dir: PathBuf,
    pub launcher: PathBuf,
    pub modules: ModuleSet,
    pub binaries: Vec<BinaryRef>,
    pub summary: AssemblySummary,
}

/// Every warning raised plus the first fatal error, if any
#[derive(Debug)]
pub struct BuildReport<T> {
    pub warnings: Vec<StageWarning>,
    pub outcome: BuildResult<T>,
}

impl<T> BuildReport<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Process exit code for this report
    pub fn exit_code(&self) -> i32 {
        self.outcome.as_ref().map_or_else(BuildError::exit_code, |_| 0)
    }
}

/// Build driver holding the host-specific pieces of a build
pub struct Pipeline<'a> {
    config: &'a Config,
    environment: SearchEnvironment,
    inspector: &'a dyn LinkInspector,
    launcher_kind: LauncherKind,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("environment", &self.environment)
            .field("launcher_kind", &self.launcher_kind)
            .finish_non_exhaustive()
    }
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self {
            config,
            environment: SearchEnvironment::from_process(),
            inspector: &ObjectInspector,
            launcher_kind: LauncherKind::host(),
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: SearchEnvironment) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_inspector(mut self, inspector: &'a dyn LinkInspector) -> Self {
        self.inspector = inspector;
        self
    }

    #[must_use]
    pub fn with_launcher_kind(mut self, kind: LauncherKind) -> Self {
        self.launcher_kind = kind;
        self
    }

    /// Analyze a manifest without producing output
    pub fn analyze(&self, manifest_path: &Path) -> BuildReport<Analysis> {
        let mut diagnostics = Diagnostics::new();
        let outcome = Manifest::load(manifest_path).and_then(|manifest| {
            analyze(&manifest, self.config, &self.environment, &mut diagnostics)
        });
        BuildReport {
            warnings: diagnostics.into_warnings(),
            outcome,
        }
    }

    /// Build the bundle described by `manifest_path` into `dist_dir`
    ///
    /// `dist_dir` defaults to `dist/` next to the manifest.
    pub fn build(&self, manifest_path: &Path, dist_dir: Option<&Path>) -> BuildReport<BuildOutput> {
        let mut diagnostics = Diagnostics::new();
        let outcome = self.with_pool(|| self.run_build(manifest_path, dist_dir, &mut diagnostics));
        BuildReport {
            warnings: diagnostics.into_warnings(),
            outcome,
        }
    }

    fn run_build(
        &self,
        manifest_path: &Path,
        dist_dir: Option<&Path>,
        diagnostics: &mut Diagnostics,
    ) -> BuildResult<BuildOutput> {
        let manifest = Manifest::load(manifest_path)?;
        info!("Building '{}' from {}", manifest.name, manifest.path.display());

        let analysis = analyze(&manifest, self.config, &self.environment, diagnostics)?;
        if analysis.stdlib.is_none() {
            return Err(BuildError::StdlibNotFound {
                python_version: format!("3.{}", self.config.python_minor),
            });
        }
        debug!(
            "Analyzer retained {} module(s), excluded {}",
            analysis.modules.len(),
            analysis.excluded.len()
        );

        let search = LibrarySearch::new(self.config, &analysis.search_roots);
        let binaries = resolve_binaries(
            &manifest,
            &analysis.modules,
            self.config,
            search,
            self.inspector,
            diagnostics,
        )?;

        let datas = collect_data(&manifest)?;

        let dist_dir = dist_dir.map_or_else(
            || manifest.base_dir.join(DEFAULT_DIST_DIR),
            Path::to_path_buf,
        );
        let launch = LaunchConfig::new(
            &manifest,
            &analysis.modules,
            &binaries,
            self.config.python_minor,
            self.launcher_kind,
        );
        let startup = analysis.startup_sources();

        let staged = StagedBundle::create(&dist_dir, &manifest.name)?;
        let summary = assembler::populate(
            &staged,
            BundleContents {
                modules: &analysis.modules,
                binaries: &binaries,
                datas: &datas,
                hooks: &manifest.runtime_hooks,
                stdlib_dir: &launch.stdlib_dir,
                startup: &startup,
            },
        )?;

        let artifacts = launcher::generate(&launch, self.launcher_kind)?;
        assembler::write_generated(&staged, &artifacts)?;
        launcher::verify(staged.root(), &launch)?;

        let bundle_dir = staged.commit()?;
        let launcher = bundle_dir.join(self.launcher_kind.file_name(&manifest.name));
        info!("Bundle ready at {}", bundle_dir.display());

        Ok(BuildOutput {
            bundle_dir,
            launcher,
            modules: analysis.modules,
            binaries,
            summary,
        })
    }

    /// Run `work` on a pool sized by `jobs`, or the global pool
    fn with_pool<T: Send>(&self, work: impl FnOnce() -> T + Send) -> T {
        let Some(jobs) = self.config.jobs else {
            return work();
        };
        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(work),
            Err(err) => {
                warn!("Cannot start {jobs} worker thread(s): {err}; using the default pool");
                work()
            }
        }
    }
}
