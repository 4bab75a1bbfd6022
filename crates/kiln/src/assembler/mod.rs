//! Bundle assembly
//!
//! Materializes the resolved build into `<dist>/<name>/`:
//!
//! ```text
//! <name>                  launcher script
//! _internal/modules.kar   module archive
//! _internal/lib/python3.X the interpreter's startup modules (`Lib` on Windows)
//! _internal/bin/          native binaries
//! _internal/data/         static data
//! _internal/hooks/        runtime hooks, NN_<stem>.py
//! _internal/bootstrap.py
//! _internal/launch.toml
//! ```
//!
//! Everything is written into a staging directory next to the destination
//! and swapped in by [`StagedBundle::commit`]. Any error before that leaves
//! the previous bundle as it was.

mod archive;
mod data;
mod fsops;

use std::{
    fs,
    path::{Path, PathBuf},
};

pub use archive::{ARCHIVE_MAGIC, Archive, ArchiveEntry, ArchiveError, ArchiveWriter};
pub use data::{DataFile, collect_data};
pub use fsops::{StagedBundle, copy_atomic, same_contents, set_executable, write_atomic};
use log::{debug, info};
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::{
    analyzer::StartupSource,
    error::{BuildError, BuildResult},
    manifest::HookSpec,
    types::{BinaryRef, ModuleKind, ModuleOrigin, ModuleSet},
};

pub const INTERNAL_DIR: &str = "_internal";
pub const ARCHIVE_FILE: &str = "modules.kar";
pub const BIN_DIR: &str = "bin";
pub const DATA_DIR: &str = "data";

/// A generated file to place in the bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    /// Path relative to the bundle root
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub executable: bool,
}

/// What went into a staged bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblySummary {
    pub archived_modules: usize,
    pub binaries: usize,
    pub data_files: usize,
    pub hooks: usize,
    pub startup_files: usize,
    /// Hex SHA-256 of the archive file
    pub archive_digest: String,
}

/// Inputs the assembler writes into a staged bundle
#[derive(Debug, Clone, Copy)]
pub struct BundleContents<'a> {
    pub modules: &'a ModuleSet,
    pub binaries: &'a [BinaryRef],
    pub datas: &'a [DataFile],
    pub hooks: &'a [HookSpec],
    /// Standard library directory, relative to the internal directory
    pub stdlib_dir: &'a str,
    pub startup: &'a [StartupSource],
}

/// Internal directory of a bundle rooted at `root`
pub fn internal_dir(root: &Path) -> PathBuf {
    root.join(INTERNAL_DIR)
}

/// Serialize every archivable module of `modules`
///
/// Source modules store their text, standard library ones included;
/// namespace packages get an empty payload. Built-in modules, unlocated
/// standard library modules and native extensions are not archived.
pub fn build_archive(modules: &ModuleSet) -> BuildResult<ArchiveWriter> {
    let mut writer = ArchiveWriter::new();
    for module in modules.iter() {
        let entry = match (&module.kind, &module.origin) {
            (_, ModuleOrigin::BuiltIn | ModuleOrigin::Unlocated)
            | (ModuleKind::NativeExtension, _) => continue,
            (ModuleKind::NamespacePackage, _) => ArchiveEntry {
                source: Vec::new(),
                is_package: true,
                is_namespace: true,
            },
            (ModuleKind::PureSource, origin) => {
                let Some(path) = origin.path() else {
                    continue;
                };
                let source = fs::read(path).map_err(|source| BuildError::SourceRead {
                    module: module.name.clone(),
                    path: path.to_path_buf(),
                    source,
                })?;
                ArchiveEntry {
                    source,
                    is_package: module.is_package,
                    is_namespace: false,
                }
            }
        };
        writer.add(module.name.clone(), entry);
    }
    Ok(writer)
}

/// Write modules, binaries, data, hooks and the startup modules into the
/// staged tree
pub fn populate(staged: &StagedBundle, contents: BundleContents<'_>) -> BuildResult<AssemblySummary> {
    let internal = internal_dir(staged.root());

    let archive = build_archive(contents.modules)?;
    let bytes = archive.to_bytes().map_err(|err| {
        BuildError::write(
            "encoding",
            internal.join(ARCHIVE_FILE),
            std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        )
    })?;
    write_atomic(&internal.join(ARCHIVE_FILE), &bytes)?;
    let archive_digest = format!("{:x}", Sha256::digest(&bytes));
    debug!(
        "Wrote {} module(s) to {ARCHIVE_FILE} ({} bytes)",
        archive.len(),
        bytes.len()
    );

    let bin_dir = internal.join(BIN_DIR);
    let data_dir = internal.join(DATA_DIR);
    let stdlib_dir = contents
        .stdlib_dir
        .split('/')
        .fold(internal.clone(), |path, part| path.join(part));
    // Marks the platform library directory for the interpreter's prefix search
    let dynload = stdlib_dir.join("lib-dynload");
    fs::create_dir_all(&dynload).map_err(|err| BuildError::write("creating", &dynload, err))?;
    let copies: Vec<(&Path, PathBuf)> = contents
        .binaries
        .iter()
        .map(|binary| (binary.source.as_path(), bin_dir.join(&binary.dest)))
        .chain(
            contents
                .datas
                .iter()
                .map(|file| (file.source.as_path(), data_dir.join(&file.dest))),
        )
        .chain(
            contents
                .hooks
                .iter()
                .map(|hook| (hook.source.as_path(), internal.join(&hook.dest))),
        )
        .chain(
            contents
                .startup
                .iter()
                .map(|file| (file.source.as_path(), stdlib_dir.join(&file.relative))),
        )
        .collect();

    copies
        .par_iter()
        .try_for_each(|(source, dest)| copy_atomic(source, dest))?;

    info!(
        "Assembled {} module(s), {} binary(ies), {} data file(s), {} hook(s), {} startup file(s)",
        archive.len(),
        contents.binaries.len(),
        contents.datas.len(),
        contents.hooks.len(),
        contents.startup.len()
    );

    Ok(AssemblySummary {
        archived_modules: archive.len(),
        binaries: contents.binaries.len(),
        data_files: contents.datas.len(),
        hooks: contents.hooks.len(),
        startup_files: contents.startup.len(),
        archive_digest,
    })
}

/// Place launcher artifacts into the staged tree
pub fn write_generated(staged: &StagedBundle, files: &[GeneratedFile]) -> BuildResult<()> {
    for file in files {
        let dest = staged.root().join(&file.path);
        write_atomic(&dest, &file.contents)?;
        if file.executable {
            set_executable(&dest)?;
        }
    }
    Ok(())
}

/// Read back the archive of a staged or committed bundle
pub fn read_archive(root: &Path) -> BuildResult<Archive> {
    let path = internal_dir(root).join(ARCHIVE_FILE);
    let bytes = fs::read(&path).map_err(|source| BuildError::ArchiveRead {
        path: path.clone(),
        source,
    })?;
    Archive::parse(&bytes).map_err(|err| BuildError::ArchiveRead {
        path,
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::types::{BinaryProvenance, DiscoveryReason, ModuleRef};

    fn module_set(root: &Path) -> Result<ModuleSet> {
        fs::create_dir_all(root.join("player/codecs"))?;
        fs::write(root.join("app.py"), "import player\n")?;
        fs::write(root.join("player/__init__.py"), "")?;
        fs::write(root.join("player/codecs/_fast.so"), b"\x7fELF")?;
        fs::create_dir_all(root.join("plugins"))?;

        Ok(ModuleSet::new(
            "app".to_owned(),
            [
                ModuleRef::new(
                    "app",
                    ModuleOrigin::File(root.join("app.py")),
                    ModuleKind::PureSource,
                    false,
                    DiscoveryReason::EntryPoint,
                ),
                ModuleRef::new(
                    "player",
                    ModuleOrigin::File(root.join("player/__init__.py")),
                    ModuleKind::PureSource,
                    true,
                    DiscoveryReason::StaticImport,
                ),
                ModuleRef::new(
                    "player.codecs._fast",
                    ModuleOrigin::File(root.join("player/codecs/_fast.so")),
                    ModuleKind::NativeExtension,
                    false,
                    DiscoveryReason::StaticImport,
                ),
                ModuleRef::new(
                    "plugins",
                    ModuleOrigin::Namespace(vec![root.join("plugins")]),
                    ModuleKind::NamespacePackage,
                    true,
                    DiscoveryReason::ManifestHidden,
                ),
                ModuleRef::new(
                    "sys",
                    ModuleOrigin::BuiltIn,
                    ModuleKind::PureSource,
                    false,
                    DiscoveryReason::StaticImport,
                ),
                ModuleRef::new(
                    "json",
                    ModuleOrigin::Unlocated,
                    ModuleKind::PureSource,
                    false,
                    DiscoveryReason::StaticImport,
                ),
            ],
        ))
    }

    #[test]
    fn test_archive_skips_builtins_unlocated_and_extensions() -> Result<()> {
        let temp = TempDir::new()?;
        let modules = module_set(temp.path())?;
        let archive = Archive::parse(&build_archive(&modules)?.to_bytes()?)?;

        let names: Vec<_> = archive.names().collect();
        assert_eq!(names, vec!["app", "player", "plugins"]);
        assert_eq!(
            archive.get("app").map(|entry| entry.source.clone()),
            Some(b"import player\n".to_vec())
        );
        assert!(archive.get("plugins").is_some_and(|entry| entry.is_namespace));
        Ok(())
    }

    #[test]
    fn test_populate_lays_out_internal_tree() -> Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("src");
        let dist = temp.path().join("dist");
        let modules = module_set(&src)?;

        let binaries = vec![BinaryRef {
            source: src.join("player/codecs/_fast.so"),
            dest: PathBuf::from("player/codecs/_fast.so"),
            depends_on: Vec::new(),
            provenance: BinaryProvenance::ExtensionModule("player.codecs._fast".to_owned()),
        }];
        fs::write(src.join("skin.css"), "body {}")?;
        let datas = vec![DataFile {
            source: src.join("skin.css"),
            dest: PathBuf::from("themes/skin.css"),
        }];
        fs::write(src.join("rthook_env.py"), "import os\n")?;
        let hooks = vec![HookSpec::new(0, src.join("rthook_env.py"))];
        fs::create_dir_all(src.join("stdlib/encodings"))?;
        fs::write(src.join("stdlib/encodings/__init__.py"), "import codecs\n")?;
        let startup = vec![StartupSource {
            source: src.join("stdlib/encodings/__init__.py"),
            relative: PathBuf::from("encodings/__init__.py"),
        }];

        let staged = StagedBundle::create(&dist, "app")?;
        let summary = populate(
            &staged,
            BundleContents {
                modules: &modules,
                binaries: &binaries,
                datas: &datas,
                hooks: &hooks,
                stdlib_dir: "lib/python3.12",
                startup: &startup,
            },
        )?;
        let internal = internal_dir(staged.root());

        assert_eq!(summary.archived_modules, 3);
        assert_eq!(summary.archive_digest.len(), 64);
        assert!(internal.join("bin/player/codecs/_fast.so").is_file());
        assert!(internal.join("data/themes/skin.css").is_file());
        assert!(internal.join("hooks/00_rthook_env.py").is_file());
        assert_eq!(summary.startup_files, 1);
        assert!(internal.join("lib/python3.12/encodings/__init__.py").is_file());
        assert!(internal.join("lib/python3.12/lib-dynload").is_dir());
        assert_eq!(read_archive(staged.root())?.len(), 3);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_files_keep_exec_bit() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new()?;
        let staged = StagedBundle::create(temp.path(), "app")?;
        write_generated(
            &staged,
            &[GeneratedFile {
                path: PathBuf::from("app"),
                contents: b"#!/bin/sh\n".to_vec(),
                executable: true,
            }],
        )?;
        let mode = fs::metadata(staged.root().join("app"))?.permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
        Ok(())
    }

    #[test]
    fn test_vanished_source_is_a_source_read_error() -> Result<()> {
        let temp = TempDir::new()?;
        let modules = module_set(temp.path())?;
        fs::remove_file(temp.path().join("player/__init__.py"))?;

        match build_archive(&modules) {
            Err(BuildError::SourceRead { module, path, .. }) => {
                assert_eq!(module, "player");
                assert_eq!(path, temp.path().join("player/__init__.py"));
            }
            other => panic!("expected SourceRead, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_missing_archive_is_an_archive_read_error() -> Result<()> {
        let temp = TempDir::new()?;
        let err = read_archive(temp.path())
            .err()
            .ok_or_else(|| anyhow::anyhow!("reading should fail"))?;
        assert!(matches!(err, BuildError::ArchiveRead { ref path, .. } if path.ends_with(ARCHIVE_FILE)));
        Ok(())
    }
}
