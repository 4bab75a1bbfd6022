//! Expanding `[[datas]]` entries into individual files

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use globset::Glob;
use log::{debug, warn};
use walkdir::WalkDir;

use super::fsops::same_contents;
use crate::{
    error::{BuildError, BuildResult, Stage},
    manifest::{DataSpec, Manifest, is_glob},
};

/// One static file destined for the data tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub source: PathBuf,
    /// Path relative to the bundle's data tree
    pub dest: PathBuf,
}

/// Expand every data request of `manifest`, sorted by destination
///
/// Two sources landing on the same destination are fine when their bytes are
/// identical (the later one is skipped) and fatal otherwise.
pub fn collect_data(manifest: &Manifest) -> BuildResult<Vec<DataFile>> {
    let mut placed: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

    for spec in &manifest.datas {
        for file in expand(spec, manifest)? {
            match placed.get(&file.dest) {
                None => {
                    placed.insert(file.dest, file.source);
                }
                Some(existing) if existing == &file.source => {}
                Some(existing) => {
                    let identical = same_contents(existing, &file.source)
                        .map_err(|err| BuildError::write("comparing", &file.source, err))?;
                    if !identical {
                        return Err(BuildError::DestinationCollision {
                            stage: Stage::Assembler,
                            dest: file.dest,
                            existing: existing.clone(),
                            incoming: file.source,
                        });
                    }
                    debug!(
                        "Skipping {}: identical to {} at {}",
                        file.source.display(),
                        existing.display(),
                        file.dest.display()
                    );
                }
            }
        }
    }

    Ok(placed
        .into_iter()
        .map(|(dest, source)| DataFile { source, dest })
        .collect())
}

fn expand(spec: &DataSpec, manifest: &Manifest) -> BuildResult<Vec<DataFile>> {
    if is_glob(&spec.source) {
        return expand_glob(spec);
    }

    let source = PathBuf::from(&spec.source);
    if source.is_file() {
        let name = source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_default();
        return Ok(vec![DataFile {
            dest: spec.dest_dir.join(name),
            source,
        }]);
    }
    if source.is_dir() {
        return walk_files(&source, &source, spec, |_| true);
    }
    Err(BuildError::invalid_manifest(
        &manifest.path,
        format!("data source {} does not exist", source.display()),
    ))
}

fn expand_glob(spec: &DataSpec) -> BuildResult<Vec<DataFile>> {
    let matcher = Glob::new(&spec.source)
        .map_err(|source| BuildError::InvalidDataPattern {
            pattern: spec.source.clone(),
            source,
        })?
        .compile_matcher();

    let base = literal_prefix(&spec.source);
    if !base.is_dir() {
        warn!("Data pattern '{}' matched nothing", spec.source);
        return Ok(Vec::new());
    }
    let files = walk_files(&base, &base, spec, |path| matcher.is_match(path))?;
    if files.is_empty() {
        warn!("Data pattern '{}' matched nothing", spec.source);
    }
    Ok(files)
}

/// Deepest directory of a pattern that contains no glob syntax
fn literal_prefix(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for component in Path::new(pattern).components() {
        if let Component::Normal(part) = component
            && is_glob(&part.to_string_lossy())
        {
            break;
        }
        base.push(component);
    }
    base
}

fn walk_files(
    root: &Path,
    relative_to: &Path,
    spec: &DataSpec,
    mut keep: impl FnMut(&Path) -> bool,
) -> BuildResult<Vec<DataFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            BuildError::write("scanning", path, err.into())
        })?;
        if !entry.file_type().is_file() || !keep(entry.path()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(relative_to) else {
            continue;
        };
        files.push(DataFile {
            dest: spec.dest_dir.join(relative),
            source: entry.path().to_path_buf(),
        });
    }
    Ok(files)
}
