//! Reading link-time dependencies out of object files

use std::{fs, io, path::Path};

use goblin::{
    Object,
    mach::{Mach, MachO, SingleArch},
};
use thiserror::Error;

/// Object file format of an inspected binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Elf,
    Pe,
    MachO,
}

/// Dependencies recorded in an object file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub format: BinaryFormat,
    /// Names as recorded (`DT_NEEDED`, PE imports, Mach-O load commands)
    pub needed: Vec<String>,
    /// `RPATH`/`RUNPATH` or `LC_RPATH` entries, unexpanded
    pub rpaths: Vec<String>,
}

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Unrecognized(String),
}

/// Seam over object-file parsing
pub trait LinkInspector: Send + Sync {
    fn inspect(&self, path: &Path) -> Result<LinkInfo, InspectError>;
}

/// Parses ELF, PE and Mach-O files with goblin
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectInspector;

impl LinkInspector for ObjectInspector {
    fn inspect(&self, path: &Path) -> Result<LinkInfo, InspectError> {
        let bytes = fs::read(path).map_err(|source| InspectError::Io {
            path: path.display().to_string(),
            source,
        })?;
        parse_link_info(&bytes)
    }
}

/// Parse an in-memory object file
pub fn parse_link_info(bytes: &[u8]) -> Result<LinkInfo, InspectError> {
    let object =
        Object::parse(bytes).map_err(|err| InspectError::Unrecognized(err.to_string()))?;

    match object {
        Object::Elf(elf) => Ok(LinkInfo {
            format: BinaryFormat::Elf,
            needed: owned(&elf.libraries),
            rpaths: elf
                .rpaths
                .iter()
                .chain(&elf.runpaths)
                .flat_map(|entry| entry.split(':'))
                .filter(|entry| !entry.is_empty())
                .map(str::to_owned)
                .collect(),
        }),
        Object::PE(pe) => Ok(LinkInfo {
            format: BinaryFormat::Pe,
            needed: owned(&pe.libraries),
            rpaths: Vec::new(),
        }),
        Object::Mach(Mach::Binary(macho)) => Ok(macho_link_info(&macho)),
        Object::Mach(Mach::Fat(multi)) => match multi.get(0) {
            Ok(SingleArch::MachO(macho)) => Ok(macho_link_info(&macho)),
            Ok(_) => Err(InspectError::Unrecognized(
                "fat binary's first slice is not a Mach-O image".to_owned(),
            )),
            Err(err) => Err(InspectError::Unrecognized(err.to_string())),
        },
        _ => Err(InspectError::Unrecognized(
            "not an ELF, PE or Mach-O image".to_owned(),
        )),
    }
}

fn macho_link_info(macho: &MachO<'_>) -> LinkInfo {
    LinkInfo {
        format: BinaryFormat::MachO,
        // goblin reports the image itself as "self"
        needed: macho
            .libs
            .iter()
            .filter(|lib| **lib != "self")
            .map(|lib| (*lib).to_owned())
            .collect(),
        rpaths: owned(&macho.rpaths),
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    let mut seen = Vec::with_capacity(names.len());
    for name in names {
        if !seen.iter().any(|existing: &String| existing == name) {
            seen.push((*name).to_owned());
        }
    }
    seen
}
