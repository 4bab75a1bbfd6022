//! Module archive (`.kar`)
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic      8 bytes  "KILNKAR\x01"
//! count      u32
//! index      count * (u32 name_len, u32 payload_len, u32 flags)
//! names      concatenated UTF-8 module names
//! payloads   concatenated module sources
//! digest     SHA-256 of everything above
//! ```
//!
//! Entries are sorted by module name and carry no timestamps, so the same
//! inputs always produce the same bytes.

use std::{
    collections::BTreeMap,
    io::{Cursor, Read},
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ARCHIVE_MAGIC: &[u8; 8] = b"KILNKAR\x01";

const FLAG_PACKAGE: u32 = 1;
const FLAG_NAMESPACE: u32 = 1 << 1;
const DIGEST_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a module archive (bad magic)")]
    BadMagic,

    #[error("archive is truncated")]
    Truncated,

    #[error("archive digest does not match its contents")]
    DigestMismatch,

    #[error("archive entry name is not valid UTF-8")]
    InvalidName,

    #[error("archive entry '{0}' is too large")]
    TooLarge(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub source: Vec<u8>,
    pub is_package: bool,
    pub is_namespace: bool,
}

impl ArchiveEntry {
    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.is_package {
            flags |= FLAG_PACKAGE;
        }
        if self.is_namespace {
            flags |= FLAG_NAMESPACE;
        }
        flags
    }
}

/// Collects modules and serializes them in name order
#[derive(Debug, Default)]
pub struct ArchiveWriter {
    entries: BTreeMap<String, ArchiveEntry>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, entry: ArchiveEntry) {
        self.entries.insert(name.into(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut buffer = Vec::new();
        self.write_body(&mut buffer)?;
        let digest = Sha256::digest(&buffer);
        buffer.extend_from_slice(&digest);
        Ok(buffer)
    }

    fn write_body(&self, buffer: &mut Vec<u8>) -> Result<(), ArchiveError> {
        let too_large = |name: &str| ArchiveError::TooLarge(name.to_owned());

        buffer.extend_from_slice(ARCHIVE_MAGIC);
        let count = u32::try_from(self.entries.len()).map_err(|_| too_large("<index>"))?;
        write_u32(buffer, count);

        for (name, entry) in &self.entries {
            let name_len = u32::try_from(name.len()).map_err(|_| too_large(name))?;
            let payload_len = u32::try_from(entry.source.len()).map_err(|_| too_large(name))?;
            write_u32(buffer, name_len);
            write_u32(buffer, payload_len);
            write_u32(buffer, entry.flags());
        }
        for name in self.entries.keys() {
            buffer.extend_from_slice(name.as_bytes());
        }
        for entry in self.entries.values() {
            buffer.extend_from_slice(&entry.source);
        }
        Ok(())
    }
}

fn write_u32(buffer: &mut Vec<u8>, value: u32) {
    // Writing into a Vec cannot fail
    let _ = buffer.write_u32::<LittleEndian>(value);
}

/// A parsed, digest-verified archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    entries: BTreeMap<String, ArchiveEntry>,
}

impl Archive {
    pub fn parse(bytes: &[u8]) -> Result<Self, ArchiveError> {
        if bytes.len() < ARCHIVE_MAGIC.len() + 4 + DIGEST_LEN {
            return Err(ArchiveError::Truncated);
        }
        let (body, digest) = bytes.split_at(bytes.len() - DIGEST_LEN);
        if !body.starts_with(ARCHIVE_MAGIC) {
            return Err(ArchiveError::BadMagic);
        }
        if Sha256::digest(body).as_slice() != digest {
            return Err(ArchiveError::DigestMismatch);
        }

        let mut cursor = Cursor::new(&body[ARCHIVE_MAGIC.len()..]);
        let count = read_u32(&mut cursor)?;
        let mut index = Vec::new();
        for _ in 0..count {
            let name_len = read_u32(&mut cursor)?;
            let payload_len = read_u32(&mut cursor)?;
            let flags = read_u32(&mut cursor)?;
            index.push((name_len, payload_len, flags));
        }

        let mut names = Vec::with_capacity(index.len());
        for (name_len, _, _) in &index {
            let bytes = read_exact(&mut cursor, *name_len)?;
            names.push(String::from_utf8(bytes).map_err(|_| ArchiveError::InvalidName)?);
        }

        let mut entries = BTreeMap::new();
        for (name, (_, payload_len, flags)) in names.into_iter().zip(index) {
            let source = read_exact(&mut cursor, payload_len)?;
            entries.insert(
                name,
                ArchiveEntry {
                    source,
                    is_package: flags & FLAG_PACKAGE != 0,
                    is_namespace: flags & FLAG_NAMESPACE != 0,
                },
            );
        }

        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, ArchiveError> {
    cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| ArchiveError::Truncated)
}

fn read_exact(cursor: &mut Cursor<&[u8]>, len: u32) -> Result<Vec<u8>, ArchiveError> {
    let len = len as usize;
    let remaining = (cursor.get_ref().len() as u64).saturating_sub(cursor.position());
    if len as u64 > remaining {
        return Err(ArchiveError::Truncated);
    }
    let mut buffer = vec![0; len];
    cursor
        .read_exact(&mut buffer)
        .map_err(|_| ArchiveError::Truncated)?;
    Ok(buffer)
}
