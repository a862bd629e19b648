//! The `dylink` custom section of a wasm shared library.
//!
//! Layout of the payload after the section name:
//!
//! ```text
//! mem_size     varuint32
//! mem_align    varuint32
//! table_size   varuint32
//! table_align  varuint32
//! needed_count varuint32
//! needed       (varuint32 len, utf-8 bytes)*
//! ```
//!
//! The needed list is an emscripten extension, similar to ELF `DT_NEEDED`.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::binary::{
    self,
    module::{decode_name, decode_u32, decode_vec, DecodeResult},
    section::SectionKind,
    varint::encode_unsigned,
    Error, ModuleReader, HEADER_SIZE,
};

use super::{encode_custom_section, fs};

pub const DYLINK_SECTION_NAME: &str = "dylink";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DylinkSection {
    pub mem_size: u32,
    pub mem_align: u32,
    pub table_size: u32,
    pub table_align: u32,
    pub needed: Vec<String>,
    /// Offset in the original file right after the section.
    pub section_end: usize,
}

impl DylinkSection {
    /// Reads the dylink section, which must be the first section of the module.
    pub fn parse(module: &ModuleReader) -> binary::Result<Self> {
        let section = match module.sections().next() {
            Some(section) => section?,
            None => return Err(Error::MissingDylinkSection),
        };
        if section.kind != SectionKind::Custom {
            return Err(Error::MissingDylinkSection);
        }

        let name = module.parse_section(section, decode_name)?;
        if name != DYLINK_SECTION_NAME {
            return Err(Error::UnexpectedCustomSection { name });
        }

        let dylink = module.parse_section(section, decode_dylink)?;
        Ok(Self { section_end: section.end(), ..dylink })
    }

    /// Section payload, without the section name.
    pub fn payload(&self) -> Vec<u8> {
        let mut payload = vec![];
        for field in [self.mem_size, self.mem_align, self.table_size, self.table_align] {
            payload.extend(encode_unsigned(field as u64));
        }

        payload.extend(encode_unsigned(self.needed.len() as u64));
        for name in &self.needed {
            payload.extend(encode_unsigned(name.len() as u64));
            payload.extend_from_slice(name.as_bytes());
        }
        payload
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_custom_section(DYLINK_SECTION_NAME, &self.payload())
    }
}

fn decode_dylink(input: &[u8]) -> DecodeResult<DylinkSection> {
    let (rest, _) = decode_name(input)?;
    let (rest, mem_size) = decode_u32(rest)?;
    let (rest, mem_align) = decode_u32(rest)?;
    let (rest, table_size) = decode_u32(rest)?;
    let (rest, table_align) = decode_u32(rest)?;
    let (rest, needed) = decode_vec(rest, decode_name)?;

    let dylink =
        DylinkSection { mem_size, mem_align, table_size, table_align, needed, section_end: 0 };
    Ok((rest, dylink))
}

pub fn parse_dylink_section(path: impl AsRef<Path>) -> Result<DylinkSection> {
    let path = path.as_ref();
    let wasm = fs::read_module(path)?;
    let dylink = ModuleReader::new(&wasm)
        .and_then(|module| DylinkSection::parse(&module))
        .with_context(|| format!("failed to parse dylink section of {}", path.display()))?;
    Ok(dylink)
}

/// Rebuilds `wasm` with `extra_dynlibs` appended to the dylink needed list.
///
/// Bytes after the original dylink section are copied unchanged. The table
/// alignment is always written as zero.
pub fn rewrite_dylink_section(
    wasm: &[u8],
    extra_dynlibs: &[impl AsRef<str>],
) -> binary::Result<Vec<u8>> {
    let module = ModuleReader::new(wasm)?;
    let original = DylinkSection::parse(&module)?;

    let mut needed = original.needed.clone();
    needed.extend(extra_dynlibs.iter().map(|name| name.as_ref().to_string()));

    let updated = DylinkSection { table_align: 0, needed, ..original };
    let section = updated.encode();
    debug!(needed = ?updated.needed, size = section.len(), "rewriting dylink section");

    let tail = &wasm[original.section_end..];
    let mut out = Vec::with_capacity(HEADER_SIZE + section.len() + tail.len());
    out.extend_from_slice(&wasm[..HEADER_SIZE]);
    out.extend(section);
    out.extend_from_slice(tail);
    Ok(out)
}

#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn update_dylink_section(
    path: impl AsRef<Path>,
    extra_dynlibs: &[impl AsRef<str>],
) -> Result<()> {
    let path = path.as_ref();
    let wasm = fs::read_module(path)?;
    let updated = rewrite_dylink_section(&wasm, extra_dynlibs)
        .with_context(|| format!("failed to update dylink section of {}", path.display()))?;

    fs::replace_file(path, &updated)
}
