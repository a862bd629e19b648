//! The `emscripten_metadata` custom section.
//!
//! Version 0.3 payload, every field an unsigned LEB128:
//! metadata major/minor, ABI major/minor, backend id, memory size in pages,
//! table size (0), global base, dynamic base (0), dynamictop pointer (0),
//! tempDouble pointer (0), standalone flag. New fields may only be appended,
//! together with a minor version bump.

use std::{num::TryFromIntError, path::Path};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::binary::{
    self,
    module::{decode_name, decode_u32, DecodeResult},
    varint::encode_unsigned,
    ModuleReader, HEADER_SIZE,
};

use super::{encode_custom_section, fs};

pub const METADATA_SECTION_NAME: &str = "emscripten_metadata";

pub const EMSCRIPTEN_METADATA_MAJOR: u32 = 0;
pub const EMSCRIPTEN_METADATA_MINOR: u32 = 3;

// Minimum runtime ABI required by the generated module (semver).
pub const EMSCRIPTEN_ABI_MAJOR: u32 = 0;
pub const EMSCRIPTEN_ABI_MINOR: u32 = 29;

pub const BACKEND_WASM: u32 = 1;

pub const WASM_PAGE_SIZE: u64 = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmscriptenMetadata {
    pub metadata_major: u32,
    pub metadata_minor: u32,
    pub abi_major: u32,
    pub abi_minor: u32,
    pub backend_id: u32,
    pub mem_size_pages: u32,
    pub global_base: u32,
    pub standalone_wasm: bool,
}

impl EmscriptenMetadata {
    pub fn new(mem_size_pages: u32, global_base: u32, standalone_wasm: bool) -> Self {
        Self {
            metadata_major: EMSCRIPTEN_METADATA_MAJOR,
            metadata_minor: EMSCRIPTEN_METADATA_MINOR,
            abi_major: EMSCRIPTEN_ABI_MAJOR,
            abi_minor: EMSCRIPTEN_ABI_MINOR,
            backend_id: BACKEND_WASM,
            mem_size_pages,
            global_base,
            standalone_wasm,
        }
    }

    /// `initial_memory` is in bytes; partial pages are dropped. Fails when the
    /// page count does not fit a `u32`.
    pub fn from_initial_memory(
        initial_memory: u64,
        global_base: u32,
        standalone_wasm: bool,
    ) -> Result<Self, TryFromIntError> {
        let mem_size_pages = u32::try_from(initial_memory / WASM_PAGE_SIZE)?;
        Ok(Self::new(mem_size_pages, global_base, standalone_wasm))
    }

    pub fn payload(&self) -> Vec<u8> {
        let fields = [
            self.metadata_major,
            self.metadata_minor,
            self.abi_major,
            self.abi_minor,
            self.backend_id,
            self.mem_size_pages,
            0, // table size
            self.global_base,
            0, // dynamic base
            0, // dynamictop pointer
            0, // tempDouble pointer
            self.standalone_wasm as u32,
        ];

        fields.iter().flat_map(|&field| encode_unsigned(field as u64)).collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        encode_custom_section(METADATA_SECTION_NAME, &self.payload())
    }

    /// Reads back the first `emscripten_metadata` section, if any.
    pub fn parse(module: &ModuleReader) -> binary::Result<Option<Self>> {
        let Some(section) = module.find_custom_section(METADATA_SECTION_NAME)? else {
            return Ok(None);
        };

        module.parse_section(section, decode_metadata).map(Some)
    }
}

fn decode_metadata(input: &[u8]) -> DecodeResult<EmscriptenMetadata> {
    let (mut rest, _) = decode_name(input)?;

    let mut fields = [0u32; 12];
    for field in fields.iter_mut() {
        (rest, *field) = decode_u32(rest)?;
    }
    let [metadata_major, metadata_minor, abi_major, abi_minor, backend_id, mem_size_pages, ..] =
        fields;

    let metadata = EmscriptenMetadata {
        metadata_major,
        metadata_minor,
        abi_major,
        abi_minor,
        backend_id,
        mem_size_pages,
        global_base: fields[7],
        standalone_wasm: fields[11] != 0,
    };
    Ok((rest, metadata))
}

/// Returns `wasm` with the metadata section placed right after the header.
pub fn insert_emscripten_metadata(
    wasm: &[u8],
    metadata: &EmscriptenMetadata,
) -> binary::Result<Vec<u8>> {
    ModuleReader::new(wasm)?;

    let section = metadata.encode();
    let mut out = Vec::with_capacity(wasm.len() + section.len());
    out.extend_from_slice(&wasm[..HEADER_SIZE]);
    out.extend(section);
    out.extend_from_slice(&wasm[HEADER_SIZE..]);
    Ok(out)
}

#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn add_emscripten_metadata(
    path: impl AsRef<Path>,
    metadata: &EmscriptenMetadata,
) -> Result<()> {
    let path = path.as_ref();
    debug!(
        mem_size_pages = metadata.mem_size_pages,
        global_base = metadata.global_base,
        "adding emscripten metadata section"
    );

    let wasm = fs::read_module(path)?;
    let updated = insert_emscripten_metadata(&wasm, metadata)
        .with_context(|| format!("failed to add metadata to {}", path.display()))?;

    fs::replace_file(path, &updated)
}

#[cfg(test)]
mod metadata_tests {
    use super::{add_emscripten_metadata, insert_emscripten_metadata, EmscriptenMetadata};
    use crate::binary::{section::SectionKind, Error, ModuleReader, HEADER_SIZE};
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn payload_layout() {
        let metadata = EmscriptenMetadata::new(256, 1024, false);
        assert_eq!(
            vec![0, 3, 0, 29, 1, 0x80, 0x02, 0, 0x80, 0x08, 0, 0, 0, 0],
            metadata.payload()
        );

        let standalone = EmscriptenMetadata::new(1, 8, true);
        assert_eq!(Some(&1), standalone.payload().last());
    }

    #[test]
    fn pages_from_initial_memory() -> Result<()> {
        let metadata = EmscriptenMetadata::from_initial_memory(16 * 1024 * 1024, 1024, false)?;
        assert_eq!(256, metadata.mem_size_pages);

        let partial = EmscriptenMetadata::from_initial_memory(65536 + 100, 0, false)?;
        assert_eq!(1, partial.mem_size_pages);
        Ok(())
    }

    #[test]
    fn full_32bit_address_space() -> Result<()> {
        let four_gib = 4 * 1024 * 1024 * 1024;
        let metadata = EmscriptenMetadata::from_initial_memory(four_gib, 1024, false)?;
        assert_eq!(65536, metadata.mem_size_pages);
        assert_eq!(
            vec![0x80, 0x80, 0x04],
            crate::binary::varint::encode_unsigned(metadata.mem_size_pages as u64)
        );

        assert!(EmscriptenMetadata::from_initial_memory(u64::MAX, 1024, false).is_err());
        Ok(())
    }

    #[test]
    fn truncated_metadata_is_rejected() -> Result<()> {
        let metadata = EmscriptenMetadata::new(256, 1024, false);
        let mut section = metadata.encode();
        // drop the standalone flag and shrink the section size to match
        section.pop();
        section[1] -= 1;

        let mut wasm = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        wasm.extend(&section);
        let module = ModuleReader::new(&wasm)?;

        assert_eq!(
            Err(Error::MalformedVarint { offset: wasm.len() }),
            EmscriptenMetadata::parse(&module)
        );
        Ok(())
    }

    #[test]
    fn insertion_is_a_splice_after_the_header() -> Result<()> {
        let wasm = wat::parse_str(
            r#"(module (memory 1) (func (export "main")) (data (i32.const 4) "x"))"#,
        )?;
        let metadata = EmscriptenMetadata::new(256, 1024, false);

        let out = insert_emscripten_metadata(&wasm, &metadata)?;
        let module = ModuleReader::new(&out)?;
        let first = module.sections().next().expect("metadata section")?;

        assert_eq!(&wasm[..HEADER_SIZE], &out[..HEADER_SIZE]);
        assert_eq!(SectionKind::Custom, first.kind);
        assert_eq!(metadata.encode(), out[HEADER_SIZE..first.end()].to_vec());
        assert_eq!(&wasm[HEADER_SIZE..], &out[first.end()..]);
        assert_eq!(Some(metadata), EmscriptenMetadata::parse(&module)?);
        assert_eq!(ModuleReader::new(&wasm)?.exports()?, module.exports()?);
        Ok(())
    }

    #[test]
    fn insertion_into_empty_module() -> Result<()> {
        let wasm = wat::parse_str("(module)")?;
        let metadata = EmscriptenMetadata::new(2, 0, true);

        let out = insert_emscripten_metadata(&wasm, &metadata)?;
        let module = ModuleReader::new(&out)?;

        assert_eq!(1, module.sections().count());
        assert_eq!(vec!["emscripten_metadata".to_string()], module.custom_section_names()?);
        assert_eq!(Some(metadata), EmscriptenMetadata::parse(&module)?);
        Ok(())
    }

    #[test]
    fn module_without_metadata() -> Result<()> {
        let wasm = wat::parse_str("(module (func))")?;
        assert_eq!(None, EmscriptenMetadata::parse(&ModuleReader::new(&wasm)?)?);
        Ok(())
    }

    #[test]
    fn insertion_rejects_non_modules() {
        let metadata = EmscriptenMetadata::new(1, 0, false);
        assert_eq!(
            Err(Error::BadMagic),
            insert_emscripten_metadata(b"\x7fELF\x02\x01\x01\x00", &metadata)
        );
    }

    #[test]
    fn add_metadata_to_file() -> Result<()> {
        let original = wat::parse_str(r#"(module (func (export "main")))"#)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("main.wasm");
        std::fs::write(&path, &original)?;

        let metadata = EmscriptenMetadata::from_initial_memory(16 * 1024 * 1024, 1024, false)?;
        add_emscripten_metadata(&path, &metadata)?;

        let updated = std::fs::read(&path)?;
        let module = ModuleReader::new(&updated)?;
        assert_eq!(Some(metadata), EmscriptenMetadata::parse(&module)?);
        assert!(updated.ends_with(&original[HEADER_SIZE..]));
        Ok(())
    }
}
