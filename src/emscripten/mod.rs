//! Emscripten-specific custom sections and the two file rewrites built on
//! top of them.

pub mod dylink;
pub mod fs;
pub mod metadata;

use std::path::Path;

use anyhow::{Context, Result};

use crate::binary::{
    section::SectionKind,
    types::{Export, Import},
    varint::encode_unsigned,
    ModuleReader,
};

pub use dylink::{
    parse_dylink_section, rewrite_dylink_section, update_dylink_section, DylinkSection,
};
pub use metadata::{add_emscripten_metadata, insert_emscripten_metadata, EmscriptenMetadata};

/// Encodes a complete custom section: id, size, length-prefixed name, payload.
pub fn encode_custom_section(name: &str, payload: &[u8]) -> Vec<u8> {
    let mut contents = encode_unsigned(name.len() as u64);
    contents.extend_from_slice(name.as_bytes());
    contents.extend_from_slice(payload);

    let mut section = vec![SectionKind::Custom as u8];
    section.extend(encode_unsigned(contents.len() as u64));
    section.extend(contents);
    section
}

pub fn get_exports(path: impl AsRef<Path>) -> Result<Vec<Export>> {
    let path = path.as_ref();
    let wasm = fs::read_module(path)?;
    let exports = ModuleReader::new(&wasm)
        .and_then(|module| module.exports())
        .with_context(|| format!("failed to read exports of {}", path.display()))?;
    Ok(exports)
}

pub fn get_imports(path: impl AsRef<Path>) -> Result<Vec<Import>> {
    let path = path.as_ref();
    let wasm = fs::read_module(path)?;
    let imports = ModuleReader::new(&wasm)
        .and_then(|module| module.imports())
        .with_context(|| format!("failed to read imports of {}", path.display()))?;
    Ok(imports)
}

#[cfg(test)]
mod custom_section_tests {
    use super::{encode_custom_section, get_exports, get_imports};
    use crate::binary::{
        types::{ExternKind, ImportDesc},
        Error,
    };
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn encode_named_section() {
        assert_eq!(
            vec![0x00, 0x05, 0x03, b'a', b'b', b'c', 0x2A],
            encode_custom_section("abc", &[0x2A])
        );
    }

    #[test]
    fn encode_large_section_size() {
        let payload = vec![0u8; 200];
        let section = encode_custom_section("x", &payload);

        // 2 name bytes + 200 payload bytes == 202 == [0xCA, 0x01]
        assert_eq!(&[0x00, 0xCA, 0x01, 0x01, b'x'], &section[..5]);
        assert_eq!(205, section.len());
    }

    #[test]
    fn read_exports_and_imports_from_file() -> Result<()> {
        let wasm = wat::parse_str(
            r#"(module (import "env" "puts" (func (param i32))) (func (export "main")))"#,
        )?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("main.wasm");
        std::fs::write(&path, &wasm)?;

        let exports = get_exports(&path)?;
        assert_eq!(1, exports.len());
        assert_eq!(
            ("main", ExternKind::Func, 1),
            (exports[0].name.as_str(), exports[0].kind, exports[0].index)
        );

        let imports = get_imports(&path)?;
        assert_eq!(1, imports.len());
        assert_eq!(ImportDesc::Func(0), imports[0].desc);
        Ok(())
    }

    #[test]
    fn reading_a_non_module_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("not.wasm");
        std::fs::write(&path, b"#!/bin/sh\n")?;

        let err = get_exports(&path).unwrap_err();
        assert_eq!(Some(&Error::BadMagic), err.downcast_ref::<Error>());
        Ok(())
    }
}
