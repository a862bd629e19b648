use std::collections::HashSet;

use nom::{
    bytes::complete::{tag, take},
    error::{ErrorKind, ParseError},
    number::complete::le_u8,
    IResult,
};
use num_traits::FromPrimitive;
use tracing::{trace, warn};

use super::{
    error::{Error, Result},
    opcode::Opcode,
    section::{Section, SectionKind, Sections},
    types::{
        DataSegment, Export, ExternKind, Global, Import, ImportDesc, InitExpr, Limits, RefType,
        Table, ValueType, LIMITS_HAS_MAX, SEG_HAS_MEMINDEX, SEG_IS_PASSIVE,
    },
    varint,
};

pub const WASM_MAGIC: &[u8; 4] = b"\0asm";
pub const WASM_VERSION: &[u8; 4] = &[0x01, 0x00, 0x00, 0x00];
pub const HEADER_SIZE: usize = 8;

/// Read-only view over a module buffer.
///
/// Only the header is checked up front. Everything else is decoded on
/// demand and every call reparses from the buffer.
#[derive(Debug, Clone, Copy)]
pub struct ModuleReader<'a> {
    buf: &'a [u8],
}

impl<'a> ModuleReader<'a> {
    pub fn new(wasm: &'a [u8]) -> Result<Self> {
        let (rest, _) = decode_magic(wasm).map_err(|_| Error::BadMagic)?;
        decode_version(rest).map_err(|_| Error::BadVersion)?;

        Ok(Self { buf: wasm })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.buf
    }

    /// Fresh walk over the section table, starting right after the header.
    pub fn sections(&self) -> Sections<'a> {
        Sections::new(self.buf)
    }

    /// First section of `kind`. Later duplicates are reported and ignored.
    pub fn find_section(&self, kind: SectionKind) -> Result<Option<Section>> {
        let mut found = None;

        for section in self.sections() {
            let section = section?;
            if section.kind != kind {
                continue;
            }
            match found {
                None => found = Some(section),
                Some(first) if kind != SectionKind::Custom => {
                    warn!(
                        ?kind,
                        first = first.offset,
                        duplicate = section.offset,
                        "duplicate section, using the first one"
                    );
                }
                Some(_) => {}
            }
        }

        Ok(found)
    }

    /// First custom section whose name equals `name`.
    pub fn find_custom_section(&self, name: &str) -> Result<Option<Section>> {
        for section in self.sections() {
            let section = section?;
            if section.kind != SectionKind::Custom {
                continue;
            }
            if self.parse_section(section, decode_name)? == name {
                return Ok(Some(section));
            }
        }
        Ok(None)
    }

    /// Names of all custom sections in file order.
    pub fn custom_section_names(&self) -> Result<Vec<String>> {
        let mut names = vec![];
        for section in self.sections() {
            let section = section?;
            if section.kind == SectionKind::Custom {
                names.push(self.parse_section(section, decode_name)?);
            }
        }
        Ok(names)
    }

    /// Section ids seen more than once, in first-seen order.
    pub fn duplicate_sections(&self) -> Result<Vec<SectionKind>> {
        let mut seen = HashSet::new();
        let mut duplicates = vec![];

        for section in self.sections() {
            let kind = section?.kind;
            if kind != SectionKind::Custom && !seen.insert(kind) && !duplicates.contains(&kind) {
                duplicates.push(kind);
            }
        }

        Ok(duplicates)
    }

    /// Runs `parser` over the contents of `section`.
    ///
    /// This is the one place where decoder failures become typed errors with
    /// absolute offsets. Parsers never see bytes past the section end.
    pub(crate) fn parse_section<T>(
        &self,
        section: Section,
        parser: impl FnOnce(&'a [u8]) -> DecodeResult<'a, T>,
    ) -> Result<T> {
        let end = section.end();
        match parser(&self.buf[section.offset..end]) {
            Ok((_, value)) => Ok(value),
            Err(nom::Err::Error(err) | nom::Err::Failure(err)) => Err(err.into_error(end)),
            Err(nom::Err::Incomplete(_)) => Err(Error::UnexpectedEof { offset: end }),
        }
    }

    pub fn tables(&self) -> Result<Vec<Table>> {
        self.decode_section(SectionKind::Table, decode_table_section)
    }

    pub fn exports(&self) -> Result<Vec<Export>> {
        self.decode_section(SectionKind::Export, decode_export_section)
    }

    pub fn imports(&self) -> Result<Vec<Import>> {
        self.decode_section(SectionKind::Import, decode_import_section)
    }

    pub fn globals(&self) -> Result<Vec<Global>> {
        self.decode_section(SectionKind::Global, decode_global_section)
    }

    pub fn data_segments(&self) -> Result<Vec<DataSegment>> {
        self.decode_section(SectionKind::Data, decode_data_section)
    }

    fn decode_section<T>(
        &self,
        kind: SectionKind,
        decode: fn(&'a [u8]) -> DecodeResult<'a, Vec<T>>,
    ) -> Result<Vec<T>> {
        let Some(section) = self.find_section(kind)? else {
            return Ok(vec![]);
        };
        trace!(?kind, offset = section.offset, size = section.size, "decoding section");

        self.parse_section(section, decode)
    }
}

fn decode_magic(input: &[u8]) -> IResult<&[u8], &[u8]> {
    tag(&WASM_MAGIC[..])(input)
}

fn decode_version(input: &[u8]) -> IResult<&[u8], &[u8]> {
    tag(&WASM_VERSION[..])(input)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeErrorKind {
    Eof,
    Varint,
    Utf8,
    Opcode(u8),
    ExternKind(u8),
    ValueType(i64),
    Mutability(u8),
}

/// nom error carrying the input where decoding stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DecodeError<'a> {
    input: &'a [u8],
    kind: DecodeErrorKind,
}

pub(crate) type DecodeResult<'a, T> = IResult<&'a [u8], T, DecodeError<'a>>;

impl<'a> DecodeError<'a> {
    fn failure(input: &'a [u8], kind: DecodeErrorKind) -> nom::Err<Self> {
        nom::Err::Failure(Self { input, kind })
    }

    /// `end` is the absolute offset of the end of the decoded slice.
    fn into_error(self, end: usize) -> Error {
        let offset = end - self.input.len();
        match self.kind {
            DecodeErrorKind::Eof => Error::UnexpectedEof { offset },
            DecodeErrorKind::Varint => Error::MalformedVarint { offset },
            DecodeErrorKind::Utf8 => Error::InvalidUtf8 { offset },
            DecodeErrorKind::Opcode(opcode) => Error::UnexpectedOpcode { offset, opcode },
            DecodeErrorKind::ExternKind(kind) => Error::UnknownExternKind { offset, kind },
            DecodeErrorKind::ValueType(code) => Error::UnknownValueType { offset, code },
            DecodeErrorKind::Mutability(flag) => Error::InvalidMutability { offset, flag },
        }
    }
}

impl<'a> ParseError<&'a [u8]> for DecodeError<'a> {
    fn from_error_kind(input: &'a [u8], _kind: ErrorKind) -> Self {
        Self { input, kind: DecodeErrorKind::Eof }
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

pub(crate) fn decode_byte(input: &[u8]) -> DecodeResult<u8> {
    le_u8(input)
}

pub(crate) fn decode_u32(input: &[u8]) -> DecodeResult<u32> {
    varint::decode_u32(input).map_err(|_| DecodeError::failure(input, DecodeErrorKind::Varint))
}

pub(crate) fn decode_i64(input: &[u8]) -> DecodeResult<i64> {
    varint::decode_i64(input).map_err(|_| DecodeError::failure(input, DecodeErrorKind::Varint))
}

fn decode_raw(input: &[u8], len: usize) -> DecodeResult<&[u8]> {
    take(len)(input)
}

pub(crate) fn decode_name(input: &[u8]) -> DecodeResult<String> {
    let (rest, len) = decode_u32(input)?;
    let (remaining, bytes) = decode_raw(rest, len as usize)?;

    match std::str::from_utf8(bytes) {
        Ok(name) => Ok((remaining, name.to_string())),
        Err(_) => Err(DecodeError::failure(rest, DecodeErrorKind::Utf8)),
    }
}

/// Count-prefixed vector of `item`.
pub(crate) fn decode_vec<'a, T>(
    input: &'a [u8],
    item: fn(&'a [u8]) -> DecodeResult<'a, T>,
) -> DecodeResult<'a, Vec<T>> {
    let (mut remaining, count) = decode_u32(input)?;
    let mut items = vec![];

    for _ in 0..count {
        let (rest, value) = item(remaining)?;
        items.push(value);
        remaining = rest;
    }

    Ok((remaining, items))
}

fn decode_limits(input: &[u8]) -> DecodeResult<Limits> {
    let (rest, flags) = decode_byte(input)?;
    let (rest, initial) = decode_u32(rest)?;

    let (rest, maximum) = match flags & LIMITS_HAS_MAX {
        0 => (rest, None),
        _ => {
            let (rest, max) = decode_u32(rest)?;
            (rest, Some(max))
        }
    };

    Ok((rest, Limits { flags, initial, maximum }))
}

/// `i32.const`/`i64.const <value> end`. Any other opcode fails.
fn decode_init_expr(input: &[u8]) -> DecodeResult<InitExpr> {
    let (rest, byte) = decode_byte(input)?;
    let opcode = match Opcode::from_u8(byte) {
        Some(op @ (Opcode::I32Const | Opcode::I64Const)) => op,
        _ => return Err(DecodeError::failure(input, DecodeErrorKind::Opcode(byte))),
    };
    let (rest, value) = decode_i64(rest)?;

    let (remaining, end) = decode_byte(rest)?;
    if Opcode::from_u8(end) != Some(Opcode::End) {
        return Err(DecodeError::failure(rest, DecodeErrorKind::Opcode(end)));
    }

    Ok((remaining, InitExpr { opcode, value }))
}

fn decode_value_type(input: &[u8]) -> DecodeResult<ValueType> {
    let (rest, code) = decode_i64(input)?;
    match ValueType::from_code(code) {
        Some(value_type) => Ok((rest, value_type)),
        None => Err(DecodeError::failure(input, DecodeErrorKind::ValueType(code))),
    }
}

fn decode_ref_type(input: &[u8]) -> DecodeResult<RefType> {
    let (rest, code) = decode_i64(input)?;
    match RefType::from_code(code) {
        Some(ref_type) => Ok((rest, ref_type)),
        None => Err(DecodeError::failure(input, DecodeErrorKind::ValueType(code))),
    }
}

fn decode_extern_kind(input: &[u8]) -> DecodeResult<ExternKind> {
    let (rest, kind) = decode_byte(input)?;
    match ExternKind::from_u8(kind) {
        Some(kind) => Ok((rest, kind)),
        None => Err(DecodeError::failure(input, DecodeErrorKind::ExternKind(kind))),
    }
}

fn decode_mutability(input: &[u8]) -> DecodeResult<bool> {
    let (rest, flag) = decode_byte(input)?;
    match flag {
        0 => Ok((rest, false)),
        1 => Ok((rest, true)),
        _ => Err(DecodeError::failure(input, DecodeErrorKind::Mutability(flag))),
    }
}

fn decode_table(input: &[u8]) -> DecodeResult<Table> {
    let (rest, ref_type) = decode_ref_type(input)?;
    let (rest, limits) = decode_limits(rest)?;

    Ok((rest, Table { ref_type, limits }))
}

fn decode_table_section(input: &[u8]) -> DecodeResult<Vec<Table>> {
    decode_vec(input, decode_table)
}

fn decode_export(input: &[u8]) -> DecodeResult<Export> {
    let (rest, name) = decode_name(input)?;
    let (rest, kind) = decode_extern_kind(rest)?;
    let (rest, index) = decode_u32(rest)?;

    Ok((rest, Export { name, kind, index }))
}

fn decode_export_section(input: &[u8]) -> DecodeResult<Vec<Export>> {
    decode_vec(input, decode_export)
}

fn decode_import(input: &[u8]) -> DecodeResult<Import> {
    let (rest, module) = decode_name(input)?;
    let (rest, field) = decode_name(rest)?;
    let (rest, kind) = decode_extern_kind(rest)?;

    let (rest, desc) = match kind {
        ExternKind::Func => {
            let (rest, type_index) = decode_u32(rest)?;
            (rest, ImportDesc::Func(type_index))
        }
        ExternKind::Table => {
            let (rest, ref_type) = decode_ref_type(rest)?;
            let (rest, limits) = decode_limits(rest)?;
            (rest, ImportDesc::Table { ref_type, limits })
        }
        ExternKind::Memory => {
            let (rest, limits) = decode_limits(rest)?;
            (rest, ImportDesc::Memory(limits))
        }
        ExternKind::Global => {
            let (rest, value_type) = decode_value_type(rest)?;
            let (rest, mutable) = decode_mutability(rest)?;
            (rest, ImportDesc::Global { value_type, mutable })
        }
        ExternKind::Event => {
            let (rest, attribute) = decode_u32(rest)?;
            let (rest, type_index) = decode_u32(rest)?;
            (rest, ImportDesc::Event { attribute, type_index })
        }
    };

    Ok((rest, Import { module, field, desc }))
}

fn decode_import_section(input: &[u8]) -> DecodeResult<Vec<Import>> {
    decode_vec(input, decode_import)
}

fn decode_global(input: &[u8]) -> DecodeResult<Global> {
    let (rest, value_type) = decode_value_type(input)?;
    let (rest, mutable) = decode_mutability(rest)?;
    let (rest, init) = decode_init_expr(rest)?;

    Ok((rest, Global { value_type, mutable, init }))
}

fn decode_global_section(input: &[u8]) -> DecodeResult<Vec<Global>> {
    decode_vec(input, decode_global)
}

fn decode_data_segment(input: &[u8]) -> DecodeResult<DataSegment> {
    let (rest, flags) = decode_u32(input)?;

    let (rest, memory_index) = match flags & SEG_HAS_MEMINDEX {
        0 => (rest, 0),
        _ => decode_u32(rest)?,
    };
    let (rest, init) = match flags & SEG_IS_PASSIVE {
        0 => {
            let (rest, init) = decode_init_expr(rest)?;
            (rest, Some(init))
        }
        _ => (rest, None),
    };
    let (rest, len) = decode_u32(rest)?;
    let (rest, bytes) = decode_raw(rest, len as usize)?;

    Ok((rest, DataSegment { flags, memory_index, init, bytes: bytes.to_vec() }))
}

fn decode_data_section(input: &[u8]) -> DecodeResult<Vec<DataSegment>> {
    decode_vec(input, decode_data_segment)
}
