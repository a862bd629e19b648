use nom::number::complete::le_u8;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::{
    error::{Error, Result},
    module::HEADER_SIZE,
    varint::decode_u32,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum SectionKind {
    Custom = 0x00,
    Type = 0x01,
    Import = 0x02,
    Function = 0x03,
    Table = 0x04,
    Memory = 0x05,
    Global = 0x06,
    Export = 0x07,
    Start = 0x08,
    Element = 0x09,
    Code = 0x0a,
    Data = 0x0b,
    DataCount = 0x0c,
    Event = 0x0d,
}

/// A top-level section. `offset` points at the first content byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    pub size: u32,
    pub offset: usize,
}

impl Section {
    /// Offset of the next section header, or the module length for the last one.
    pub fn end(&self) -> usize {
        self.offset + self.size as usize
    }
}

/// Forward-only walk over the section headers of a module buffer.
///
/// Stops for good after the first error.
#[derive(Debug, Clone)]
pub struct Sections<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Sections<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: HEADER_SIZE, failed: false }
    }

    fn decode_header(&self) -> Result<Section> {
        let start = self.offset;
        let input = &self.buf[start..];

        let (rest, id) = le_u8::<_, nom::error::Error<&[u8]>>(input)
            .map_err(|_| Error::UnexpectedEof { offset: start })?;
        let kind = SectionKind::from_u8(id).ok_or(Error::UnknownSectionKind { offset: start, id })?;

        let (rest, size) =
            decode_u32(rest).map_err(|_| Error::MalformedVarint { offset: start + 1 })?;
        let offset = self.buf.len() - rest.len();

        if offset + size as usize > self.buf.len() {
            return Err(Error::TruncatedSection { offset, size, len: self.buf.len() });
        }

        Ok(Section { kind, size, offset })
    }
}

impl Iterator for Sections<'_> {
    type Item = Result<Section>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        match self.decode_header() {
            Ok(section) => {
                self.offset = section.end();
                Some(Ok(section))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for Sections<'_> {}
