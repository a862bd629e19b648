//! LEB128 integers as used throughout the wasm binary format.
//!
//! Encoding goes through the `leb128` crate, which always emits the minimal
//! form. Decoding uses the `nom-leb128` parsers so the same functions can be
//! composed with the section decoders.

use nom::{error::ErrorKind, IResult};
use nom_leb128::{leb128_i64, leb128_u32, leb128_u64};

use super::error::{Error, Result};

pub fn encode_unsigned(value: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    leb128::write::unsigned(&mut buf, value).expect("writing to a Vec cannot fail");
    buf
}

pub fn encode_signed(value: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10);
    leb128::write::signed(&mut buf, value).expect("writing to a Vec cannot fail");
    buf
}

/// Decodes an unsigned integer from the front of `input`.
///
/// Returns the value and the number of bytes consumed. Fails with
/// `MalformedVarint` (offset relative to `input`) when the value does not fit
/// in 64 bits or the input ends before the final byte.
pub fn decode_unsigned(input: &[u8]) -> Result<(u64, usize)> {
    decode_with(input, decode_u64)
}

pub fn decode_signed(input: &[u8]) -> Result<(i64, usize)> {
    decode_with(input, decode_i64)
}

fn decode_with<T>(input: &[u8], parser: fn(&[u8]) -> IResult<&[u8], T>) -> Result<(T, usize)> {
    match parser(input) {
        Ok((rest, value)) => Ok((value, input.len() - rest.len())),
        Err(_) => Err(Error::MalformedVarint { offset: 0 }),
    }
}

pub(crate) fn decode_u32(input: &[u8]) -> IResult<&[u8], u32> {
    let (rest, value) = leb128_u32(input)?;
    reject_overflow(input, rest, 5, |last| last <= 0x0F)?;
    Ok((rest, value))
}

pub(crate) fn decode_u64(input: &[u8]) -> IResult<&[u8], u64> {
    let (rest, value) = leb128_u64(input)?;
    reject_overflow(input, rest, 10, |last| last <= 0x01)?;
    Ok((rest, value))
}

pub(crate) fn decode_i64(input: &[u8]) -> IResult<&[u8], i64> {
    let (rest, value) = leb128_i64(input)?;
    reject_overflow(input, rest, 10, |last| last == 0x00 || last == 0x7F)?;
    Ok((rest, value))
}

/// Fails when a maximum-length encoding carries bits beyond the target width.
fn reject_overflow<'a>(
    input: &'a [u8],
    rest: &'a [u8],
    max_len: usize,
    fits: fn(u8) -> bool,
) -> IResult<&'a [u8], ()> {
    let len = input.len() - rest.len();
    if len == max_len && !fits(input[len - 1]) {
        return Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::TooLarge)));
    }
    Ok((rest, ()))
}
