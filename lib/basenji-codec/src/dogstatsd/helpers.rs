use nom::{
    character::complete::u64 as parse_u64,
    error::{Error, ErrorKind},
    IResult,
};

#[inline]
pub fn split_at_delimiter(input: &[u8], delimiter: u8) -> Option<(&[u8], &[u8])> {
    match memchr::memchr(delimiter, input) {
        Some(index) => Some((&input[0..index], &input[index + 1..input.len()])),
        None => {
            if input.is_empty() {
                None
            } else {
                Some((input, &[]))
            }
        }
    }
}

#[inline]
pub fn utf8(input: &[u8]) -> IResult<&[u8], &str> {
    match simdutf8::basic::from_utf8(input) {
        Ok(s) => Ok((&[], s)),
        Err(_) => Err(nom::Err::Error(Error::new(input, ErrorKind::Verify))),
    }
}

#[inline]
pub fn unix_timestamp(input: &[u8]) -> IResult<&[u8], u64> {
    parse_u64(input)
}

/// Parses a Unix timestamp that may carry a fractional part, truncating it to whole seconds.
#[inline]
pub fn fractional_unix_timestamp(input: &[u8]) -> IResult<&[u8], u64> {
    let (remaining, raw) = utf8(input)?;
    match raw.parse::<f64>() {
        Ok(ts) if ts.is_finite() => Ok((remaining, ts.max(0.0) as u64)),
        _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Float))),
    }
}
