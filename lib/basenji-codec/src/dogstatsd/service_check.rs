use basenji_context::RawTags;
use basenji_event::service_check::CheckStatus;
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::u8 as parse_u8,
    combinator::all_consuming,
    error::{Error, ErrorKind},
    sequence::{preceded, separated_pair},
    IResult, Parser as _,
};

use super::{helpers::*, message::*};

/// A DogStatsD service check packet.
#[derive(Debug, PartialEq)]
pub struct ServiceCheckPacket<'a> {
    /// Name of the check.
    pub name: &'a str,

    /// Status of the check.
    pub status: CheckStatus,

    /// Unix timestamp, in seconds, from the `d:` field.
    pub timestamp: Option<u64>,

    /// Hostname, from the `h:` field.
    pub hostname: Option<&'a str>,

    /// Message, from the trailing `m:` field, unescaped.
    pub message: Option<String>,

    /// Tags, from the `#` field.
    pub tags: Vec<String>,
}

pub fn parse_dogstatsd_service_check(input: &[u8]) -> IResult<&[u8], ServiceCheckPacket<'_>> {
    let (remaining, (raw_name, raw_status)) = preceded(
        tag(SERVICE_CHECK_PREFIX),
        separated_pair(take_while1(|b| b != b'|'), tag("|"), parse_u8),
    )
    .parse(input)?;

    let (_, name) = utf8(raw_name)?;
    let status = CheckStatus::try_from(raw_status).map_err(|_| nom::Err::Error(Error::new(input, ErrorKind::Verify)))?;

    let mut packet = ServiceCheckPacket {
        name,
        status,
        timestamp: None,
        hostname: None,
        message: None,
        tags: Vec::new(),
    };

    if remaining.is_empty() {
        return Ok((remaining, packet));
    }

    let (metadata, _) = tag("|").parse(remaining)?;

    // The message runs to the end of the line, so it may contain `|` and `#` freely. Everything before it is made of
    // regular `|`-separated extension fields.
    let (metadata, raw_message) = if let Some(message) = metadata.strip_prefix(SERVICE_CHECK_MESSAGE_PREFIX) {
        (&metadata[..0], Some(message))
    } else {
        match memchr::memmem::find(metadata, SERVICE_CHECK_MESSAGE_DELIMITER) {
            Some(idx) => (
                &metadata[..idx],
                Some(&metadata[idx + SERVICE_CHECK_MESSAGE_DELIMITER.len()..]),
            ),
            None => (metadata, None),
        }
    };

    if let Some(raw_message) = raw_message {
        let (_, message) = utf8(raw_message)?;
        packet.message = Some(unescape_service_check(message));
    }

    let mut fields = metadata;
    while let Some((chunk, tail)) = split_at_delimiter(fields, b'|') {
        fields = tail;

        if chunk.starts_with(TAGS_PREFIX) {
            let (_, raw_tags) = utf8(&chunk[TAGS_PREFIX.len()..])?;
            let raw_tags = unescape_service_check(raw_tags);
            packet.tags = RawTags::new(&raw_tags).into_iter().map(String::from).collect();
            continue;
        }

        if chunk.len() < 2 {
            continue;
        }

        match &chunk[..2] {
            TIMESTAMP_PREFIX => {
                let (_, timestamp) =
                    all_consuming(preceded(tag(TIMESTAMP_PREFIX), fractional_unix_timestamp)).parse(chunk)?;
                packet.timestamp = Some(timestamp);
            }
            HOSTNAME_PREFIX => {
                let (_, hostname) = utf8(&chunk[HOSTNAME_PREFIX.len()..])?;
                packet.hostname = Some(hostname);
            }
            _ => {}
        }
    }

    Ok((&[], packet))
}
