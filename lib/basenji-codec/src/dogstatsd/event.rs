use basenji_context::RawTags;
use basenji_event::eventd::{AlertType, Priority};
use nom::{
    bytes::complete::{tag, take},
    character::complete::u32 as parse_u32,
    combinator::all_consuming,
    error::{Error, ErrorKind},
    sequence::{delimited, preceded, separated_pair},
    IResult, Parser as _,
};

use super::{helpers::*, message::*};

/// A DogStatsD event packet.
#[derive(Debug, PartialEq)]
pub struct EventPacket<'a> {
    /// Title of the event.
    pub title: &'a str,

    /// Text of the event, with escaped newlines expanded.
    pub text: String,

    /// Unix timestamp, in seconds, from the `d:` field.
    pub timestamp: Option<u64>,

    /// Hostname, from the `h:` field.
    pub hostname: Option<&'a str>,

    /// Aggregation key, from the `k:` field.
    pub aggregation_key: Option<&'a str>,

    /// Priority, from the `p:` field.
    pub priority: Option<Priority>,

    /// Alert type, from the `t:` field.
    pub alert_type: Option<AlertType>,

    /// Source type name, from the `s:` field.
    pub source_type_name: Option<&'a str>,

    /// Tags, or `None` if the packet had no tag field.
    pub tags: Option<RawTags<'a>>,
}

pub fn parse_dogstatsd_event(input: &[u8]) -> IResult<&[u8], EventPacket<'_>> {
    // `_e{<title length>,<text length>}:` where both lengths are in bytes.
    let (remaining, (title_len, text_len)) = delimited(
        tag(EVENT_PREFIX),
        separated_pair(parse_u32, tag(","), parse_u32),
        tag("}:"),
    )
    .parse(input)?;

    let (remaining, (raw_title, raw_text)) =
        separated_pair(take(title_len), tag("|"), take(text_len)).parse(remaining)?;

    let (_, title) = utf8(raw_title)?;
    let (_, text) = utf8(raw_text)?;

    let mut packet = EventPacket {
        title,
        text: unescape_newlines(text),
        timestamp: None,
        hostname: None,
        aggregation_key: None,
        priority: None,
        alert_type: None,
        source_type_name: None,
        tags: None,
    };

    if remaining.is_empty() {
        return Ok((remaining, packet));
    }

    // Anything after the text has to be a run of `|`-prefixed extension fields.
    let (mut remaining, _) = tag("|").parse(remaining)?;
    while let Some((chunk, tail)) = split_at_delimiter(remaining, b'|') {
        remaining = tail;

        if chunk.starts_with(TAGS_PREFIX) {
            let (_, tags) = utf8(&chunk[TAGS_PREFIX.len()..])?;
            packet.tags = Some(RawTags::new(tags));
            continue;
        }

        if chunk.len() < 2 {
            continue;
        }

        match &chunk[..2] {
            TIMESTAMP_PREFIX => {
                let (_, timestamp) = all_consuming(preceded(tag(TIMESTAMP_PREFIX), unix_timestamp)).parse(chunk)?;
                packet.timestamp = Some(timestamp);
            }
            HOSTNAME_PREFIX => packet.hostname = Some(field_value(chunk)?),
            AGGREGATION_KEY_PREFIX => packet.aggregation_key = Some(field_value(chunk)?),
            PRIORITY_PREFIX => packet.priority = Priority::try_from_string(field_value(chunk)?),
            SOURCE_TYPE_PREFIX => packet.source_type_name = Some(field_value(chunk)?),
            ALERT_TYPE_PREFIX => packet.alert_type = AlertType::try_from_string(field_value(chunk)?),
            _ => {}
        }
    }

    Ok((remaining, packet))
}

/// Returns the value of a two-byte-prefixed extension field, such as `h:web-1`.
fn field_value(chunk: &[u8]) -> Result<&str, nom::Err<Error<&[u8]>>> {
    match utf8(&chunk[2..]) {
        Ok((_, value)) => Ok(value),
        Err(_) => Err(nom::Err::Error(Error::new(chunk, ErrorKind::Verify))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_payload(title: &str, text: &str, extensions: &str) -> String {
        format!("_e{{{},{}}}:{}|{}{}", title.len(), text.len(), title, text, extensions)
    }

    #[track_caller]
    fn parse(input: &str) -> EventPacket<'_> {
        let (remaining, packet) = parse_dogstatsd_event(input.as_bytes()).expect("should not fail to parse");
        assert!(remaining.is_empty());
        packet
    }

    #[test]
    fn basic_event() {
        let raw = event_payload("my event", "text", "");
        let packet = parse(&raw);
        assert_eq!(packet.title, "my event");
        assert_eq!(packet.text, "text");
        assert_eq!(packet.timestamp, None);
        assert_eq!(packet.priority, None);
        assert_eq!(packet.alert_type, None);
        assert_eq!(packet.tags, None);
    }

    #[test]
    fn title_and_text_may_contain_pipes() {
        let raw = event_payload("a|b", "c|d|#e", "|#real");
        let packet = parse(&raw);
        assert_eq!(packet.title, "a|b");
        assert_eq!(packet.text, "c|d|#e");
        assert_eq!(packet.tags.map(|t| t.as_str()), Some("real"));
    }

    #[test]
    fn only_text_is_unescaped() {
        let raw = event_payload("one\\ntwo", "three\\nfour", "");
        let packet = parse(&raw);
        assert_eq!(packet.title, "one\\ntwo");
        assert_eq!(packet.text, "three\nfour");
    }

    #[test]
    fn all_extensions() {
        let raw = event_payload(
            "deploy",
            "v2 rolled out",
            "|k:deploys|p:low|s:jenkins|h:build-1|t:success|d:1700000000|#team:core,env:prod",
        );
        let packet = parse(&raw);
        assert_eq!(packet.aggregation_key, Some("deploys"));
        assert_eq!(packet.priority, Some(Priority::Low));
        assert_eq!(packet.source_type_name, Some("jenkins"));
        assert_eq!(packet.hostname, Some("build-1"));
        assert_eq!(packet.alert_type, Some(AlertType::Success));
        assert_eq!(packet.timestamp, Some(1700000000));
        let tags: Vec<&str> = packet.tags.unwrap().into_iter().collect();
        assert_eq!(tags, vec!["team:core", "env:prod"]);
    }

    #[test]
    fn unknown_priority_and_alert_type() {
        let raw = event_payload("t", "x", "|p:urgent|t:meltdown");
        let packet = parse(&raw);
        assert_eq!(packet.priority, None);
        assert_eq!(packet.alert_type, None);
    }

    #[test]
    fn empty_title_and_text() {
        let packet = parse("_e{0,0}:|");
        assert_eq!(packet.title, "");
        assert_eq!(packet.text, "");
    }

    #[test]
    fn multibyte_lengths_are_bytes() {
        let raw = event_payload("café", "naïve", "");
        assert_eq!(parse(&raw).title, "café");

        // A length that cuts a multi-byte character in half is rejected.
        assert!(parse_dogstatsd_event("_e{4,1}:café|x".as_bytes()).is_err());
    }

    #[test]
    fn malformed_events() {
        let cases = [
            "_e{5,4}:hello",
            "_e{10,4}:hello|text",
            "_e{a,4}:hello|text",
            "_e{5,4}hello|text",
            "_e{5,4}:helloXtext",
            "_e{5,4}:hello|text|d:soon",
            "_e{5,4}:hello|textextra",
        ];
        for raw in cases {
            assert!(parse_dogstatsd_event(raw.as_bytes()).is_err(), "expected '{}' to fail", raw);
        }
    }
}
