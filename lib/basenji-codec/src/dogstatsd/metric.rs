use basenji_context::RawTags;
use nom::{
    bytes::complete::tag, combinator::all_consuming, number::complete::double, sequence::preceded, IResult,
    Parser as _,
};
use tracing::warn;

use super::{message::SAMPLE_RATE_PREFIX, NonNumericValue, ParseError, UnparseableMetric};

/// Wire type of sets, the only type that keeps its value as a string.
const SET_TYPE: &str = "s";

/// A DogStatsD metric packet.
///
/// A single packet can carry several value groups for the same metric name (`name:1|c:2|c|#tag`); each group has
/// its own type, sample rate, and tags.
#[derive(Debug, PartialEq)]
pub struct MetricPacket<'a> {
    /// Name of the metric.
    pub name: &'a str,

    /// Value groups, in the order they appeared.
    pub values: Vec<MetricValuePacket<'a>>,
}

/// One value group within a [`MetricPacket`].
#[derive(Debug, PartialEq)]
pub struct MetricValuePacket<'a> {
    /// The value.
    pub value: PacketValue<'a>,

    /// The raw wire type token, such as `c` or `ct-c`. Resolving it to a metric kind is left to the caller, since
    /// the set of accepted kinds differs by aggregator.
    pub metric_type: &'a str,

    /// Client-side sample rate, in `(0, 1]`.
    pub sample_rate: f64,

    /// Tags, or `None` if the group had no tag segment.
    pub tags: Option<RawTags<'a>>,
}

/// A metric value as it appeared on the wire.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PacketValue<'a> {
    /// A value that parsed as an integer.
    Integer(i64),

    /// Any other numeric value.
    Float(f64),

    /// A set member, kept as-is.
    String(&'a str),
}

/// Parses a metric packet.
///
/// Groups of type `d` or `dk` (distributions) are dropped. Malformed sample rate or tag segments are logged
/// and ignored, while a missing name, a group without a type, or a non-numeric value for a numeric type fails the
/// whole packet.
pub fn parse_dogstatsd_metric(input: &str) -> Result<MetricPacket<'_>, ParseError> {
    let (name, raw_groups) = match input.split_once(':') {
        Some((name, raw_groups)) if !name.is_empty() => (name, raw_groups),
        _ => return UnparseableMetric { packet: input }.fail(),
    };

    let mut values = Vec::new();
    for group in ValueGroups::new(raw_groups) {
        if let Some(value) = parse_value_group(input, name, group)? {
            values.push(value);
        }
    }

    Ok(MetricPacket { name, values })
}

fn parse_value_group<'a>(
    packet: &str, name: &str, group: &'a str,
) -> Result<Option<MetricValuePacket<'a>>, ParseError> {
    let mut parts = group.split('|');
    let raw_value = parts.next().unwrap_or_default();
    let Some(metric_type) = parts.next() else {
        return UnparseableMetric { packet }.fail();
    };

    if matches!(metric_type, "d" | "dk") {
        return Ok(None);
    }

    let value = if metric_type == SET_TYPE {
        PacketValue::String(raw_value)
    } else {
        parse_numeric_value(name, raw_value)?
    };

    let mut sample_rate = 1.0;
    let mut tags = None;
    for segment in parts {
        match segment.as_bytes().first() {
            Some(b'@') => match parse_sample_rate(segment.as_bytes()) {
                Ok((_, rate)) if rate.is_finite() => {
                    let rate = rate.clamp(0.0, 1.0);
                    if rate == 0.0 {
                        warn!(metric_name = name, segment, "Ignoring sample rate of zero.");
                    } else {
                        sample_rate = rate;
                    }
                }
                _ => warn!(metric_name = name, segment, "Ignoring malformed sample rate."),
            },
            Some(b'#') => tags = Some(RawTags::new(&segment[1..])),
            Some(_) => {}
            None => warn!(metric_name = name, "Ignoring empty metadata segment."),
        }
    }

    Ok(Some(MetricValuePacket {
        value,
        metric_type,
        sample_rate,
        tags,
    }))
}

fn parse_numeric_value<'a>(name: &str, raw: &str) -> Result<PacketValue<'a>, ParseError> {
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(PacketValue::Integer(value));
    }

    match raw.parse::<f64>() {
        Ok(value) => Ok(PacketValue::Float(value)),
        Err(_) => NonNumericValue { name, value: raw }.fail(),
    }
}

fn parse_sample_rate(input: &[u8]) -> IResult<&[u8], f64> {
    all_consuming(preceded(tag(SAMPLE_RATE_PREFIX), double)).parse(input)
}

/// Splits the part of a metric packet after the name into value groups.
///
/// Groups are separated by `:`, but tags may also contain `:`, so a `:`-separated token only starts a new group if
/// it contains a `|`. Anything else is glued back onto the group before it.
struct ValueGroups<'a> {
    remaining: Option<&'a str>,
}

impl<'a> ValueGroups<'a> {
    fn new(raw: &'a str) -> Self {
        Self { remaining: Some(raw) }
    }
}

impl<'a> Iterator for ValueGroups<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.remaining?;
        let bytes = remaining.as_bytes();

        let mut group_end = memchr::memchr(b':', bytes).unwrap_or(bytes.len());
        while group_end < bytes.len() {
            let token_start = group_end + 1;
            let token_end = memchr::memchr(b':', &bytes[token_start..]).map_or(bytes.len(), |idx| token_start + idx);

            if memchr::memchr(b'|', &bytes[token_start..token_end]).is_some() {
                self.remaining = Some(&remaining[token_start..]);
                return Some(&remaining[..group_end]);
            }

            group_end = token_end;
        }

        self.remaining = None;
        Some(remaining)
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*};

    use super::*;

    fn tags_of(value: &MetricValuePacket<'_>) -> Option<Vec<String>> {
        value
            .tags
            .map(|tags| tags.into_iter().map(String::from).collect::<Vec<_>>())
    }

    #[track_caller]
    fn parse_single(input: &str) -> MetricValuePacket<'_> {
        let mut packet = parse_dogstatsd_metric(input).expect("should not fail to parse");
        assert_eq!(packet.values.len(), 1, "expected exactly one value group");
        packet.values.remove(0)
    }

    #[test]
    fn basic_metric() {
        let packet = parse_dogstatsd_metric("my.counter:1|c").unwrap();
        assert_eq!(packet.name, "my.counter");
        assert_eq!(
            packet.values,
            vec![MetricValuePacket {
                value: PacketValue::Integer(1),
                metric_type: "c",
                sample_rate: 1.0,
                tags: None,
            }]
        );

        for kind in ["g", "h", "ms", "ct", "ct-c", "_dd-r"] {
            let raw = format!("my.metric:2.5|{}", kind);
            let value = parse_single(&raw);
            assert_eq!(value.metric_type, kind);
            assert_eq!(value.value, PacketValue::Float(2.5));
        }
    }

    #[test]
    fn integer_before_float() {
        assert_eq!(parse_single("a:42|g").value, PacketValue::Integer(42));
        assert_eq!(parse_single("a:-42|g").value, PacketValue::Integer(-42));
        assert_eq!(parse_single("a:42.0|g").value, PacketValue::Float(42.0));
        assert_eq!(parse_single("a:1e3|g").value, PacketValue::Float(1000.0));
    }

    #[test]
    fn set_values_stay_strings() {
        assert_eq!(parse_single("users:alice|s").value, PacketValue::String("alice"));
        assert_eq!(parse_single("users:12|s").value, PacketValue::String("12"));
    }

    #[test]
    fn non_numeric_value_fails_packet() {
        let err = parse_dogstatsd_metric("my.gauge:abc|g").unwrap_err();
        assert!(matches!(err, ParseError::NonNumericValue { .. }));

        assert!(parse_dogstatsd_metric("my.gauge:|g").is_err());
    }

    #[test]
    fn structural_failures() {
        for raw in ["no_colon", ":1|c", "name:", "name:1"] {
            assert!(
                matches!(parse_dogstatsd_metric(raw), Err(ParseError::UnparseableMetric { .. })),
                "expected '{}' to fail",
                raw
            );
        }
    }

    #[test]
    fn metric_tags() {
        let value = parse_single("my.counter:1|c|#env:prod,app:web");
        assert_eq!(tags_of(&value), Some(vec!["env:prod".to_string(), "app:web".to_string()]));

        // Last tag segment wins.
        let value = parse_single("my.counter:1|c|#a|#b");
        assert_eq!(tags_of(&value), Some(vec!["b".to_string()]));
    }

    #[test]
    fn metric_sample_rate() {
        assert_eq!(parse_single("a:1|c|@0.5").sample_rate, 0.5);
        assert_eq!(parse_single("a:1|c|@0.5|#t").sample_rate, 0.5);
        assert_eq!(parse_single("a:1|c|#t|@0.25").sample_rate, 0.25);
    }

    #[test]
    fn bad_sample_rates_are_ignored() {
        assert_eq!(parse_single("a:1|c|@0").sample_rate, 1.0);
        assert_eq!(parse_single("a:1|c|@-0.5").sample_rate, 1.0);
        assert_eq!(parse_single("a:1|c|@abc").sample_rate, 1.0);
        assert_eq!(parse_single("a:1|c|@").sample_rate, 1.0);
        assert_eq!(parse_single("a:1|c|@4").sample_rate, 1.0);

        // The rest of the packet is still read.
        let value = parse_single("a:1|c|@abc|#t");
        assert_eq!(tags_of(&value), Some(vec!["t".to_string()]));
    }

    #[test]
    fn empty_and_unknown_segments_are_ignored() {
        let value = parse_single("a:1|c||xy|#t|");
        assert_eq!(tags_of(&value), Some(vec!["t".to_string()]));
        assert_eq!(value.sample_rate, 1.0);
    }

    #[test]
    fn distributions_are_dropped_per_group() {
        let packet = parse_dogstatsd_metric("latency:1|d").unwrap();
        assert!(packet.values.is_empty());

        let packet = parse_dogstatsd_metric("latency:1|d:2|h:3|dk").unwrap();
        assert_eq!(packet.values.len(), 1);
        assert_eq!(packet.values[0].metric_type, "h");
        assert_eq!(packet.values[0].value, PacketValue::Integer(2));

        // Distribution values are not validated, since they are never used.
        assert!(parse_dogstatsd_metric("latency:abc|d").is_ok());
    }

    #[test]
    fn other_d_prefixed_types_are_kept() {
        let value = parse_single("latency:4|dx");
        assert_eq!(value.metric_type, "dx");
        assert_eq!(value.value, PacketValue::Integer(4));

        let err = parse_dogstatsd_metric("latency:abc|dx").unwrap_err();
        assert!(matches!(err, ParseError::NonNumericValue { .. }));
    }

    #[test]
    fn monokey_groups() {
        let packet = parse_dogstatsd_metric("name:1|g:2|g|#t1").unwrap();
        assert_eq!(packet.name, "name");
        assert_eq!(packet.values.len(), 2);
        assert_eq!(packet.values[0].value, PacketValue::Integer(1));
        assert_eq!(tags_of(&packet.values[0]), None);
        assert_eq!(packet.values[1].value, PacketValue::Integer(2));
        assert_eq!(tags_of(&packet.values[1]), Some(vec!["t1".to_string()]));
    }

    #[test]
    fn monokey_groups_with_colons_in_tags() {
        let packet = parse_dogstatsd_metric("name:1|c|#env:prod,region:us:east:2|g|#a:b").unwrap();
        assert_eq!(packet.values.len(), 2);
        assert_eq!(
            tags_of(&packet.values[0]),
            Some(vec!["env:prod".to_string(), "region:us:east".to_string()])
        );
        assert_eq!(packet.values[1].metric_type, "g");
        assert_eq!(tags_of(&packet.values[1]), Some(vec!["a:b".to_string()]));
    }

    #[test]
    fn value_groups_split() {
        let groups: Vec<&str> = ValueGroups::new("1|c|#a:b:c:2|g").collect();
        assert_eq!(groups, vec!["1|c|#a:b:c", "2|g"]);

        let groups: Vec<&str> = ValueGroups::new("").collect();
        assert_eq!(groups, vec![""]);

        let groups: Vec<&str> = ValueGroups::new("1|c:").collect();
        assert_eq!(groups, vec!["1|c:"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]
        #[test]
        fn property_test_malicious_input_non_exhaustive(input in arb_vec(0..255u8, 0..1000)) {
            if let Ok(input) = std::str::from_utf8(&input) {
                let _ = parse_dogstatsd_metric(input);
            }
        }

        #[test]
        fn property_test_structured_garbage(input in "[a-z0-9:|#@,.-]{0,80}") {
            let _ = parse_dogstatsd_metric(&input);
        }
    }
}
