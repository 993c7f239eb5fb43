/// Kind of a DogStatsD packet, as determined by its prefix.
#[derive(Debug, Eq, PartialEq)]
pub enum MessageType {
    /// A metric packet, which is anything not carrying an event or service check prefix.
    MetricSample,

    /// An event (`_e{`).
    Event,

    /// A service check (`_sc|`).
    ServiceCheck,
}

pub const EVENT_PREFIX: &[u8] = b"_e{";
pub const SERVICE_CHECK_PREFIX: &[u8] = b"_sc|";

pub const TIMESTAMP_PREFIX: &[u8] = b"d:";
pub const HOSTNAME_PREFIX: &[u8] = b"h:";
pub const AGGREGATION_KEY_PREFIX: &[u8] = b"k:";
pub const PRIORITY_PREFIX: &[u8] = b"p:";
pub const SOURCE_TYPE_PREFIX: &[u8] = b"s:";
pub const ALERT_TYPE_PREFIX: &[u8] = b"t:";
pub const TAGS_PREFIX: &[u8] = b"#";
pub const SAMPLE_RATE_PREFIX: &[u8] = b"@";
pub const SERVICE_CHECK_MESSAGE_PREFIX: &[u8] = b"m:";
pub const SERVICE_CHECK_MESSAGE_DELIMITER: &[u8] = b"|m:";

/// Determines the kind of the packet in `data` from its prefix.
pub fn parse_message_type(data: &[u8]) -> MessageType {
    if data.starts_with(EVENT_PREFIX) {
        MessageType::Event
    } else if data.starts_with(SERVICE_CHECK_PREFIX) {
        MessageType::ServiceCheck
    } else {
        MessageType::MetricSample
    }
}

/// Turns escaped `\n` sequences into newlines.
pub fn unescape_newlines(s: &str) -> String {
    s.replace("\\n", "\n")
}

/// Unescapes service check content: `\n` as in event text, plus `m\:`, which clients use so a literal `m:` can't be
/// mistaken for the message field.
pub fn unescape_service_check(s: &str) -> String {
    unescape_newlines(s).replace("m\\:", "m:")
}
