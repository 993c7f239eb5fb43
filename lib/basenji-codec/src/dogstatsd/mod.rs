//! The [DogStatsD][dsd] protocol.
//!
//! DogStatsD extends StatsD with tags, additional metric types, events (`_e{...}`), and service checks (`_sc|...`).
//!
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/datagram_shell/
use std::borrow::Cow;

use snafu::Snafu;

mod event;
pub use self::event::EventPacket;

mod helpers;

mod message;
pub use self::message::{parse_message_type, MessageType};

mod metric;
pub use self::metric::{MetricPacket, MetricValuePacket, PacketValue};

mod service_check;
pub use self::service_check::ServiceCheckPacket;

use crate::framing::decode_utf8_lossy;

type NomParserError<'a> = nom::Err<nom::error::Error<&'a [u8]>>;

/// A packet decoding error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum ParseError {
    /// The packet did not match the expected structure.
    #[snafu(display("encountered error '{:?}' while processing message '{}'", kind, data))]
    Structural {
        /// What the parser was trying to match when it failed.
        kind: nom::error::ErrorKind,
        /// The input remaining at the point of failure.
        data: String,
    },

    /// The packet was not valid UTF-8.
    #[snafu(display("packet is not valid UTF-8: '{}'", data))]
    InvalidUtf8 {
        /// The packet, with invalid sequences replaced.
        data: String,
    },

    /// The metric packet had no name, or a value group had no type.
    #[snafu(display("unparseable metric packet: '{}'", packet))]
    UnparseableMetric {
        /// The full packet.
        packet: String,
    },

    /// A value for a numeric metric type was not a number.
    #[snafu(display("metric value must be a number: {}, {}", name, value))]
    NonNumericValue {
        /// The metric name.
        name: String,
        /// The offending value.
        value: String,
    },
}

impl<'a> From<NomParserError<'a>> for ParseError {
    fn from(err: NomParserError<'a>) -> Self {
        match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => ParseError::Structural {
                kind: e.code,
                data: String::from_utf8_lossy(e.input).to_string(),
            },
            // Only complete parsers are used, which never report incomplete input.
            nom::Err::Incomplete(_) => ParseError::Structural {
                kind: nom::error::ErrorKind::Complete,
                data: String::new(),
            },
        }
    }
}

/// DogStatsD codec configuration.
#[derive(Clone, Debug, Default)]
pub struct DogstatsdCodecConfiguration {
    utf8_decoding: bool,
}

impl DogstatsdCodecConfiguration {
    /// Sets whether payloads are decoded as lossy UTF-8 before parsing.
    ///
    /// When enabled, invalid UTF-8 sequences are replaced with U+FFFD and the packet is parsed as usual. When
    /// disabled, a packet containing invalid UTF-8 fails to parse.
    ///
    /// Defaults to `false`.
    pub fn with_utf8_decoding(mut self, utf8_decoding: bool) -> Self {
        self.utf8_decoding = utf8_decoding;
        self
    }
}

/// A DogStatsD packet.
#[derive(Debug, PartialEq)]
pub enum DogStatsDPacket<'a> {
    /// One or more metric samples sharing a name.
    Metric(MetricPacket<'a>),

    /// An event.
    Event(EventPacket<'a>),

    /// A service check.
    ServiceCheck(ServiceCheckPacket<'a>),
}

/// A DogStatsD codec.
#[derive(Clone, Debug, Default)]
pub struct DogstatsdCodec {
    config: DogstatsdCodecConfiguration,
}

impl DogstatsdCodec {
    /// Creates a codec with the given configuration.
    pub fn from_configuration(config: DogstatsdCodecConfiguration) -> Self {
        Self { config }
    }

    /// Prepares a raw payload for framing, applying lossy UTF-8 decoding if enabled.
    pub fn prepare_payload<'a>(&self, payload: &'a [u8]) -> Cow<'a, [u8]> {
        if self.config.utf8_decoding {
            decode_utf8_lossy(payload)
        } else {
            Cow::Borrowed(payload)
        }
    }

    /// Decodes a single packet.
    ///
    /// # Errors
    ///
    /// If the packet is malformed, an error is returned.
    pub fn decode_packet<'a>(&self, data: &'a [u8]) -> Result<DogStatsDPacket<'a>, ParseError> {
        match parse_message_type(data) {
            MessageType::Event => {
                let (_, event) = event::parse_dogstatsd_event(data)?;
                Ok(DogStatsDPacket::Event(event))
            }
            MessageType::ServiceCheck => {
                let (_, service_check) = service_check::parse_dogstatsd_service_check(data)?;
                Ok(DogStatsDPacket::ServiceCheck(service_check))
            }
            MessageType::MetricSample => {
                let data = simdutf8::basic::from_utf8(data).map_err(|_| ParseError::InvalidUtf8 {
                    data: String::from_utf8_lossy(data).into_owned(),
                })?;
                metric::parse_dogstatsd_metric(data).map(DogStatsDPacket::Metric)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::LineFramer;

    #[test]
    fn dispatches_by_prefix() {
        let codec = DogstatsdCodec::default();
        assert!(matches!(
            codec.decode_packet(b"my.metric:1|c"),
            Ok(DogStatsDPacket::Metric(_))
        ));
        assert!(matches!(
            codec.decode_packet(b"_e{1,1}:a|b"),
            Ok(DogStatsDPacket::Event(_))
        ));
        assert!(matches!(
            codec.decode_packet(b"_sc|check|0"),
            Ok(DogStatsDPacket::ServiceCheck(_))
        ));
    }

    #[test]
    fn invalid_utf8_depends_on_decoding() {
        let payload = b"caf\xe9:1|c";

        let strict = DogstatsdCodec::default();
        let prepared = strict.prepare_payload(payload);
        assert!(matches!(
            strict.decode_packet(&prepared),
            Err(ParseError::InvalidUtf8 { .. })
        ));

        let lossy = DogstatsdCodec::from_configuration(DogstatsdCodecConfiguration::default().with_utf8_decoding(true));
        let prepared = lossy.prepare_payload(payload);
        match lossy.decode_packet(&prepared) {
            Ok(DogStatsDPacket::Metric(packet)) => assert_eq!(packet.name, "caf\u{fffd}"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn trailing_garbage_after_event_fails() {
        let codec = DogstatsdCodec::default();
        assert!(codec.decode_packet(b"_e{1,1}:a|bc").is_err());
    }

    #[test]
    fn framed_payload() {
        let codec = DogstatsdCodec::default();
        let payload = b"a:1|c\n_sc|check|0\r\n\n_e{1,1}:t|x\nbad";
        let results: Vec<_> = LineFramer::new(payload).map(|line| codec.decode_packet(line)).collect();

        assert_eq!(results.len(), 4);
        assert!(results[..3].iter().all(Result::is_ok));
        assert!(matches!(results[3], Err(ParseError::UnparseableMetric { .. })));
    }
}
