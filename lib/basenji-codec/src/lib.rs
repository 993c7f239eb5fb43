//! Decoding of DogStatsD payloads.
#![deny(missing_docs)]

pub mod dogstatsd;
pub mod framing;
