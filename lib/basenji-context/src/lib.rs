//! Metric identity: names, tags, and hosts.
#![deny(missing_docs)]

mod context;
pub use self::context::Context;

pub mod hash;

mod tags;
pub use self::tags::{RawTags, TagSet};
