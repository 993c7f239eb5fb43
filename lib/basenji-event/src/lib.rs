//! Records produced by aggregation and handed to the transport layer.
#![deny(missing_docs)]

pub mod eventd;
pub use self::eventd::EventD;

mod point;
pub use self::point::{DataPoint, DataPointType};

pub mod service_check;
pub use self::service_check::ServiceCheck;
