//! Service checks.
use serde::{Serialize, Serializer};

/// Service check status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckStatus {
    /// The check is healthy.
    Ok,

    /// The check is degraded.
    Warning,

    /// The check is failing.
    Critical,

    /// The check state could not be determined.
    Unknown,
}

impl CheckStatus {
    /// Returns the numeric wire value.
    pub const fn as_u8(&self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }
}

impl TryFrom<u8> for CheckStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Warning),
            2 => Ok(Self::Critical),
            3 => Ok(Self::Unknown),
            other => Err(other),
        }
    }
}

impl Serialize for CheckStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

/// The result of a service check run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServiceCheck {
    #[serde(rename = "check")]
    name: String,
    status: CheckStatus,
    timestamp: u64,
    #[serde(rename = "host_name")]
    hostname: Option<String>,
    message: Option<String>,
    tags: Option<Vec<String>>,
}

impl ServiceCheck {
    /// Creates a new service check.
    pub fn new(name: impl Into<String>, status: CheckStatus, timestamp: u64) -> Self {
        Self {
            name: name.into(),
            status,
            timestamp,
            hostname: None,
            message: None,
            tags: None,
        }
    }

    /// Returns the check name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the status.
    pub fn status(&self) -> CheckStatus {
        self.status
    }

    /// Returns the Unix timestamp, in seconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the host the check ran against.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Returns the message.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the tags.
    pub fn tags(&self) -> Option<&[String]> {
        self.tags.as_deref()
    }

    /// Sets the host. An empty host is stored as no host.
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname.filter(|h| !h.is_empty());
        self
    }

    /// Sets the message.
    pub fn with_message(mut self, message: Option<String>) -> Self {
        self.message = message;
        self
    }

    /// Sets the tags. They are sorted and deduplicated; an empty list is stored as no tags.
    pub fn with_tags(mut self, mut tags: Vec<String>) -> Self {
        tags.sort_unstable();
        tags.dedup();
        self.tags = if tags.is_empty() { None } else { Some(tags) };
        self
    }
}
