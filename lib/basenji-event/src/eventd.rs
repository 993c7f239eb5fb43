//! Events.
use std::fmt;

use serde::Serialize;

/// Alert type.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    /// Informational.
    #[default]
    Info,

    /// Error.
    Error,

    /// Warning.
    Warning,

    /// Success.
    Success,
}

impl AlertType {
    /// Parses an alert type from its wire form.
    pub fn try_from_string(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            "warning" => Some(Self::Warning),
            "success" => Some(Self::Success),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Success => "success",
        })
    }
}

/// Event priority.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Normal priority.
    #[default]
    Normal,

    /// Low priority.
    Low,
}

impl Priority {
    /// Parses a priority from its wire form.
    pub fn try_from_string(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Low => "low",
        })
    }
}

/// An event destined for the event stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EventD {
    #[serde(rename = "msg_title")]
    title: String,
    #[serde(rename = "msg_text")]
    text: String,
    timestamp: u64,
    #[serde(rename = "host")]
    hostname: Option<String>,
    aggregation_key: Option<String>,
    priority: Option<Priority>,
    source_type_name: Option<String>,
    alert_type: Option<AlertType>,
    tags: Option<Vec<String>>,
}

impl EventD {
    /// Creates a new event with the given title, text and Unix timestamp.
    pub fn new(title: impl Into<String>, text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            timestamp,
            hostname: None,
            aggregation_key: None,
            priority: None,
            source_type_name: None,
            alert_type: None,
            tags: None,
        }
    }

    /// Returns the title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Returns the text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the Unix timestamp, in seconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the originating host.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Returns the aggregation key.
    pub fn aggregation_key(&self) -> Option<&str> {
        self.aggregation_key.as_deref()
    }

    /// Returns the priority.
    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Returns the source type name.
    pub fn source_type_name(&self) -> Option<&str> {
        self.source_type_name.as_deref()
    }

    /// Returns the alert type.
    pub fn alert_type(&self) -> Option<AlertType> {
        self.alert_type
    }

    /// Returns the tags.
    pub fn tags(&self) -> Option<&[String]> {
        self.tags.as_deref()
    }

    /// Sets the originating host. An empty host is stored as no host.
    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname.filter(|h| !h.is_empty());
        self
    }

    /// Sets the aggregation key.
    pub fn with_aggregation_key(mut self, aggregation_key: Option<String>) -> Self {
        self.aggregation_key = aggregation_key;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the source type name.
    pub fn with_source_type_name(mut self, source_type_name: Option<String>) -> Self {
        self.source_type_name = source_type_name;
        self
    }

    /// Sets the alert type.
    pub fn with_alert_type(mut self, alert_type: Option<AlertType>) -> Self {
        self.alert_type = alert_type;
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
