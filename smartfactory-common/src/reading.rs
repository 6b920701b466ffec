use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;

/// A single tag sample taken from a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Name of the controller endpoint the sample came from.
    pub endpoint: String,

    /// Tag identifier (e.g., "line1/temperature", "holding/40001").
    pub tag: String,

    /// Sampled value. `None` when the controller reported the tag as unreadable.
    #[serde(default)]
    pub value: Option<TagValue>,

    /// Quality reported by the controller protocol.
    #[serde(default)]
    pub quality: Quality,

    /// Unix epoch milliseconds when the sample was taken.
    pub timestamp: i64,

    /// Milliseconds since process start when the sample was taken.
    ///
    /// Unaffected by wall-clock adjustments; only comparable within one process run.
    #[serde(default)]
    pub monotonic_ms: u64,
}

impl Reading {
    /// Create a good-quality reading stamped with the current time.
    pub fn new(endpoint: impl Into<String>, tag: impl Into<String>, value: TagValue) -> Self {
        Self {
            endpoint: endpoint.into(),
            tag: tag.into(),
            value: Some(value),
            quality: Quality::Good,
            timestamp: current_timestamp_millis(),
            monotonic_ms: monotonic_millis(),
        }
    }

    /// Create a bad-quality reading for a tag that could not be read.
    pub fn bad(endpoint: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            tag: tag.into(),
            value: None,
            quality: Quality::Bad,
            timestamp: current_timestamp_millis(),
            monotonic_ms: monotonic_millis(),
        }
    }

    /// Override the quality flag.
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    /// Override the wall-clock timestamp (Unix millis).
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Typed tag value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Digital input, coil, or boolean variable.
    Boolean(bool),

    /// Integer register or counter.
    Integer(i64),

    /// Analog value.
    Float(f64),
}

impl TagValue {
    /// Numeric view of the value (booleans map to 0.0 / 1.0).
    pub fn as_f64(&self) -> f64 {
        match self {
            TagValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            TagValue::Integer(i) => *i as f64,
            TagValue::Float(f) => *f,
        }
    }
}

impl From<bool> for TagValue {
    fn from(v: bool) -> Self {
        TagValue::Boolean(v)
    }
}

impl From<i64> for TagValue {
    fn from(v: i64) -> Self {
        TagValue::Integer(v)
    }
}

impl From<f64> for TagValue {
    fn from(v: f64) -> Self {
        TagValue::Float(v)
    }
}

/// Sample quality as reported by the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Good,
    Bad,
    Uncertain,
}

impl Quality {
    /// String representation used in storage and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Good => "good",
            Quality::Bad => "bad",
            Quality::Uncertain => "uncertain",
        }
    }

    /// Parse the storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" => Some(Quality::Good),
            "bad" => Some(Quality::Bad),
            "uncertain" => Some(Quality::Uncertain),
            _ => None,
        }
    }
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Milliseconds elapsed since the first call in this process.
pub fn monotonic_millis() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    anchor.elapsed().as_millis() as u64
}
