use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Measurement units understood by the delivery backends.
///
/// Serialized names are the canonical backend strings, including the
/// rate variants (e.g. `Count/Second`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    None,
    Count,
    Percent,
    Microseconds,
    Milliseconds,
    Seconds,
    Bits,
    Kilobits,
    Megabits,
    Gigabits,
    Terabits,
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
    Terabytes,
    #[serde(rename = "Count/Second")]
    CountPerSecond,
    #[serde(rename = "Bits/Second")]
    BitsPerSecond,
    #[serde(rename = "Kilobits/Second")]
    KilobitsPerSecond,
    #[serde(rename = "Megabits/Second")]
    MegabitsPerSecond,
    #[serde(rename = "Gigabits/Second")]
    GigabitsPerSecond,
    #[serde(rename = "Terabits/Second")]
    TerabitsPerSecond,
    #[serde(rename = "Bytes/Second")]
    BytesPerSecond,
    #[serde(rename = "Kilobytes/Second")]
    KilobytesPerSecond,
    #[serde(rename = "Megabytes/Second")]
    MegabytesPerSecond,
    #[serde(rename = "Gigabytes/Second")]
    GigabytesPerSecond,
    #[serde(rename = "Terabytes/Second")]
    TerabytesPerSecond,
}

impl Unit {
    /// Canonical backend string for this unit.
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::None => "None",
            Unit::Count => "Count",
            Unit::Percent => "Percent",
            Unit::Microseconds => "Microseconds",
            Unit::Milliseconds => "Milliseconds",
            Unit::Seconds => "Seconds",
            Unit::Bits => "Bits",
            Unit::Kilobits => "Kilobits",
            Unit::Megabits => "Megabits",
            Unit::Gigabits => "Gigabits",
            Unit::Terabits => "Terabits",
            Unit::Bytes => "Bytes",
            Unit::Kilobytes => "Kilobytes",
            Unit::Megabytes => "Megabytes",
            Unit::Gigabytes => "Gigabytes",
            Unit::Terabytes => "Terabytes",
            Unit::CountPerSecond => "Count/Second",
            Unit::BitsPerSecond => "Bits/Second",
            Unit::KilobitsPerSecond => "Kilobits/Second",
            Unit::MegabitsPerSecond => "Megabits/Second",
            Unit::GigabitsPerSecond => "Gigabits/Second",
            Unit::TerabitsPerSecond => "Terabits/Second",
            Unit::BytesPerSecond => "Bytes/Second",
            Unit::KilobytesPerSecond => "Kilobytes/Second",
            Unit::MegabytesPerSecond => "Megabytes/Second",
            Unit::GigabytesPerSecond => "Gigabytes/Second",
            Unit::TerabytesPerSecond => "Terabytes/Second",
        }
    }
}

impl Default for Unit {
    fn default() -> Self {
        Unit::None
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single named measurement at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Metric {
    /// Metric name (e.g. "CpuBusyPerc").
    pub name: String,

    /// Measurement unit.
    pub unit: Unit,

    /// Measured value. Always finite by the time it reaches a sink.
    pub value: f64,

    /// Epoch milliseconds at sampling time.
    pub timestamp: i64,

    /// Dimensions attached to this measurement, in stable key order.
    pub dimensions: BTreeMap<String, String>,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        unit: Unit,
        value: f64,
        timestamp: i64,
        dimensions: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            unit,
            value,
            timestamp,
            dimensions,
        }
    }
}

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
