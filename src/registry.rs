use anyhow::{bail, Result};

use crate::probe::{
    cpu::CpuProbe, disk::DiskProbe, load::LoadProbe, memory::MemoryProbe, pattern::PatternProbe,
    ping::PingProbe, Probe,
};
use crate::sink::{console::ConsoleSink, http::HttpSink, Sink};

/// Probe type tags, in registry order.
pub const PROBE_KINDS: &[&str] = &["cpu", "memory", "load", "disk", "ping", "pattern"];

/// Sink type tags, in registry order.
pub const SINK_KINDS: &[&str] = &["console", "http"];

/// Construct an unconfigured probe for a type tag.
pub fn create_probe(kind: &str) -> Result<Box<dyn Probe>> {
    Ok(match kind {
        "cpu" => Box::new(CpuProbe::new()),
        "memory" => Box::new(MemoryProbe::new()),
        "load" => Box::new(LoadProbe::new()),
        "disk" => Box::new(DiskProbe::new()),
        "ping" => Box::new(PingProbe::new()),
        "pattern" => Box::new(PatternProbe::new()),
        _ => bail!(
            "unknown probe type {kind:?} (known types: {})",
            PROBE_KINDS.join(", ")
        ),
    })
}

/// Construct an unconfigured sink for a type tag.
pub fn create_sink(kind: &str) -> Result<Box<dyn Sink>> {
    Ok(match kind {
        "console" => Box::new(ConsoleSink::new()),
        "http" => Box::new(HttpSink::new()),
        _ => bail!(
            "unknown sink type {kind:?} (known types: {})",
            SINK_KINDS.join(", ")
        ),
    })
}
