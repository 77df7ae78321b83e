pub mod duration;
pub mod resolver;

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::Value;

use duration::{DurationBounds, DAY, MILLISECOND, SECOND};
use resolver::Resolver;

/// Top-level agent definition loaded from a YAML document.
///
/// The `variables` section is consumed during loading; every other value
/// in the document has had its `${...}` expressions resolved by the time
/// this struct exists.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchDefinition {
    /// Agent-wide settings.
    #[serde(default)]
    pub config: Configuration,

    /// Dimensions attached to every metric from every probe.
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,

    /// Probe definitions, initialized in document order.
    #[serde(default)]
    pub probes: Vec<ProbeDefinition>,

    /// Sink definitions, initialized in document order.
    #[serde(default)]
    pub sinks: Vec<SinkDefinition>,
}

/// Agent-wide settings from the document's `config` section.
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Include timestamps in log output. Default: true.
    #[serde(default = "default_true")]
    pub log_times: bool,

    /// Use ANSI colors in log output. Default: true.
    #[serde(default = "default_true")]
    pub log_colors: bool,

    /// How often to poll every probe. Bare numbers are milliseconds;
    /// strings use the duration grammar ("30s", "1 min"). Default: 10s.
    #[serde(default)]
    pub poll_interval: Option<Value>,
}

/// One probe entry from the document's `probes` list.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeDefinition {
    /// Probe type tag (e.g. "cpu", "disk").
    pub probe: String,

    /// Display name. Defaults to the type tag.
    #[serde(default)]
    pub name: Option<String>,

    /// Metric names to publish. Empty means every metric the probe knows.
    #[serde(default)]
    pub publish: Vec<String>,

    /// Probe-specific dimensions, merged over the global dimensions.
    #[serde(default)]
    pub dimensions: BTreeMap<String, String>,

    /// Probe-specific configuration, validated by the concrete type.
    #[serde(default)]
    pub config: Value,
}

/// One sink entry from the document's `sinks` list.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkDefinition {
    /// Sink type tag (e.g. "console", "http").
    pub sink: String,

    /// Display name. Defaults to the type tag.
    #[serde(default)]
    pub name: Option<String>,

    /// Sink-specific configuration, validated by the concrete type.
    #[serde(default)]
    pub config: Value,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_times: true,
            log_colors: true,
            poll_interval: None,
        }
    }
}

impl Configuration {
    /// Resolved poll interval in milliseconds (1s ..= 1 day, default 10s).
    pub fn poll_interval_millis(&self) -> Result<u64> {
        let bounds = DurationBounds::inclusive(SECOND, DAY);
        match &self.poll_interval {
            Some(value) => duration::parse_millis(value, MILLISECOND, &bounds)
                .context("invalid config.poll_interval"),
            None => Ok(10 * SECOND),
        }
    }
}

impl WatchDefinition {
    /// Load and resolve a definition from a YAML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading definition file {}", path.display()))?;

        let mut resolver = Resolver::new();
        Self::parse(&data, &mut resolver)
            .await
            .with_context(|| format!("loading definition from {}", path.display()))
    }

    /// Parse and resolve a YAML document with the given resolver.
    pub async fn parse(data: &str, resolver: &mut Resolver) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(data).context("parsing definition YAML")?;

        let mut doc = match doc {
            Value::Mapping(map) => map,
            Value::Null => serde_yaml::Mapping::new(),
            other => bail!("definition document must be a mapping, got {other:?}"),
        };

        // Variables declare left to right before anything else resolves.
        if let Some(variables) = doc.remove(&Value::String("variables".to_string())) {
            match variables {
                Value::Mapping(map) => resolver
                    .declare(map)
                    .await
                    .context("declaring variables")?,
                Value::Null => {}
                other => bail!("variables section must be a mapping, got {other:?}"),
            }
        }

        let resolved = resolver
            .resolve(Value::Mapping(doc))
            .await
            .context("resolving definition values")?;

        serde_yaml::from_value(resolved).context("invalid definition structure")
    }
}
