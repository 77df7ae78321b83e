pub mod cpu;
pub mod disk;
pub mod load;
pub mod memory;
pub mod pattern;
pub mod ping;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{trace, warn};

use crate::config::ProbeDefinition;
use crate::metric::{now_millis, Metric, Unit};
use crate::sink::Sinks;

/// One named measurement produced by a probe sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub value: f64,
}

impl Reading {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// A metric source. Configured once, then sampled repeatedly.
///
/// Probes keep any mutable sampling state behind their own locks so
/// `sample` can run from a spawned task.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable type tag, matching the registry name.
    fn kind(&self) -> &'static str;

    /// Display name from the definition, or the type tag.
    fn name(&self) -> &str;

    /// Log scope in `kind:name` form.
    fn scope(&self) -> &str;

    /// Apply and validate the definition. Called exactly once.
    fn configure(&mut self, definition: &ProbeDefinition) -> Result<()>;

    /// Every metric this probe can produce, with its unit. Valid after
    /// `configure`.
    fn metrics(&self) -> Vec<(String, Unit)>;

    /// Acquire resources and verify the probe can sample.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Take one set of measurements.
    async fn sample(&self) -> Result<Vec<Reading>>;
}

/// A configured probe plus its resolved publish set, units, and
/// dimensions, with the re-entrancy guard for polling.
pub struct ProbeHandle {
    probe: Arc<dyn Probe>,
    publish: Arc<HashSet<String>>,
    units: Arc<HashMap<String, Unit>>,
    dimensions: Arc<BTreeMap<String, String>>,
    sampling: Arc<AtomicBool>,
    scope: String,
}

impl ProbeHandle {
    /// Wrap a configured probe. Validates the publish list against the
    /// probe's known metrics and merges dimensions, the probe-specific
    /// value winning over the global one on collision.
    pub fn new(
        probe: Arc<dyn Probe>,
        definition: &ProbeDefinition,
        global_dimensions: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let scope = probe.scope().to_string();

        let units: HashMap<String, Unit> = probe.metrics().into_iter().collect();

        let publish: HashSet<String> = if definition.publish.is_empty() {
            units.keys().cloned().collect()
        } else {
            for name in &definition.publish {
                if !units.contains_key(name) {
                    let mut known: Vec<&str> = units.keys().map(String::as_str).collect();
                    known.sort_unstable();
                    bail!(
                        "{scope} publishes unknown metric {name:?} (known metrics: {})",
                        known.join(", ")
                    );
                }
            }
            definition.publish.iter().cloned().collect()
        };

        let mut dimensions = global_dimensions.clone();
        dimensions.extend(
            definition
                .dimensions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        Ok(Self {
            probe,
            publish: Arc::new(publish),
            units: Arc::new(units),
            dimensions: Arc::new(dimensions),
            sampling: Arc::new(AtomicBool::new(false)),
            scope,
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn probe(&self) -> &Arc<dyn Probe> {
        &self.probe
    }

    /// Kick off one sample on a spawned task. A poll that arrives while
    /// a previous sample is still in flight is dropped.
    pub fn poll(&self, sinks: Arc<Sinks>) {
        if self.sampling.swap(true, Ordering::SeqCst) {
            trace!(probe = %self.scope, "previous sample still in flight, skipping poll");
            return;
        }

        let probe = Arc::clone(&self.probe);
        let publish = Arc::clone(&self.publish);
        let units = Arc::clone(&self.units);
        let dimensions = Arc::clone(&self.dimensions);
        let sampling = Arc::clone(&self.sampling);
        let scope = self.scope.clone();

        tokio::spawn(async move {
            match probe.sample().await {
                Ok(readings) => {
                    let timestamp = now_millis();
                    for reading in readings {
                        if !reading.value.is_finite() {
                            trace!(
                                probe = %scope,
                                metric = %reading.name,
                                "dropping non-finite reading",
                            );
                            continue;
                        }
                        if !publish.contains(&reading.name) {
                            continue;
                        }

                        let unit = units.get(&reading.name).copied().unwrap_or_default();
                        let metric = Metric::new(
                            reading.name,
                            unit,
                            reading.value,
                            timestamp,
                            dimensions.as_ref().clone(),
                        );
                        sinks.deliver(&metric).await;
                    }
                }
                Err(e) => {
                    warn!(probe = %scope, error = %e, "sample failed");
                }
            }

            sampling.store(false, Ordering::SeqCst);
        });
    }
}

/// Ordered collection of probe handles.
pub struct Probes {
    handles: Vec<ProbeHandle>,
}

impl Probes {
    /// At least one probe is required.
    pub fn new(handles: Vec<ProbeHandle>) -> Result<Self> {
        if handles.is_empty() {
            bail!("at least one probe is required");
        }
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Start every probe in order. The first failure propagates.
    pub async fn start(&self) -> Result<()> {
        for handle in &self.handles {
            handle
                .probe
                .start()
                .await
                .map_err(|e| e.context(format!("starting {}", handle.scope)))?;
        }
        Ok(())
    }

    /// Stop every probe in order. Failures are logged so one bad probe
    /// cannot block the rest of shutdown.
    pub async fn stop(&self) {
        for handle in &self.handles {
            if let Err(e) = handle.probe.stop().await {
                warn!(probe = %handle.scope, error = %e, "stop failed");
            }
        }
    }

    /// Poll every probe. Sampling failures are isolated per probe.
    pub fn poll(&self, sinks: &Arc<Sinks>) {
        for handle in &self.handles {
            handle.poll(Arc::clone(sinks));
        }
    }
}
