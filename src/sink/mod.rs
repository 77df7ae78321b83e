pub mod console;
pub mod http;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::warn;

use crate::config::SinkDefinition;
use crate::metric::Metric;

/// A metric destination. Configured once, then delivered to repeatedly.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable type tag, matching the registry name.
    fn kind(&self) -> &'static str;

    /// Display name from the definition, or the type tag.
    fn name(&self) -> &str;

    /// Log scope in `kind:name` form.
    fn scope(&self) -> &str;

    /// Apply and validate the definition. Called exactly once.
    fn configure(&mut self, definition: &SinkDefinition) -> Result<()>;

    /// Acquire resources and verify the sink can deliver.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Flush anything buffered and release resources.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Accept one metric. May buffer rather than forward immediately.
    async fn deliver(&self, metric: &Metric) -> Result<()>;
}

/// Ordered collection of sinks.
pub struct Sinks {
    sinks: Vec<Box<dyn Sink>>,
}

impl Sinks {
    /// At least one sink is required.
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Result<Self> {
        if sinks.is_empty() {
            bail!("at least one sink is required");
        }
        Ok(Self { sinks })
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Start every sink in order. The first failure propagates.
    pub async fn start(&self) -> Result<()> {
        for sink in &self.sinks {
            sink.start()
                .await
                .map_err(|e| e.context(format!("starting {}", sink.scope())))?;
        }
        Ok(())
    }

    /// Stop every sink in order. Failures are logged so one bad sink
    /// cannot block the rest of shutdown.
    pub async fn stop(&self) {
        for sink in &self.sinks {
            if let Err(e) = sink.stop().await {
                warn!(sink = %sink.scope(), error = %e, "stop failed");
            }
        }
    }

    /// Offer one metric to every sink. A failing sink is logged and
    /// skipped; the remaining sinks still receive the metric.
    pub async fn deliver(&self, metric: &Metric) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(metric).await {
                warn!(
                    sink = %sink.scope(),
                    metric = %metric.name,
                    error = %e,
                    "delivery failed",
                );
            }
        }
    }
}
