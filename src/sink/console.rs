use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::component::ComponentCore;
use crate::config::SinkDefinition;
use crate::metric::Metric;
use crate::sink::Sink;

#[derive(Debug, Default, Deserialize)]
pub struct ConsoleOptions {}

/// Logs every metric it receives. Useful for new definitions and for
/// watching a host interactively.
pub struct ConsoleSink {
    core: ComponentCore<ConsoleOptions>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self {
            core: ComponentCore::new("console"),
        }
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for ConsoleSink {
    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn scope(&self) -> &str {
        self.core.scope()
    }

    fn configure(&mut self, definition: &SinkDefinition) -> Result<()> {
        self.core
            .configure(definition.name.as_deref(), &definition.config)?;
        Ok(())
    }

    async fn deliver(&self, metric: &Metric) -> Result<()> {
        info!(
            sink = %self.scope(),
            metric = %metric.name,
            value = metric.value,
            unit = %metric.unit,
            dimensions = ?metric.dimensions,
            "metric",
        );
        Ok(())
    }
}
