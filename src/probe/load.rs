use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::{CpuRefreshKind, RefreshKind, System};

use crate::component::ComponentCore;
use crate::config::ProbeDefinition;
use crate::metric::Unit;
use crate::probe::{Probe, Reading};

pub const LOAD_1M: &str = "LoadAverage1m";
pub const LOAD_5M: &str = "LoadAverage5m";
pub const LOAD_15M: &str = "LoadAverage15m";
pub const LOAD_PER_CORE_1M: &str = "LoadPerCore1m";
pub const LOAD_PER_CORE_5M: &str = "LoadPerCore5m";
pub const LOAD_PER_CORE_15M: &str = "LoadPerCore15m";

#[derive(Debug, Default, Deserialize)]
pub struct LoadOptions {}

/// System load averages, raw and normalized per core.
pub struct LoadProbe {
    core: ComponentCore<LoadOptions>,
    cores: usize,
}

impl LoadProbe {
    pub fn new() -> Self {
        // The core count is static; read it once.
        let refresh = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing());
        let system = System::new_with_specifics(refresh);
        Self {
            core: ComponentCore::new("load"),
            cores: system.cpus().len().max(1),
        }
    }
}

impl Default for LoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for LoadProbe {
    fn kind(&self) -> &'static str {
        self.core.kind()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn scope(&self) -> &str {
        self.core.scope()
    }

    fn configure(&mut self, definition: &ProbeDefinition) -> Result<()> {
        self.core
            .configure(definition.name.as_deref(), &definition.config)
    }

    fn metrics(&self) -> Vec<(String, Unit)> {
        vec![
            (LOAD_1M.to_string(), Unit::Count),
            (LOAD_5M.to_string(), Unit::Count),
            (LOAD_15M.to_string(), Unit::Count),
            (LOAD_PER_CORE_1M.to_string(), Unit::Percent),
            (LOAD_PER_CORE_5M.to_string(), Unit::Percent),
            (LOAD_PER_CORE_15M.to_string(), Unit::Percent),
        ]
    }

    async fn sample(&self) -> Result<Vec<Reading>> {
        let load = System::load_average();
        let cores = self.cores as f64;

        Ok(vec![
            Reading::new(LOAD_1M, load.one),
            Reading::new(LOAD_5M, load.five),
            Reading::new(LOAD_15M, load.fifteen),
            Reading::new(LOAD_PER_CORE_1M, load.one / cores * 100.0),
            Reading::new(LOAD_PER_CORE_5M, load.five / cores * 100.0),
            Reading::new(LOAD_PER_CORE_15M, load.fifteen / cores * 100.0),
        ])
    }
}
