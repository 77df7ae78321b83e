use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;

use crate::component::ComponentCore;
use crate::config::ProbeDefinition;
use crate::metric::Unit;
use crate::probe::{Probe, Reading};

pub const MEMORY_USED: &str = "MemoryUsedGb";
pub const MEMORY_FREE: &str = "MemoryFreeGb";
pub const MEMORY_USED_PERC: &str = "MemoryUsedPerc";

const BYTES_PER_GB: f64 = (1024 * 1024 * 1024) as f64;

#[derive(Debug, Default, Deserialize)]
pub struct MemoryOptions {}

/// Physical memory usage: used and free gigabytes plus used percent.
pub struct MemoryProbe {
    core: ComponentCore<MemoryOptions>,
    system: Mutex<System>,
}

impl MemoryProbe {
    pub fn new() -> Self {
        let refresh = RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram());
        Self {
            core: ComponentCore::new("memory"),
            system: Mutex::new(System::new_with_specifics(refresh)),
        }
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for MemoryProbe {
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
            (MEMORY_USED.to_string(), Unit::Gigabytes),
            (MEMORY_FREE.to_string(), Unit::Gigabytes),
            (MEMORY_USED_PERC.to_string(), Unit::Percent),
        ]
    }

    async fn sample(&self) -> Result<Vec<Reading>> {
        let (total, used) = {
            let mut system = self.system.lock().await;
            system.refresh_memory();
            (system.total_memory() as f64, system.used_memory() as f64)
        };

        let free = total - used;
        let used_perc = if total > 0.0 {
            used / total * 100.0
        } else {
            f64::NAN
        };

        Ok(vec![
            Reading::new(MEMORY_USED, used / BYTES_PER_GB),
            Reading::new(MEMORY_FREE, free / BYTES_PER_GB),
            Reading::new(MEMORY_USED_PERC, used_perc),
        ])
    }
}
