use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::sync::Mutex;

use crate::component::ComponentCore;
use crate::config::ProbeDefinition;
use crate::metric::Unit;
use crate::probe::{Probe, Reading};

pub const CPU_BUSY: &str = "CpuBusyPerc";
pub const CPU_IDLE: &str = "CpuIdlePerc";

#[derive(Debug, Default, Deserialize)]
pub struct CpuOptions {}

/// Aggregate CPU busy and idle percentages.
///
/// Usage is computed against the previous refresh, so the first sample
/// only primes the baseline and produces no readings.
pub struct CpuProbe {
    core: ComponentCore<CpuOptions>,
    system: Mutex<System>,
    primed: AtomicBool,
}

impl CpuProbe {
    pub fn new() -> Self {
        let refresh = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage());
        Self {
            core: ComponentCore::new("cpu"),
            system: Mutex::new(System::new_with_specifics(refresh)),
            primed: AtomicBool::new(false),
        }
    }
}

impl Default for CpuProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for CpuProbe {
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
            (CPU_BUSY.to_string(), Unit::Percent),
            (CPU_IDLE.to_string(), Unit::Percent),
        ]
    }

    async fn sample(&self) -> Result<Vec<Reading>> {
        let busy = {
            let mut system = self.system.lock().await;
            system.refresh_cpu_usage();
            f64::from(system.global_cpu_usage())
        };

        if !self.primed.swap(true, Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        Ok(vec![
            Reading::new(CPU_BUSY, busy),
            Reading::new(CPU_IDLE, 100.0 - busy),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> ProbeDefinition {
        ProbeDefinition {
            probe: "cpu".to_string(),
            name: None,
            publish: Vec::new(),
            dimensions: Default::default(),
            config: serde_yaml::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_first_sample_primes_the_baseline() {
        let mut probe = CpuProbe::new();
        probe.configure(&definition()).unwrap();

        assert!(probe.sample().await.unwrap().is_empty());

        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;

        let readings = probe.sample().await.unwrap();
        assert_eq!(readings.len(), 2);

        let busy = readings.iter().find(|r| r.name == CPU_BUSY).unwrap();
        let idle = readings.iter().find(|r| r.name == CPU_IDLE).unwrap();
        assert!((busy.value + idle.value - 100.0).abs() < 1e-6);
        assert!(busy.value >= 0.0);
    }

    #[test]
    fn test_known_metrics() {
        let probe = CpuProbe::new();
        let names: Vec<String> = probe.metrics().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![CPU_BUSY, CPU_IDLE]);
    }
}
