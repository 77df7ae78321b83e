use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::Disks;

use crate::component::ComponentCore;
use crate::config::ProbeDefinition;
use crate::metric::Unit;
use crate::probe::{Probe, Reading};

pub const DISK_USED: &str = "DiskUsedGb";
pub const DISK_FREE: &str = "DiskFreeGb";
pub const DISK_USED_PERC: &str = "DiskUsedPerc";

const BYTES_PER_GB: f64 = (1024 * 1024 * 1024) as f64;

fn default_path() -> PathBuf {
    PathBuf::from("/")
}

#[derive(Debug, Deserialize)]
pub struct DiskOptions {
    /// Path whose filesystem to measure. Default: "/".
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

impl Default for DiskOptions {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

/// Filesystem usage for the mount backing a configured path.
pub struct DiskProbe {
    core: ComponentCore<DiskOptions>,
}

impl DiskProbe {
    pub fn new() -> Self {
        Self {
            core: ComponentCore::new("disk"),
        }
    }

    fn path(&self) -> Result<&Path> {
        Ok(&self.core.config()?.path)
    }
}

impl Default for DiskProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// The disk whose mount point is the longest prefix of `path`.
fn find_mount(disks: &Disks, path: &Path) -> Option<(u64, u64)> {
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.total_space(), d.available_space()))
}

#[async_trait]
impl Probe for DiskProbe {
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
            (DISK_USED.to_string(), Unit::Gigabytes),
            (DISK_FREE.to_string(), Unit::Gigabytes),
            (DISK_USED_PERC.to_string(), Unit::Percent),
        ]
    }

    async fn start(&self) -> Result<()> {
        let path = self.path()?;
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("{}: cannot access {}", self.scope(), path.display()))?;

        if !meta.is_dir() {
            bail!("{}: {} is not a directory", self.scope(), path.display());
        }
        Ok(())
    }

    async fn sample(&self) -> Result<Vec<Reading>> {
        let path = self.path()?;
        let disks = Disks::new_with_refreshed_list();

        let (total, available) = find_mount(&disks, path).with_context(|| {
            format!("{}: no mount found for {}", self.scope(), path.display())
        })?;

        let total = total as f64;
        let free = available as f64;
        let used = total - free;
        let used_perc = if total > 0.0 {
            used / total * 100.0
        } else {
            f64::NAN
        };

        Ok(vec![
            Reading::new(DISK_USED, used / BYTES_PER_GB),
            Reading::new(DISK_FREE, free / BYTES_PER_GB),
            Reading::new(DISK_USED_PERC, used_perc),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(config: &str) -> ProbeDefinition {
        ProbeDefinition {
            probe: "disk".to_string(),
            name: None,
            publish: Vec::new(),
            dimensions: Default::default(),
            config: serde_yaml::from_str(config).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_defaults_to_root_and_samples() {
        let mut probe = DiskProbe::new();
        probe.configure(&definition("{}")).unwrap();

        probe.start().await.unwrap();

        let readings = probe.sample().await.unwrap();
        assert_eq!(readings.len(), 3);

        let used = readings.iter().find(|r| r.name == DISK_USED).unwrap();
        let free = readings.iter().find(|r| r.name == DISK_FREE).unwrap();
        assert!(used.value >= 0.0);
        assert!(free.value >= 0.0);
    }

    #[tokio::test]
    async fn test_start_rejects_missing_path() {
        let mut probe = DiskProbe::new();
        probe
            .configure(&definition("path: /definitely/not/here"))
            .unwrap();

        let err = probe.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here"));
    }

    #[tokio::test]
    async fn test_start_rejects_non_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut probe = DiskProbe::new();
        probe
            .configure(&definition(&format!("path: {}", file.path().display())))
            .unwrap();

        let err = probe.start().await.unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
