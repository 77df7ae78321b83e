use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tokio::net::TcpStream;
use tracing::debug;

use crate::component::ComponentCore;
use crate::config::duration::{self, DurationBounds, MILLISECOND, SECOND};
use crate::config::ProbeDefinition;
use crate::metric::Unit;
use crate::probe::{Probe, Reading};

pub const PING_LATENCY: &str = "PingLatencyMs";
pub const PING_REACHABLE: &str = "PingReachable";

fn default_port() -> u16 {
    443
}

#[derive(Debug, Default, Deserialize)]
pub struct PingOptions {
    /// Host to connect to.
    #[serde(default)]
    pub host: String,

    /// TCP port. Default: 443.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout. 100ms..=30s, default 5s. Bare numbers are
    /// milliseconds.
    #[serde(default)]
    pub timeout: Option<Value>,
}

/// TCP reachability: connect latency in milliseconds and a 0/1 gauge.
///
/// An unreachable target is a reading of 0, not a sample error, so an
/// endpoint being down never stops the poll loop.
pub struct PingProbe {
    core: ComponentCore<PingOptions>,
    target: String,
    timeout: Duration,
}

impl PingProbe {
    pub fn new() -> Self {
        Self {
            core: ComponentCore::new("ping"),
            target: String::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for PingProbe {
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
            .configure(definition.name.as_deref(), &definition.config)?;

        let options = self.core.config()?;
        if options.host.is_empty() {
            bail!("{} requires a host", self.core.scope());
        }

        let timeout_ms = match &options.timeout {
            Some(value) => duration::parse_millis(
                value,
                MILLISECOND,
                &DurationBounds::inclusive(100, 30 * SECOND),
            )
            .with_context(|| format!("{} timeout", self.core.scope()))?,
            None => 5 * SECOND,
        };

        self.target = format!("{}:{}", options.host, options.port);
        self.timeout = Duration::from_millis(timeout_ms);
        Ok(())
    }

    fn metrics(&self) -> Vec<(String, Unit)> {
        vec![
            (PING_LATENCY.to_string(), Unit::Milliseconds),
            (PING_REACHABLE.to_string(), Unit::None),
        ]
    }

    async fn sample(&self) -> Result<Vec<Reading>> {
        let started = Instant::now();
        let connected =
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await;

        match connected {
            Ok(Ok(_stream)) => {
                let latency = started.elapsed().as_secs_f64() * 1_000.0;
                Ok(vec![
                    Reading::new(PING_LATENCY, latency),
                    Reading::new(PING_REACHABLE, 1.0),
                ])
            }
            Ok(Err(e)) => {
                debug!(probe = %self.scope(), target = %self.target, error = %e, "connect failed");
                Ok(vec![Reading::new(PING_REACHABLE, 0.0)])
            }
            Err(_) => {
                debug!(probe = %self.scope(), target = %self.target, "connect timed out");
                Ok(vec![Reading::new(PING_REACHABLE, 0.0)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn definition(config: &str) -> ProbeDefinition {
        ProbeDefinition {
            probe: "ping".to_string(),
            name: None,
            publish: Vec::new(),
            dimensions: Default::default(),
            config: serde_yaml::from_str(config).unwrap(),
        }
    }

    #[test]
    fn test_host_is_required() {
        let mut probe = PingProbe::new();
        let err = probe.configure(&definition("port: 80")).unwrap_err();
        assert!(err.to_string().contains("requires a host"));
    }

    #[test]
    fn test_timeout_bounds() {
        let mut probe = PingProbe::new();
        let err = probe
            .configure(&definition("host: localhost\ntimeout: 5 min"))
            .unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn test_reachable_listener_reports_latency() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut probe = PingProbe::new();
        probe
            .configure(&definition(&format!("host: 127.0.0.1\nport: {port}")))
            .unwrap();

        let readings = probe.sample().await.unwrap();
        assert_eq!(readings.len(), 2);

        let reachable = readings.iter().find(|r| r.name == PING_REACHABLE).unwrap();
        assert_eq!(reachable.value, 1.0);

        let latency = readings.iter().find(|r| r.name == PING_LATENCY).unwrap();
        assert!(latency.value >= 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_target_is_a_zero_reading() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut probe = PingProbe::new();
        probe
            .configure(&definition(&format!(
                "host: 127.0.0.1\nport: {port}\ntimeout: 500"
            )))
            .unwrap();

        let readings = probe.sample().await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].name, PING_REACHABLE);
        assert_eq!(readings[0].value, 0.0);
    }
}
