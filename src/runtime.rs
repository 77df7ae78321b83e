use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::WatchDefinition;
use crate::error::{InitErrors, ItemKind};
use crate::probe::{ProbeHandle, Probes};
use crate::registry;
use crate::sink::Sinks;

struct Inner {
    probes: Arc<Probes>,
    sinks: Arc<Sinks>,
    interval: Duration,
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The agent lifecycle: build components from a definition, run the
/// poll loop, shut everything down.
///
/// States move strictly forward: uninitialized, initialized, started,
/// stopped. A stopped runtime is terminal.
pub struct Runtime {
    inner: Option<Inner>,
    poll: Option<PollTask>,
    stopped: bool,
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            inner: None,
            poll: None,
            stopped: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.poll.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Build and configure every sink and probe from the definition.
    ///
    /// Each definition is processed even after a failure, so the error
    /// reports every bad entry with its list position at once. On any
    /// failure the runtime stays uninitialized.
    pub fn init(&mut self, definition: &WatchDefinition) -> Result<()> {
        if self.stopped {
            bail!("runtime is stopped and cannot be reused");
        }
        if self.inner.is_some() {
            bail!("runtime is already initialized");
        }

        let interval_ms = definition.config.poll_interval_millis()?;

        let mut errors = InitErrors::new();

        let mut sinks = Vec::with_capacity(definition.sinks.len());
        for (index, def) in definition.sinks.iter().enumerate() {
            let built = registry::create_sink(&def.sink).and_then(|mut sink| {
                sink.configure(def)?;
                Ok(sink)
            });
            match built {
                Ok(sink) => sinks.push(sink),
                Err(e) => errors.record(ItemKind::Sink, index, e),
            }
        }

        let mut probes = Vec::with_capacity(definition.probes.len());
        for (index, def) in definition.probes.iter().enumerate() {
            let built = registry::create_probe(&def.probe).and_then(|mut probe| {
                probe.configure(def)?;
                ProbeHandle::new(Arc::from(probe), def, &definition.dimensions)
            });
            match built {
                Ok(handle) => probes.push(handle),
                Err(e) => errors.record(ItemKind::Probe, index, e),
            }
        }

        errors.into_result()?;

        let sinks = Sinks::new(sinks)?;
        let probes = Probes::new(probes)?;

        info!(
            probes = probes.len(),
            sinks = sinks.len(),
            interval_ms,
            "runtime initialized",
        );

        self.inner = Some(Inner {
            probes: Arc::new(probes),
            sinks: Arc::new(sinks),
            interval: Duration::from_millis(interval_ms),
        });
        Ok(())
    }

    /// Start sinks then probes, take an immediate poll, and begin the
    /// periodic poll loop. A failure rolls back whatever started.
    pub async fn start(&mut self) -> Result<()> {
        if self.stopped {
            bail!("runtime is stopped and cannot be restarted");
        }
        if self.poll.is_some() {
            bail!("runtime is already started");
        }
        let inner = self
            .inner
            .as_ref()
            .context("runtime is not initialized")?;

        if let Err(e) = inner.sinks.start().await {
            inner.sinks.stop().await;
            return Err(e.context("starting sinks"));
        }

        if let Err(e) = inner.probes.start().await {
            // Best-effort rollback; stop failures are logged inside.
            inner.probes.stop().await;
            inner.sinks.stop().await;
            return Err(e.context("starting probes"));
        }

        inner.probes.poll(&inner.sinks);

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let probes = Arc::clone(&inner.probes);
        let sinks = Arc::clone(&inner.sinks);
        let period = inner.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately and is already covered by
            // the poll above.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        debug!("polling probes");
                        probes.poll(&sinks);
                    }
                }
            }
        });

        self.poll = Some(PollTask { cancel, handle });
        info!(interval = ?period, "runtime started");
        Ok(())
    }

    /// Cancel the poll loop and stop sinks then probes. A runtime that
    /// never started is left untouched; stopping twice is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(poll) = self.poll.take() else {
            return Ok(());
        };

        poll.cancel.cancel();
        let _ = poll.handle.await;

        if let Some(inner) = &self.inner {
            inner.sinks.stop().await;
            inner.probes.stop().await;
        }

        self.stopped = true;
        info!("runtime stopped");
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
