use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_yaml::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::component::ComponentCore;
use crate::config::duration::{self, DurationBounds, MILLISECOND, SECOND};
use crate::config::SinkDefinition;
use crate::metric::{now_millis, Metric};
use crate::sink::Sink;

/// Largest value magnitude the metrics backend accepts.
const MAX_VALUE_MAGNITUDE: f64 = 8.515_920e37;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn default_buffer_size() -> usize {
    100
}

fn default_batch_size() -> usize {
    500
}

/// Raw configuration for the HTTP sink. Durations stay as YAML values
/// so the duration grammar applies.
#[derive(Debug, Deserialize)]
pub struct HttpOptions {
    /// Endpoint to POST metric batches to.
    #[serde(default)]
    pub endpoint: String,

    /// Additional request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Buffered metrics that trigger an immediate flush. 1..=500,
    /// default 100.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Maximum metrics per request. 1..=500, default 500.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a failed metric stays eligible for retry. 1s..=300s,
    /// default 120s. Bare numbers are milliseconds.
    #[serde(default)]
    pub retry_threshold: Option<Value>,

    /// Debounce delay before a partial buffer is flushed. 10s..=120s,
    /// default 30s. Bare numbers are milliseconds.
    #[serde(default)]
    pub interval: Option<Value>,

    /// Log batches instead of sending them.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            headers: HashMap::new(),
            buffer_size: default_buffer_size(),
            batch_size: default_batch_size(),
            retry_threshold: None,
            interval: None,
            dry_run: false,
        }
    }
}

/// Validated settings derived from `HttpOptions`.
#[derive(Debug, Clone)]
struct Settings {
    endpoint: String,
    buffer_size: usize,
    batch_size: usize,
    retry_threshold_ms: u64,
    interval_ms: u64,
    dry_run: bool,
}

impl Settings {
    fn from_options(options: &HttpOptions, scope: &str) -> Result<Self> {
        if options.endpoint.is_empty() && !options.dry_run {
            bail!("{scope} requires an endpoint");
        }
        if options.buffer_size < 1 || options.buffer_size > 500 {
            bail!("{scope} buffer_size must be between 1 and 500");
        }
        if options.batch_size < 1 || options.batch_size > 500 {
            bail!("{scope} batch_size must be between 1 and 500");
        }

        let retry_threshold_ms = match &options.retry_threshold {
            Some(value) => duration::parse_millis(
                value,
                MILLISECOND,
                &DurationBounds::inclusive(SECOND, 300 * SECOND),
            )
            .with_context(|| format!("{scope} retry_threshold"))?,
            None => 120 * SECOND,
        };

        let interval_ms = match &options.interval {
            Some(value) => duration::parse_millis(
                value,
                MILLISECOND,
                &DurationBounds::inclusive(10 * SECOND, 120 * SECOND),
            )
            .with_context(|| format!("{scope} interval"))?,
            None => 30 * SECOND,
        };

        Ok(Self {
            endpoint: options.endpoint.clone(),
            buffer_size: options.buffer_size,
            batch_size: options.batch_size,
            retry_threshold_ms,
            interval_ms,
            dry_run: options.dry_run,
        })
    }
}

/// The wire call, separated so buffering and retry logic can be tested
/// without a network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver one batch.
    async fn send(&self, endpoint: &str, batch: &[Metric]) -> Result<()>;

    /// Verify the endpoint is reachable.
    async fn preflight(&self, endpoint: &str) -> Result<()>;
}

/// Real transport: JSON POST via reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
    headers: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new(headers: HashMap<String, String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client, headers })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, batch: &[Metric]) -> Result<()> {
        let mut request = self.client.post(endpoint).json(batch);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("posting batch to {endpoint}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{endpoint} returned {status}");
        }
        Ok(())
    }

    async fn preflight(&self, endpoint: &str) -> Result<()> {
        // Any HTTP response means the endpoint is reachable.
        self.client
            .head(endpoint)
            .send()
            .await
            .with_context(|| format!("endpoint {endpoint} is unreachable"))?;
        Ok(())
    }
}

struct Shared {
    settings: Settings,
    transport: Arc<dyn Transport>,
    buffer: Mutex<VecDeque<Metric>>,
    /// The pending debounce timer, if any. At most one exists.
    timer: Mutex<Option<JoinHandle<()>>>,
    scope: String,
}

impl Shared {
    async fn disarm_timer(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }

    /// Drain the buffer in batches. Entries from a failed batch that are
    /// still inside the retry window are collected aside and re-inserted
    /// only after the drain finishes, so one flush never re-attempts the
    /// same entry.
    async fn flush(self: &Arc<Self>) {
        self.disarm_timer().await;

        let mut requeue: Vec<Metric> = Vec::new();

        loop {
            let batch: Vec<Metric> = {
                let mut buffer = self.buffer.lock().await;
                let take = self.settings.batch_size.min(buffer.len());
                buffer.drain(..take).collect()
            };

            if batch.is_empty() {
                break;
            }

            if self.settings.dry_run {
                info!(
                    sink = %self.scope,
                    count = batch.len(),
                    "dry run, discarding batch",
                );
                continue;
            }

            match self
                .transport
                .send(&self.settings.endpoint, &batch)
                .await
            {
                Ok(()) => {
                    debug!(sink = %self.scope, count = batch.len(), "batch delivered");
                }
                Err(e) => {
                    warn!(
                        sink = %self.scope,
                        count = batch.len(),
                        error = %e,
                        "batch delivery failed",
                    );

                    let cutoff = now_millis() - self.settings.retry_threshold_ms as i64;
                    let before = batch.len();
                    let retained: Vec<Metric> = batch
                        .into_iter()
                        .filter(|m| m.timestamp >= cutoff)
                        .collect();

                    let expired = before - retained.len();
                    if expired > 0 {
                        warn!(
                            sink = %self.scope,
                            count = expired,
                            "dropping metrics past the retry window",
                        );
                    }

                    requeue.extend(retained);
                }
            }
        }

        if !requeue.is_empty() {
            debug!(sink = %self.scope, count = requeue.len(), "requeueing for retry");
            let mut buffer = self.buffer.lock().await;
            buffer.extend(requeue);
        }
    }
}

/// Buffered, batched, retrying delivery to an HTTP metrics backend.
///
/// Metrics accumulate in a buffer; hitting the buffer limit flushes
/// immediately, otherwise a debounced one-shot timer flushes a partial
/// buffer after the configured interval.
pub struct HttpSink {
    core: ComponentCore<HttpOptions>,
    override_transport: Option<Arc<dyn Transport>>,
    shared: Option<Arc<Shared>>,
}

impl HttpSink {
    pub fn new() -> Self {
        Self {
            core: ComponentCore::new("http"),
            override_transport: None,
            shared: None,
        }
    }

    /// Use a caller-supplied transport instead of the real HTTP client.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            core: ComponentCore::new("http"),
            override_transport: Some(transport),
            shared: None,
        }
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.shared
            .as_ref()
            .with_context(|| format!("{} is not configured", self.core.scope()))
    }
}

impl Default for HttpSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for HttpSink {
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

        let options = self.core.config()?;
        let settings = Settings::from_options(options, self.core.scope())?;
        let headers = options.headers.clone();

        let transport: Arc<dyn Transport> = match &self.override_transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new(headers)?),
        };

        self.shared = Some(Arc::new(Shared {
            settings,
            transport,
            buffer: Mutex::new(VecDeque::new()),
            timer: Mutex::new(None),
            scope: self.core.scope().to_string(),
        }));

        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let shared = self.shared()?;
        if shared.settings.dry_run {
            return Ok(());
        }

        shared
            .transport
            .preflight(&shared.settings.endpoint)
            .await
            .with_context(|| format!("{} preflight failed", self.scope()))
    }

    async fn stop(&self) -> Result<()> {
        let shared = self.shared()?;
        shared.flush().await;
        Ok(())
    }

    async fn deliver(&self, metric: &Metric) -> Result<()> {
        let shared = self.shared()?;

        if !metric.value.is_finite() || metric.value.abs() > MAX_VALUE_MAGNITUDE {
            warn!(
                sink = %shared.scope,
                metric = %metric.name,
                value = metric.value,
                "dropping value the backend cannot represent",
            );
            return Ok(());
        }

        let len = {
            let mut buffer = shared.buffer.lock().await;
            buffer.push_back(metric.clone());
            buffer.len()
        };

        if len >= shared.settings.buffer_size {
            // Full buffer pre-empts the debounce timer.
            shared.disarm_timer().await;
            let shared = Arc::clone(shared);
            tokio::spawn(async move {
                shared.flush().await;
            });
            return Ok(());
        }

        // Arm the debounce timer only if none is pending.
        let mut timer = shared.timer.lock().await;
        if timer.is_none() {
            let shared_for_timer = Arc::clone(shared);
            let interval = Duration::from_millis(shared.settings.interval_ms);
            *timer = Some(tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                // Clear the slot without aborting: the handle in it is
                // this task's own, and the flush must outlive it.
                shared_for_timer.timer.lock().await.take();
                shared_for_timer.flush().await;
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    use crate::metric::Unit;

    /// Records batches; fails while `fail` is set.
    struct FakeTransport {
        fail: AtomicBool,
        batches: StdMutex<Vec<Vec<Metric>>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(false),
                batches: StdMutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<Vec<Metric>> {
            self.batches.lock().unwrap().clone()
        }

        fn sent_names(&self) -> Vec<String> {
            self.sent()
                .into_iter()
                .flatten()
                .map(|m| m.name)
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, _endpoint: &str, batch: &[Metric]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("backend unavailable");
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }

        async fn preflight(&self, _endpoint: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("backend unavailable");
            }
            Ok(())
        }
    }

    fn definition(config: &str) -> SinkDefinition {
        SinkDefinition {
            sink: "http".to_string(),
            name: None,
            config: serde_yaml::from_str(config).unwrap(),
        }
    }

    fn sink_with(transport: Arc<FakeTransport>, config: &str) -> HttpSink {
        let mut sink = HttpSink::with_transport(transport);
        sink.configure(&definition(config)).unwrap();
        sink
    }

    fn metric(name: &str, value: f64) -> Metric {
        Metric::new(name, Unit::Count, value, now_millis(), BTreeMap::new())
    }

    async fn wait_for_batches(transport: &Arc<FakeTransport>, count: usize) {
        for _ in 0..200 {
            if transport.sent().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transport never saw {count} batches");
    }

    #[test]
    fn test_default_settings() {
        let options = HttpOptions {
            endpoint: "http://localhost:9000/metrics".to_string(),
            ..Default::default()
        };
        let settings = Settings::from_options(&options, "http:http").unwrap();

        assert_eq!(settings.buffer_size, 100);
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.retry_threshold_ms, 120_000);
        assert_eq!(settings.interval_ms, 30_000);
        assert!(!settings.dry_run);
    }

    #[test]
    fn test_configuration_bounds() {
        let transport = FakeTransport::new();

        let mut sink = HttpSink::with_transport(transport.clone());
        let err = sink
            .configure(&definition("endpoint: http://x\nbuffer_size: 0"))
            .unwrap_err();
        assert!(err.to_string().contains("buffer_size"));

        let mut sink = HttpSink::with_transport(transport.clone());
        let err = sink
            .configure(&definition("endpoint: http://x\nbatch_size: 501"))
            .unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        let mut sink = HttpSink::with_transport(transport.clone());
        let err = sink
            .configure(&definition("endpoint: http://x\nretry_threshold: 10 min"))
            .unwrap_err();
        assert!(err.to_string().contains("retry_threshold"));

        let mut sink = HttpSink::with_transport(transport.clone());
        let err = sink
            .configure(&definition("endpoint: http://x\ninterval: 5s"))
            .unwrap_err();
        assert!(err.to_string().contains("interval"));
    }

    #[test]
    fn test_endpoint_required_unless_dry_run() {
        let transport = FakeTransport::new();

        let mut sink = HttpSink::with_transport(transport.clone());
        let err = sink.configure(&definition("buffer_size: 10")).unwrap_err();
        assert!(err.to_string().contains("endpoint"));

        let mut sink = HttpSink::with_transport(transport);
        sink.configure(&definition("dry_run: true")).unwrap();
    }

    #[tokio::test]
    async fn test_deliver_before_configure_fails() {
        let sink = HttpSink::with_transport(FakeTransport::new());
        let err = sink.deliver(&metric("A", 1.0)).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[tokio::test]
    async fn test_full_buffer_flushes_immediately() {
        let transport = FakeTransport::new();
        let sink = sink_with(
            Arc::clone(&transport),
            "endpoint: http://x\nbuffer_size: 3",
        );

        sink.deliver(&metric("A", 1.0)).await.unwrap();
        sink.deliver(&metric("B", 2.0)).await.unwrap();
        sink.deliver(&metric("C", 3.0)).await.unwrap();

        wait_for_batches(&transport, 1).await;
        assert_eq!(transport.sent_names(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_partial_buffer_waits_for_timer() {
        let transport = FakeTransport::new();
        let sink = sink_with(
            Arc::clone(&transport),
            "endpoint: http://x\nbuffer_size: 3",
        );

        sink.deliver(&metric("A", 1.0)).await.unwrap();
        sink.deliver(&metric("B", 2.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_timer_flushes_partial_buffer() {
        let transport = FakeTransport::new();
        let sink = sink_with(
            Arc::clone(&transport),
            "endpoint: http://x\nbuffer_size: 100\ninterval: 10s",
        );

        sink.deliver(&metric("A", 1.0)).await.unwrap();

        // Paused time advances past the 10s debounce while idle.
        tokio::time::sleep(Duration::from_secs(11)).await;

        wait_for_batches(&transport, 1).await;
        assert_eq!(transport.sent_names(), vec!["A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flush_survives_a_slow_send() {
        /// Records batches only after yielding, the way a real network
        /// send does.
        struct SlowTransport {
            batches: StdMutex<Vec<Vec<Metric>>>,
        }

        #[async_trait]
        impl Transport for SlowTransport {
            async fn send(&self, _endpoint: &str, batch: &[Metric]) -> Result<()> {
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.batches.lock().unwrap().push(batch.to_vec());
                Ok(())
            }

            async fn preflight(&self, _endpoint: &str) -> Result<()> {
                Ok(())
            }
        }

        let transport = Arc::new(SlowTransport {
            batches: StdMutex::new(Vec::new()),
        });
        let mut sink = HttpSink::with_transport(transport.clone());
        sink.configure(&definition(
            "endpoint: http://x\nbuffer_size: 100\ninterval: 10s",
        ))
        .unwrap();

        sink.deliver(&metric("A", 1.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;

        for _ in 0..200 {
            if !transport.batches.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let batches = transport.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].name, "A");
    }

    #[tokio::test]
    async fn test_batches_split_at_batch_size() {
        let transport = FakeTransport::new();
        let sink = sink_with(
            Arc::clone(&transport),
            "endpoint: http://x\nbuffer_size: 500\nbatch_size: 2",
        );

        for name in ["A", "B", "C", "D", "E"] {
            sink.deliver(&metric(name, 1.0)).await.unwrap();
        }
        sink.stop().await.unwrap();

        let batches = transport.sent();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }

    #[tokio::test]
    async fn test_retry_window_keeps_fresh_drops_stale() {
        let transport = FakeTransport::new();
        let sink = sink_with(
            Arc::clone(&transport),
            "endpoint: http://x\nbuffer_size: 100\nretry_threshold: 60s",
        );

        let mut stale = metric("Stale", 1.0);
        stale.timestamp = now_millis() - 120_000;
        let fresh = metric("Fresh", 2.0);

        sink.deliver(&stale).await.unwrap();
        sink.deliver(&fresh).await.unwrap();

        // First flush fails; only the fresh entry is requeued.
        transport.fail.store(true, Ordering::SeqCst);
        sink.stop().await.unwrap();
        assert!(transport.sent().is_empty());

        // Second flush succeeds and carries only the fresh entry.
        transport.fail.store(false, Ordering::SeqCst);
        sink.stop().await.unwrap();
        assert_eq!(transport.sent_names(), vec!["Fresh"]);
    }

    #[tokio::test]
    async fn test_dry_run_discards_without_sending() {
        let transport = FakeTransport::new();
        let sink = sink_with(Arc::clone(&transport), "dry_run: true\nbuffer_size: 2");

        sink.deliver(&metric("A", 1.0)).await.unwrap();
        sink.deliver(&metric("B", 2.0)).await.unwrap();
        sink.stop().await.unwrap();

        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_unrepresentable_values_are_dropped() {
        let transport = FakeTransport::new();
        let sink = sink_with(Arc::clone(&transport), "endpoint: http://x");

        sink.deliver(&metric("NaN", f64::NAN)).await.unwrap();
        sink.deliver(&metric("Inf", f64::INFINITY)).await.unwrap();
        sink.deliver(&metric("Huge", 1e38)).await.unwrap();
        sink.stop().await.unwrap();

        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn test_stop_flushes_remaining_buffer() {
        let transport = FakeTransport::new();
        let sink = sink_with(Arc::clone(&transport), "endpoint: http://x");

        sink.deliver(&metric("A", 1.0)).await.unwrap();
        sink.stop().await.unwrap();

        assert_eq!(transport.sent_names(), vec!["A"]);
    }

    #[tokio::test]
    async fn test_start_preflight_failure_surfaces() {
        let transport = FakeTransport::new();
        transport.fail.store(true, Ordering::SeqCst);
        let sink = sink_with(Arc::clone(&transport), "endpoint: http://x");

        let err = sink.start().await.unwrap_err();
        assert!(err.to_string().contains("preflight failed"));
    }

    #[tokio::test]
    async fn test_dry_run_skips_preflight() {
        let transport = FakeTransport::new();
        transport.fail.store(true, Ordering::SeqCst);
        let sink = sink_with(Arc::clone(&transport), "dry_run: true");

        sink.start().await.unwrap();
    }
}
