use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::trace;

use crate::component::ComponentCore;
use crate::config::ProbeDefinition;
use crate::metric::Unit;
use crate::probe::{Probe, Reading};

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

fn default_replace() -> String {
    "$0".to_string()
}

/// One pattern/replace step. The replacement may reference capture
/// groups as `$0`..`$9`.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    pub pattern: String,

    #[serde(default = "default_replace")]
    pub replace: String,
}

/// A metric's extraction: a bare pattern, one step, or a chain of steps
/// where each step runs against the previous step's output.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExprSpec {
    Pattern(String),
    Step(StepSpec),
    Chain(Vec<StepSpec>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricSpec {
    pub name: String,

    #[serde(default)]
    pub unit: Unit,

    pub expr: ExprSpec,
}

#[derive(Debug, Default, Deserialize)]
pub struct PatternOptions {
    /// Text source: a file path, or an http(s) URL.
    #[serde(default)]
    pub source: String,

    /// Metrics to extract from the source.
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

struct CompiledMetric {
    name: String,
    unit: Unit,
    steps: Vec<(Regex, String)>,
}

/// Extracts numeric metrics from a text document with regex
/// pattern/replace chains. The known-metric set comes from the
/// definition, not the probe type.
pub struct PatternProbe {
    core: ComponentCore<PatternOptions>,
    source: String,
    compiled: Vec<CompiledMetric>,
    client: Option<reqwest::Client>,
}

impl PatternProbe {
    pub fn new() -> Self {
        Self {
            core: ComponentCore::new("pattern"),
            source: String::new(),
            compiled: Vec::new(),
            client: None,
        }
    }

    fn is_url(source: &str) -> bool {
        source.starts_with("http://") || source.starts_with("https://")
    }

    async fn fetch(&self) -> Result<String> {
        if Self::is_url(&self.source) {
            let client = self
                .client
                .as_ref()
                .with_context(|| format!("{} has no HTTP client", self.scope()))?;

            let response = client
                .get(&self.source)
                .send()
                .await
                .with_context(|| format!("fetching {}", self.source))?;

            let status = response.status();
            if !status.is_success() {
                bail!("{} returned {status}", self.source);
            }

            response
                .text()
                .await
                .with_context(|| format!("reading body from {}", self.source))
        } else {
            tokio::fs::read_to_string(&self.source)
                .await
                .with_context(|| format!("reading {}", self.source))
        }
    }

    /// Run one metric's steps over the source text. No match or an
    /// unparseable result yields NaN, which the polling layer drops.
    fn extract(&self, metric: &CompiledMetric, text: &str) -> f64 {
        let mut current = text.to_string();

        for (regex, replace) in &metric.steps {
            let caps = match regex.captures(&current) {
                Some(caps) => caps,
                None => {
                    trace!(
                        probe = %self.scope(),
                        metric = %metric.name,
                        pattern = %regex.as_str(),
                        "pattern did not match",
                    );
                    return f64::NAN;
                }
            };

            let mut next = String::new();
            caps.expand(replace, &mut next);
            current = next;
        }

        current.trim().parse().unwrap_or(f64::NAN)
    }
}

impl Default for PatternProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for PatternProbe {
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
        let scope = self.core.scope();

        if options.source.is_empty() {
            bail!("{scope} requires a source");
        }
        if options.metrics.is_empty() {
            bail!("{scope} requires at least one metric");
        }

        let mut compiled = Vec::with_capacity(options.metrics.len());
        for spec in &options.metrics {
            let steps: Vec<StepSpec> = match &spec.expr {
                ExprSpec::Pattern(pattern) => vec![StepSpec {
                    pattern: pattern.clone(),
                    replace: default_replace(),
                }],
                ExprSpec::Step(step) => vec![step.clone()],
                ExprSpec::Chain(steps) => steps.clone(),
            };

            if steps.is_empty() {
                bail!("{scope} metric {:?} has an empty expression chain", spec.name);
            }

            let mut regexes = Vec::with_capacity(steps.len());
            for step in steps {
                let regex = Regex::new(&step.pattern).with_context(|| {
                    format!("{scope} metric {:?} pattern {:?}", spec.name, step.pattern)
                })?;
                regexes.push((regex, step.replace));
            }

            compiled.push(CompiledMetric {
                name: spec.name.clone(),
                unit: spec.unit,
                steps: regexes,
            });
        }

        let source = options.source.clone();
        if Self::is_url(&source) {
            self.client = Some(
                reqwest::Client::builder()
                    .timeout(FETCH_TIMEOUT)
                    .build()
                    .context("building HTTP client")?,
            );
        }

        self.source = source;
        self.compiled = compiled;
        Ok(())
    }

    fn metrics(&self) -> Vec<(String, Unit)> {
        self.compiled
            .iter()
            .map(|m| (m.name.clone(), m.unit))
            .collect()
    }

    /// Verifies the source is readable before polling begins.
    async fn start(&self) -> Result<()> {
        self.fetch()
            .await
            .with_context(|| format!("{} source check failed", self.scope()))?;
        Ok(())
    }

    async fn sample(&self) -> Result<Vec<Reading>> {
        let text = self.fetch().await?;

        Ok(self
            .compiled
            .iter()
            .map(|metric| Reading::new(metric.name.clone(), self.extract(metric, &text)))
            .collect())
    }
}
