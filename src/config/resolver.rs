use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_yaml::{Mapping, Value};
use tokio::sync::Mutex;

/// Valid variable names: word characters and dashes.
static VAR_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w-]+$").unwrap());

/// A string that is exactly one `${...}` expression.
static EXACT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\$\{([^}]+)\}$").unwrap());

/// Any embedded `${...}` expression.
static EMBEDDED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// A `type: rest` coercion chain inside an expression. The type may
/// contain dashes (`ec2-metadata`).
static PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^([\w-]+)[\t ]*:[\t ]*(.+)$").unwrap());

const EC2_METADATA_BASE: &str = "http://169.254.169.254/latest/meta-data";
const EC2_METADATA_TIMEOUT: Duration = Duration::from_secs(2);

/// Instance metadata cache, one fetch per key for the process lifetime.
static EC2_CACHE: Lazy<Mutex<HashMap<String, String>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Resolves `${...}` variable expressions inside YAML value trees.
///
/// Variable names are case-insensitive. A string that is exactly one
/// expression resolves to the raw typed value; expressions embedded in a
/// longer string are spliced in as text. Expressions may be coercion
/// chains (`bool:`, `num:`, `env:`, `ec2-metadata:`).
pub struct Resolver {
    vars: HashMap<String, Value>,
    env: HashMap<String, String>,
}

impl Resolver {
    /// A resolver over the process environment, pre-seeded with `hostname`.
    pub fn new() -> Self {
        let mut resolver = Self::with_env(std::env::vars());

        if let Some(hostname) = sysinfo::System::host_name() {
            // Name is ours, cannot fail validation.
            let _ = resolver.set_variable("hostname", Value::String(hostname));
        }

        resolver
    }

    /// A resolver over an explicit environment snapshot.
    pub fn with_env(env: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: HashMap::new(),
            env: env
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    /// Register a variable. Names must match `[\w-]+` and are stored
    /// case-insensitively; re-registering overwrites.
    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<()> {
        if !VAR_NAME.is_match(name) {
            bail!("invalid variable name: {name:?}");
        }
        self.vars.insert(name.to_lowercase(), value);
        Ok(())
    }

    /// Resolve every expression in a value tree.
    pub async fn resolve(&self, value: Value) -> Result<Value> {
        self.resolve_value(value).await
    }

    /// Resolve a variables mapping in declaration order: each entry is
    /// registered before the next is processed, so later entries may
    /// reference earlier ones but not the other way around.
    pub async fn declare(&mut self, variables: Mapping) -> Result<()> {
        for (key, value) in variables {
            let name = key
                .as_str()
                .with_context(|| format!("variable name is not a string: {key:?}"))?
                .to_string();

            let resolved = self
                .resolve_value(value)
                .await
                .with_context(|| format!("resolving variable {name:?}"))?;

            self.set_variable(&name, resolved)?;
        }
        Ok(())
    }

    fn resolve_value<'a>(
        &'a self,
        value: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            match value {
                Value::String(s) => self.resolve_string(&s).await,
                Value::Sequence(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.resolve_value(item).await?);
                    }
                    Ok(Value::Sequence(out))
                }
                Value::Mapping(map) => {
                    let mut out = Mapping::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key, self.resolve_value(item).await?);
                    }
                    Ok(Value::Mapping(out))
                }
                other => Ok(other),
            }
        })
    }

    async fn resolve_string(&self, input: &str) -> Result<Value> {
        // An exact expression yields the raw typed value.
        if let Some(caps) = EXACT.captures(input) {
            return self.resolve_expression(&caps[1]).await;
        }

        if !EMBEDDED.is_match(input) {
            return Ok(Value::String(input.to_string()));
        }

        // Embedded expressions are spliced in as text.
        let mut out = String::with_capacity(input.len());
        let mut last = 0;
        for caps in EMBEDDED.captures_iter(input) {
            let whole = caps.get(0).context("placeholder match without range")?;
            out.push_str(&input[last..whole.start()]);

            let resolved = self.resolve_expression(&caps[1]).await?;
            out.push_str(&stringify(&resolved)?);

            last = whole.end();
        }
        out.push_str(&input[last..]);

        Ok(Value::String(out))
    }

    fn resolve_expression<'a>(
        &'a self,
        expr: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        Box::pin(async move {
            let expr = expr.trim();

            if let Some(caps) = PREFIX.captures(expr) {
                let prefix = caps[1].to_lowercase();
                let rest = caps[2].to_string();

                // The rest of a coercion chain is itself an expression:
                // a variable name, or a further chain.
                return match prefix.as_str() {
                    "bool" | "boolean" => {
                        let inner = self.resolve_expression(rest.trim()).await?;
                        coerce_bool(&inner, expr)
                    }
                    "num" | "number" => {
                        let inner = self.resolve_expression(rest.trim()).await?;
                        coerce_number(&inner, expr)
                    }
                    "env" => {
                        let key = rest.trim().to_lowercase();
                        match self.env.get(&key) {
                            Some(value) => Ok(Value::String(value.clone())),
                            None => bail!(
                                "environment variable {:?} is not set (in ${{{expr}}})",
                                rest.trim()
                            ),
                        }
                    }
                    "ec2-metadata" => {
                        let value = fetch_ec2_metadata(rest.trim())
                            .await
                            .with_context(|| format!("resolving ${{{expr}}}"))?;
                        Ok(Value::String(value))
                    }
                    _ => bail!("unknown expression type {prefix:?} in ${{{expr}}}"),
                };
            }

            match self.vars.get(&expr.to_lowercase()) {
                // Stored values may themselves contain expressions.
                Some(value) => self.resolve_value(value.clone()).await,
                None => bail!("unknown variable {expr:?} in ${{{expr}}}"),
            }
        })
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Text form of a resolved value for splicing into a longer string.
fn stringify(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok("null".to_string()),
        composite => {
            serde_json::to_string(composite).context("serializing composite value into a string")
        }
    }
}

fn coerce_bool(value: &Value, expr: &str) -> Result<Value> {
    match value {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if trimmed.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                bail!("cannot coerce {s:?} to a boolean (in ${{{expr}}})")
            }
        }
        other => bail!("cannot coerce {other:?} to a boolean (in ${{{expr}}})"),
    }
}

fn coerce_number(value: &Value, expr: &str) -> Result<Value> {
    let number = match value {
        Value::Number(_) => return Ok(value.clone()),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => {
            let parsed: f64 = s
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("cannot coerce {s:?} to a number (in ${{{expr}}})"))?;
            if parsed.is_nan() {
                bail!("cannot coerce {s:?} to a number (in ${{{expr}}})");
            }
            parsed
        }
        other => bail!("cannot coerce {other:?} to a number (in ${{{expr}}})"),
    };

    // Integral results stay integers so downstream integer fields accept them.
    if number.fract() == 0.0 && number.abs() <= i64::MAX as f64 {
        Ok(Value::from(number as i64))
    } else {
        Ok(Value::from(number))
    }
}

/// Fetch one instance metadata key, caching the result for the process
/// lifetime.
async fn fetch_ec2_metadata(key: &str) -> Result<String> {
    let mut cache = EC2_CACHE.lock().await;
    if let Some(value) = cache.get(key) {
        return Ok(value.clone());
    }

    let client = reqwest::Client::builder()
        .timeout(EC2_METADATA_TIMEOUT)
        .build()
        .context("building instance metadata client")?;

    let url = format!("{EC2_METADATA_BASE}/{key}");
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("fetching instance metadata from {url}"))?;

    if !response.status().is_success() {
        bail!(
            "instance metadata request for {key:?} returned {}",
            response.status()
        );
    }

    let body = response
        .text()
        .await
        .with_context(|| format!("reading instance metadata for {key:?}"))?;

    cache.insert(key.to_string(), body.clone());
    Ok(body)
}
