use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_yaml::Value;

/// State shared by every probe and sink: a stable type tag, a display
/// name, a `kind:name` log scope, and a typed configuration that is
/// validated exactly once.
#[derive(Debug)]
pub struct ComponentCore<C> {
    kind: &'static str,
    name: String,
    scope: String,
    config: Option<C>,
}

impl<C: DeserializeOwned> ComponentCore<C> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            name: kind.to_string(),
            scope: format!("{kind}:{kind}"),
            config: None,
        }
    }

    /// Stable type tag, matching the registry name.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Display name. The type tag unless a definition renamed it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log scope in `kind:name` form.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Apply a definition: optional rename plus the opaque config blob.
    /// May only be called once per component.
    pub fn configure(&mut self, name: Option<&str>, config: &Value) -> Result<()> {
        if self.config.is_some() {
            bail!("{} is already configured", self.scope);
        }

        if let Some(name) = name {
            self.name = name.to_string();
            self.scope = format!("{}:{}", self.kind, self.name);
        }

        // A missing config section reads as an empty mapping so types
        // with all-defaulted fields accept it.
        let value = match config {
            Value::Null => Value::Mapping(serde_yaml::Mapping::new()),
            other => other.clone(),
        };

        let parsed: C = serde_yaml::from_value(value)
            .with_context(|| format!("invalid configuration for {}", self.scope))?;

        self.config = Some(parsed);
        Ok(())
    }

    /// The validated configuration. Errors before `configure` ran.
    pub fn config(&self) -> Result<&C> {
        self.config
            .as_ref()
            .with_context(|| format!("{} is not configured", self.scope))
    }
}
