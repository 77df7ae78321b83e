use std::fmt;

use thiserror::Error;

/// Which definition list a failed item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Probe,
    Sink,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Probe => "probes",
            ItemKind::Sink => "sinks",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed probe or sink definition, identified by list position.
#[derive(Debug)]
pub struct InitFailure {
    pub kind: ItemKind,
    pub index: usize,
    pub error: anyhow::Error,
}

/// Aggregate of every definition that failed during initialization.
///
/// Initialization processes all definitions before reporting, so one bad
/// probe does not mask a bad sink further down the document.
#[derive(Debug, Error)]
pub struct InitErrors {
    pub failures: Vec<InitFailure>,
}

impl InitErrors {
    pub fn new() -> Self {
        Self {
            failures: Vec::new(),
        }
    }

    /// Record a failure against a list position.
    pub fn record(&mut self, kind: ItemKind, index: usize, error: anyhow::Error) {
        self.failures.push(InitFailure { kind, index, error });
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ok if nothing was recorded, otherwise the aggregate itself.
    pub fn into_result(self) -> Result<(), InitErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl Default for InitErrors {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InitErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} definition(s) failed to initialize:", self.failures.len())?;
        for failure in &self.failures {
            write!(
                f,
                "\n  {}[{}]: {:#}",
                failure.kind, failure.index, failure.error
            )?;
        }
        Ok(())
    }
}
