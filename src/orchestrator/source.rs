// Measurement source interface
// Anything that can produce records for one domain plugs in here

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::model::{Category, MeasurementRecord};

/// Failure of one source; never fatal to a collection run
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("probe '{probe}' failed: {reason}")]
    Probe { probe: String, reason: String },

    #[error("source timed out after {0:?}")]
    Timeout(Duration),

    #[error("source task aborted: {0}")]
    Aborted(String),

    #[error("misconfigured source: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn probe(probe: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Probe {
            probe: probe.into(),
            reason: reason.to_string(),
        }
    }
}

/// Producer of measurement records for one domain.
///
/// A disabled source is skipped by the orchestrator and contributes an
/// empty domain; it must not report an error for being disabled.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    fn name(&self) -> &str;

    fn category(&self) -> Category;

    fn is_enabled(&self) -> bool {
        true
    }

    async fn measure(&self) -> Result<Vec<MeasurementRecord>, SourceError>;
}

/// Source backed by an async closure
pub struct FnSource<F> {
    name: String,
    category: Category,
    enabled: bool,
    run: F,
}

impl<F, Fut> FnSource<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<MeasurementRecord>, SourceError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, category: Category, run: F) -> Self {
        Self {
            name: name.into(),
            category,
            enabled: true,
            run,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[async_trait]
impl<F, Fut> MeasurementSource for FnSource<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<MeasurementRecord>, SourceError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> Category {
        self.category
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn measure(&self) -> Result<Vec<MeasurementRecord>, SourceError> {
        (self.run)().await
    }
}
