//! Synchronous, in-process transformation pipeline.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s ending in exactly one
//! [`Sink`]. [`Pipeline::emit`] pushes one value through every stage in
//! declaration order before it returns; nothing is buffered between calls.

use std::fmt;

use tracing::{debug, warn};

/// Errors raised while pushing a value through the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("stage '{stage}' failed")]
    Stage {
        stage: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("sink '{sink}' failed")]
    Sink {
        sink: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl PipelineError {
    /// Name of the stage or sink that faulted.
    pub fn stage_name(&self) -> &str {
        match self {
            PipelineError::Stage { stage, .. } => stage,
            PipelineError::Sink { sink, .. } => sink,
        }
    }
}

/// Outcome of a successful [`Pipeline::emit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emitted {
    /// Every stage ran and the sink reported the value.
    Delivered,
    /// A stage produced no value; later stages and the sink were skipped.
    Dropped { stage: String },
}

/// One non-terminal unit of transformation.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Derive zero or one value from `value`.
    ///
    /// # Errors
    /// Implementations return an error to abort processing of this value.
    fn apply(&self, value: String) -> anyhow::Result<Option<String>>;
}

/// Terminal stage: consumes a value for its effect.
pub trait Sink: Send + Sync {
    fn name(&self) -> &str {
        "sink"
    }

    /// # Errors
    /// Implementations return an error when reporting fails.
    fn report(&self, value: &str) -> anyhow::Result<()>;
}

impl<F> Sink for F
where
    F: Fn(&str) -> anyhow::Result<()> + Send + Sync,
{
    fn report(&self, value: &str) -> anyhow::Result<()> {
        self(value)
    }
}

/// Stage built from a total mapping closure.
pub struct MapStage<F> {
    name: String,
    f: F,
}

impl<F> Stage for MapStage<F>
where
    F: Fn(String) -> anyhow::Result<String> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, value: String) -> anyhow::Result<Option<String>> {
        (self.f)(value).map(Some)
    }
}

/// Stage built from a closure that may drop the value.
pub struct FilterMapStage<F> {
    name: String,
    f: F,
}

impl<F> Stage for FilterMapStage<F>
where
    F: Fn(String) -> anyhow::Result<Option<String>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, value: String) -> anyhow::Result<Option<String>> {
        (self.f)(value)
    }
}

/// Builds a [`Pipeline`]. Calling [`PipelineBuilder::sink`] finishes it.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn map<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.stage(MapStage {
            name: name.into(),
            f,
        })
    }

    pub fn filter_map<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(String) -> anyhow::Result<Option<String>> + Send + Sync + 'static,
    {
        self.stage(FilterMapStage {
            name: name.into(),
            f,
        })
    }

    pub fn sink(self, sink: impl Sink + 'static) -> Pipeline {
        Pipeline {
            stages: self.stages,
            sink: Box::new(sink),
        }
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    sink: Box<dyn Sink>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("sink", &self.sink.name())
            .finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Stage names in execution order, sink last.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once(self.sink.name()))
            .collect()
    }

    /// Push `message` through every stage, then the sink.
    ///
    /// A faulting stage aborts the remaining stages for this message only.
    ///
    /// # Errors
    /// Returns [`PipelineError`] naming the stage or sink that failed.
    pub fn emit(&self, message: impl Into<String>) -> Result<Emitted, PipelineError> {
        let mut value = message.into();

        for stage in &self.stages {
            match stage.apply(value) {
                Ok(Some(next)) => value = next,
                Ok(None) => {
                    debug!(stage = stage.name(), "Stage dropped message");
                    return Ok(Emitted::Dropped {
                        stage: stage.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "Stage failed, message aborted");
                    return Err(PipelineError::Stage {
                        stage: stage.name().to_string(),
                        source: e.into(),
                    });
                }
            }
        }

        self.sink
            .report(&value)
            .map_err(|e| PipelineError::Sink {
                sink: self.sink.name().to_string(),
                source: e.into(),
            })?;

        Ok(Emitted::Delivered)
    }
}
