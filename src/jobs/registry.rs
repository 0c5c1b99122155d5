use std::collections::HashMap;
use std::sync::Arc;

use crate::jobs::config::{JobConfig, keys};
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::tasks::{FileListSource, FileTransformPipeline};
use crate::jobs::types::{Source, TaskPipeline};

type SourceFactory = Box<dyn Fn(&JobConfig) -> JobResult<Box<dyn Source>> + Send + Sync>;
type PipelineFactory = Box<dyn Fn(&JobConfig) -> JobResult<Arc<dyn TaskPipeline>> + Send + Sync>;

/// Registry mapping `source.type` / `pipeline.type` to implementations
pub struct JobRegistry {
    sources: HashMap<String, SourceFactory>,
    pipelines: HashMap<String, PipelineFactory>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    /// Registry with the built-in file connectors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register_source::<FileListSource>()
            .register_pipeline::<FileTransformPipeline>();
        registry
    }

    pub fn register_source<T>(&mut self) -> &mut Self
    where
        T: Source + 'static,
    {
        self.register_source_with(T::source_type(), |config| {
            Ok(Box::new(T::from_config(config)?) as Box<dyn Source>)
        })
    }

    pub fn register_pipeline<T>(&mut self) -> &mut Self
    where
        T: TaskPipeline + 'static,
    {
        self.register_pipeline_with(T::pipeline_type(), |config| {
            Ok(Arc::new(T::from_config(config)?) as Arc<dyn TaskPipeline>)
        })
    }

    /// Register a source under `source_type` with a custom factory
    pub fn register_source_with<F>(&mut self, source_type: &str, factory: F) -> &mut Self
    where
        F: Fn(&JobConfig) -> JobResult<Box<dyn Source>> + Send + Sync + 'static,
    {
        self.sources.insert(source_type.to_string(), Box::new(factory));
        self
    }

    pub fn register_pipeline_with<F>(&mut self, pipeline_type: &str, factory: F) -> &mut Self
    where
        F: Fn(&JobConfig) -> JobResult<Arc<dyn TaskPipeline>> + Send + Sync + 'static,
    {
        self.pipelines.insert(pipeline_type.to_string(), Box::new(factory));
        self
    }

    pub fn create_source(&self, config: &JobConfig) -> JobResult<Box<dyn Source>> {
        let source_type = config.require(keys::SOURCE_TYPE)?;
        let factory = self.sources.get(source_type).ok_or_else(|| {
            JobError::config(keys::SOURCE_TYPE, format!("unknown source type '{}'", source_type))
        })?;
        factory(config)
    }

    pub fn create_pipeline(&self, config: &JobConfig) -> JobResult<Arc<dyn TaskPipeline>> {
        let pipeline_type = config.require(keys::PIPELINE_TYPE)?;
        let factory = self.pipelines.get(pipeline_type).ok_or_else(|| {
            JobError::config(
                keys::PIPELINE_TYPE,
                format!("unknown pipeline type '{}'", pipeline_type),
            )
        })?;
        factory(config)
    }

    pub fn source_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn pipeline_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
