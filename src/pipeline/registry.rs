//! Registry of named pipelines

use std::collections::HashMap;
use tracing::info;

use crate::pipeline::{Context, Pipeline, RunSummary};
use crate::types::*;

/// Holds pipelines by name and runs them against fresh contexts
#[derive(Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Pipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline, replacing any previous one of the same name
    pub fn register(&mut self, pipeline: Pipeline) {
        info!(pipeline = %pipeline.name(), "Registered pipeline");
        self.pipelines.insert(pipeline.name().to_string(), pipeline);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.pipelines.remove(name).is_some();
        if removed {
            info!(pipeline = %name, "Unregistered pipeline");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(name)
    }

    /// Registered pipeline names, sorted
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run a registered pipeline on a new context
    ///
    /// The context's task name is the pipeline name and its task type comes
    /// from the pipeline configuration.
    pub fn execute_pipeline(
        &mut self,
        name: &str,
        data: Frame,
        auxiliary: HashMap<String, Frame>,
        variables: HashMap<String, Scalar>,
    ) -> PipelineResult<RunSummary> {
        let pipeline = self
            .pipelines
            .get_mut(name)
            .ok_or_else(|| PipelineError::PipelineNotFound(name.to_string()))?;

        let mut context = Context::with_data(data, name, pipeline.config.task_type.clone());
        for (aux_name, frame) in auxiliary {
            context.add_auxiliary_data(aux_name, frame);
        }
        for (var_name, value) in variables {
            context.set_variable(var_name, value);
        }

        Ok(pipeline.execute(context))
    }
}
