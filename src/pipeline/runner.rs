//! Pipeline: an ordered, named list of steps run against one context

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::pipeline::{invoke_step, Context, StepResult};
use crate::traits::*;
use crate::types::*;

/// Pipeline run configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub description: String,
    /// Task kind given to contexts created for this pipeline
    pub task_type: String,
    /// Stop at the first failed step
    pub stop_on_error: bool,
}

impl PipelineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            task_type: "transform".to_string(),
            stop_on_error: true,
        }
    }
}

/// Outcome of one past run, kept for statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub success: bool,
    pub duration_secs: f64,
}

/// Execution statistics of a pipeline instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatistics {
    pub total_executions: usize,
    pub last_execution: Option<RunRecord>,
    pub history: Vec<RunRecord>,
    pub total_steps: usize,
    pub step_names: Vec<String>,
}

/// Summary of one pipeline run
///
/// `success` is true iff no executed step failed. Steps never attempted
/// because of an early stop do not appear in `results`.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub pipeline: String,
    pub run_id: Uuid,
    pub success: bool,
    pub total_steps: usize,
    pub executed_steps: usize,
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub skipped_steps: usize,
    pub results: Vec<StepResult>,
    pub start_time: DateTime<Local>,
    pub end_time: DateTime<Local>,
    pub duration_secs: f64,
    pub context_summary: ContextSummary,
    /// The context after the last executed step
    #[serde(skip)]
    pub context: Context,
}

impl RunSummary {
    /// Names of the steps attempted in this run, in order
    pub fn executed_step_names(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.step_name.as_str()).collect()
    }

    pub fn result(&self, step_name: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_name == step_name)
    }

    /// JSON view of the summary, without the context itself
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Human-readable report of counts and per-step outcomes
    pub fn render(&self) -> String {
        let mut out = String::new();
        let verdict = if self.success { "SUCCESS" } else { "FAILED" };
        let _ = writeln!(out, "Pipeline {} [{}] {}", self.pipeline, self.run_id, verdict);
        let _ = writeln!(
            out,
            "  steps: {} total, {} executed, {} succeeded, {} failed, {} skipped",
            self.total_steps,
            self.executed_steps,
            self.successful_steps,
            self.failed_steps,
            self.skipped_steps
        );
        let _ = writeln!(out, "  duration: {:.3}s", self.duration_secs);
        for result in &self.results {
            let _ = writeln!(
                out,
                "  - {:<32} {:<8} {:.3}s  {}",
                result.step_name, result.status, result.duration_secs, result.message
            );
        }
        for warning in self.context.warnings() {
            let _ = writeln!(out, "  warning: {}", warning);
        }
        for err in self.context.errors() {
            let _ = writeln!(out, "  error: {}", err);
        }
        out
    }
}

/// Ordered list of uniquely named steps
pub struct Pipeline {
    pub config: PipelineConfig,
    steps: Vec<Box<dyn Step>>,
    validator: Box<dyn StepNameValidator>,
    history: Vec<RunRecord>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            steps: Vec::new(),
            validator: Box::new(DefaultStepNameValidator),
            history: Vec::new(),
        }
    }

    /// Create an empty pipeline with a custom step-name validator
    pub fn with_validator(config: PipelineConfig, validator: Box<dyn StepNameValidator>) -> Self {
        Self {
            validator,
            ..Self::new(config)
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Append a step; its name must be unique within the pipeline
    pub fn add_step<S: Step + 'static>(&mut self, step: S) -> PipelineResult<&mut Self> {
        self.add_boxed_step(Box::new(step))
    }

    pub fn add_boxed_step(&mut self, step: Box<dyn Step>) -> PipelineResult<&mut Self> {
        self.validator.validate_step_name(step.name())?;
        if self.position(step.name()).is_some() {
            return Err(PipelineError::DuplicateStep(step.name().to_string()));
        }
        debug!(pipeline = %self.config.name, step = %step.name(), "Added step");
        self.steps.push(step);
        Ok(self)
    }

    /// Append several steps in order
    ///
    /// Stops at the first rejected name; steps before it stay added.
    pub fn add_steps(&mut self, steps: Vec<Box<dyn Step>>) -> PipelineResult<&mut Self> {
        for step in steps {
            self.add_boxed_step(step)?;
        }
        Ok(self)
    }

    /// Remove a step by name; returns whether one was removed
    pub fn remove_step(&mut self, step_name: &str) -> bool {
        let before = self.steps.len();
        self.steps.retain(|s| s.name() != step_name);
        self.steps.len() < before
    }

    pub fn get_step(&self, step_name: &str) -> Option<&dyn Step> {
        self.steps
            .iter()
            .find(|s| s.name() == step_name)
            .map(|s| s.as_ref())
    }

    /// Index of a step by name
    pub fn position(&self, step_name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name() == step_name)
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn clear_steps(&mut self) {
        self.steps.clear();
        debug!(pipeline = %self.config.name, "Cleared all steps");
    }

    /// Run every step in order against `context`
    pub fn execute(&mut self, context: Context) -> RunSummary {
        self.run_from(context, 0, |_, _, _| {})
    }

    /// Run the steps from `start_index` onward
    ///
    /// `after_step` is called synchronously after each step, once the result is
    /// recorded in the context history and before the next step begins.
    pub(crate) fn run_from<F>(
        &mut self,
        mut context: Context,
        start_index: usize,
        mut after_step: F,
    ) -> RunSummary
    where
        F: FnMut(usize, &StepResult, &mut Context),
    {
        let run_id = Uuid::new_v4();
        let start_time = Local::now();
        let started = Instant::now();
        let total_steps = self.steps.len();

        info!(
            pipeline = %self.config.name,
            run_id = %run_id,
            task = %context.task_name(),
            start_index,
            total_steps,
            "Starting pipeline execution"
        );

        let mut results = Vec::new();
        for (index, step) in self.steps.iter().enumerate().skip(start_index) {
            info!(
                pipeline = %self.config.name,
                step = %step.name(),
                "Executing step {}/{}",
                index + 1,
                total_steps
            );

            let result = invoke_step(step.as_ref(), &mut context);
            info!(
                step = %result.step_name,
                status = %result.status,
                duration_secs = result.duration_secs,
                "{}",
                result.message
            );

            context.add_history(step.name(), result.status);
            after_step(index, &result, &mut context);

            let stop = result.is_failed() && self.config.stop_on_error;
            results.push(result);
            if stop {
                error!(pipeline = %self.config.name, step = %step.name(), "Stopping pipeline due to failed step");
                break;
            }
        }

        let successful_steps = results.iter().filter(|r| r.is_success()).count();
        let failed_steps = results.iter().filter(|r| r.is_failed()).count();
        let skipped_steps = results.iter().filter(|r| r.is_skipped()).count();
        let duration_secs = started.elapsed().as_secs_f64();
        let success = failed_steps == 0;

        if success {
            info!(pipeline = %self.config.name, executed = results.len(), duration_secs, "Pipeline completed successfully");
        } else {
            error!(pipeline = %self.config.name, failed_steps, "Pipeline failed");
        }

        self.history.push(RunRecord {
            run_id,
            started_at: start_time,
            success,
            duration_secs,
        });

        RunSummary {
            pipeline: self.config.name.clone(),
            run_id,
            success,
            total_steps,
            executed_steps: results.len(),
            successful_steps,
            failed_steps,
            skipped_steps,
            results,
            start_time,
            end_time: Local::now(),
            duration_secs,
            context_summary: context.summary(),
            context,
        }
    }

    pub fn statistics(&self) -> PipelineStatistics {
        PipelineStatistics {
            total_executions: self.history.len(),
            last_execution: self.history.last().cloned(),
            history: self.history.clone(),
            total_steps: self.steps.len(),
            step_names: self.step_names().into_iter().map(String::from).collect(),
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.config.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Fluent builder for pipelines
pub struct PipelineBuilder {
    config: PipelineConfig,
    steps: Vec<Box<dyn Step>>,
    validator: Option<Box<dyn StepNameValidator>>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: PipelineConfig::new(name),
            steps: Vec::new(),
            validator: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = description.into();
        self
    }

    pub fn task_type(mut self, task_type: impl Into<String>) -> Self {
        self.config.task_type = task_type.into();
        self
    }

    pub fn stop_on_error(mut self, stop: bool) -> Self {
        self.config.stop_on_error = stop;
        self
    }

    pub fn validator(mut self, validator: Box<dyn StepNameValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn boxed_step(mut self, step: Box<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Build the pipeline, validating step names
    pub fn build(self) -> PipelineResult<Pipeline> {
        let mut pipeline = match self.validator {
            Some(validator) => Pipeline::with_validator(self.config, validator),
            None => Pipeline::new(self.config),
        };
        for step in self.steps {
            pipeline.add_boxed_step(step)?;
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FunctionStep, StepError, StepOutput};

    fn recording_step(name: &'static str) -> FunctionStep {
        FunctionStep::new(name, move |ctx: &mut Context| {
            let seen = ctx.get_variable("seen", Scalar::from("")).as_str().unwrap_or("").to_string();
            ctx.set_variable("seen", format!("{}{}", seen, name));
            Ok(StepOutput::success(format!("{} done", name)))
        })
    }

    fn failing_step(name: &'static str) -> FunctionStep {
        FunctionStep::new(name, |_| Err(StepError::new("amount mismatch")))
    }

    #[test]
    fn test_all_steps_succeed() {
        let mut pipeline = PipelineBuilder::new("daily")
            .step(recording_step("A"))
            .step(recording_step("B"))
            .step(recording_step("C"))
            .build()
            .unwrap();

        let summary = pipeline.execute(Context::new("T", "K"));
        assert!(summary.success);
        assert_eq!(summary.successful_steps, 3);
        assert_eq!(summary.failed_steps, 0);
        assert_eq!(summary.results.len(), 3);
        assert_eq!(summary.context.variable("seen"), Some(&Scalar::from("ABC")));
        assert_eq!(summary.context.history().len(), 3);
    }

    #[test]
    fn test_stop_on_error_truncates_results() {
        let mut pipeline = PipelineBuilder::new("daily")
            .step(recording_step("A"))
            .step(failing_step("B"))
            .step(recording_step("C"))
            .build()
            .unwrap();

        let summary = pipeline.execute(Context::new("T", "K"));
        assert!(!summary.success);
        assert_eq!(summary.executed_steps, 2);
        assert_eq!(summary.executed_step_names(), vec!["A", "B"]);
        assert!(summary.result("C").is_none());
        assert_eq!(summary.skipped_steps, 0);
    }

    #[test]
    fn test_continue_on_error() {
        let mut pipeline = PipelineBuilder::new("daily")
            .stop_on_error(false)
            .step(failing_step("A"))
            .step(recording_step("B"))
            .build()
            .unwrap();

        let summary = pipeline.execute(Context::new("T", "K"));
        assert!(!summary.success);
        assert_eq!(summary.executed_steps, 2);
        assert_eq!(summary.failed_steps, 1);
        assert_eq!(summary.successful_steps, 1);
    }

    #[test]
    fn test_skipped_step_does_not_stop_run() {
        let mut pipeline = PipelineBuilder::new("monthly")
            .step(FunctionStep::new("escrow", |_| Ok(StepOutput::skipped("no escrow file"))))
            .step(recording_step("B"))
            .build()
            .unwrap();
        assert!(pipeline.config.stop_on_error);

        let summary = pipeline.execute(Context::new("T", "K"));
        assert!(summary.success);
        assert_eq!(summary.executed_steps, 2);
        assert_eq!(summary.skipped_steps, 1);
        assert_eq!(summary.successful_steps, 1);
        assert_eq!(summary.failed_steps, 0);
        assert_eq!(summary.context.variable("seen"), Some(&Scalar::from("B")));
    }

    #[test]
    fn test_add_steps_appends_in_order() {
        let mut pipeline = Pipeline::new(PipelineConfig::new("daily"));
        let first: Vec<Box<dyn Step>> =
            vec![Box::new(recording_step("A")), Box::new(recording_step("B"))];
        pipeline.add_steps(first).unwrap();
        assert_eq!(pipeline.step_names(), vec!["A", "B"]);

        let second: Vec<Box<dyn Step>> =
            vec![Box::new(recording_step("C")), Box::new(recording_step("A"))];
        let err = pipeline.add_steps(second).err().unwrap();
        assert!(matches!(err, PipelineError::DuplicateStep(name) if name == "A"));
        assert_eq!(pipeline.step_names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_duplicate_step_names_rejected() {
        let result = PipelineBuilder::new("daily")
            .step(recording_step("A"))
            .step(recording_step("A"))
            .build();
        assert!(matches!(result, Err(PipelineError::DuplicateStep(name)) if name == "A"));
    }

    #[test]
    fn test_step_management_and_statistics() {
        let mut pipeline = Pipeline::new(PipelineConfig::new("daily"));
        pipeline.add_step(recording_step("A")).unwrap();
        pipeline.add_step(recording_step("B")).unwrap();
        assert_eq!(pipeline.position("B"), Some(1));
        assert!(pipeline.get_step("A").is_some());
        assert!(pipeline.remove_step("A"));
        assert!(!pipeline.remove_step("A"));
        assert_eq!(pipeline.step_names(), vec!["B"]);

        pipeline.execute(Context::new("T", "K"));
        let stats = pipeline.statistics();
        assert_eq!(stats.total_executions, 1);
        assert!(stats.last_execution.unwrap().success);

        pipeline.clear_steps();
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_summary_rendering() {
        let mut pipeline = PipelineBuilder::new("daily")
            .step(recording_step("A"))
            .build()
            .unwrap();
        let summary = pipeline.execute(Context::new("T", "K"));
        let report = summary.render();
        assert!(report.contains("Pipeline daily"));
        assert!(report.contains("1 succeeded"));
        assert_eq!(summary.to_json()["executed_steps"], 1);
        assert!(summary.to_json().get("context").is_none());
    }
}
