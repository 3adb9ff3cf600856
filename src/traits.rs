//! Traits for steps, checkpoint storage and extensibility

use crate::checkpoint::CheckpointInfo;
use crate::pipeline::{Context, StepOptions, StepOutcome};
use crate::types::*;

/// A named, synchronous unit of pipeline work
///
/// Bank-specific processing, loaders and report writers all implement this
/// trait. A step reads variables and auxiliary datasets written by earlier
/// steps and writes its own for later ones; the engine imposes no schema on
/// those names.
pub trait Step {
    /// Name of the step, unique within a pipeline
    fn name(&self) -> &str;

    /// Optional human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Execution options (required flag, retries)
    fn options(&self) -> StepOptions {
        StepOptions::default()
    }

    /// Check preconditions before `execute` runs
    fn validate_input(&self, _context: &Context) -> bool {
        true
    }

    /// Actions run after input validation passes and before the first
    /// `execute` attempt
    fn run_prerequisites(&self, _context: &mut Context) {}

    /// Perform the step's work
    fn execute(&self, context: &mut Context) -> StepOutcome;

    /// Actions run once `execute` has returned successfully
    fn run_post_actions(&self, _context: &mut Context) {}
}

/// Storage abstraction for context checkpoints
///
/// Checkpoints are named `<task_name>_<task_type>_after_<step_name>`; saving
/// again under the same step name replaces the earlier checkpoint.
pub trait CheckpointStore {
    /// Persist a snapshot of `context` taken after `step_name`, returning the
    /// checkpoint name
    fn save_checkpoint(
        &mut self,
        context: &Context,
        step_name: &str,
        metadata: Metadata,
    ) -> CheckpointResult<String>;

    /// Reconstruct a context from a checkpoint
    fn load_checkpoint(&self, checkpoint_name: &str) -> CheckpointResult<Context>;

    /// Describe stored checkpoints, newest first, optionally for one task
    fn list_checkpoints(&self, filter_task: Option<&str>) -> CheckpointResult<Vec<CheckpointInfo>>;

    /// Remove a checkpoint; returns whether anything was deleted
    fn delete_checkpoint(&mut self, checkpoint_name: &str) -> CheckpointResult<bool>;

    /// Delete all but the `keep_last` most recent checkpoints, returning how
    /// many were removed
    fn cleanup_old_checkpoints(
        &mut self,
        keep_last: usize,
        task_name: Option<&str>,
    ) -> CheckpointResult<usize> {
        let checkpoints = self.list_checkpoints(task_name)?;
        let mut deleted = 0;
        for info in checkpoints.iter().skip(keep_last) {
            if self.delete_checkpoint(&info.name)? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, keep_last, "Cleaned up old checkpoints");
        }
        Ok(deleted)
    }
}

/// Trait for implementing custom step naming rules
pub trait StepNameValidator {
    /// Validate a step name before the step joins a pipeline
    fn validate_step_name(&self, name: &str) -> PipelineResult<()>;
}

/// Default validator: names must not be blank
pub struct DefaultStepNameValidator;

impl StepNameValidator for DefaultStepNameValidator {
    fn validate_step_name(&self, name: &str) -> PipelineResult<()> {
        if name.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "Step name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
