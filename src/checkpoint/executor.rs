//! Pipeline execution with per-step checkpoints and resume

use std::path::Path;
use tracing::{error, info, warn};

use crate::checkpoint::{CheckpointInfo, FileCheckpointStore};
use crate::config::ResumePolicy;
use crate::pipeline::{Context, Pipeline, RunSummary};
use crate::traits::CheckpointStore;
use crate::types::*;

/// Runs a pipeline, saving a checkpoint after each successful step
pub struct CheckpointedPipeline<'p, S: CheckpointStore> {
    pipeline: &'p mut Pipeline,
    store: S,
    resume_policy: ResumePolicy,
}

impl<'p, S: CheckpointStore> CheckpointedPipeline<'p, S> {
    pub fn new(pipeline: &'p mut Pipeline, store: S) -> Self {
        Self {
            pipeline,
            store,
            resume_policy: ResumePolicy::default(),
        }
    }

    pub fn with_resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.resume_policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Execute the pipeline, optionally starting at a named step
    ///
    /// Steps before `start_from_step` are not run. When
    /// `save_after_each_step` is set, every successful step is followed by a
    /// checkpoint; a failed save is logged and recorded as a context warning
    /// without stopping the run. A restored context's restore point follows
    /// each successful step.
    pub fn execute_with_checkpoint(
        &mut self,
        context: Context,
        save_after_each_step: bool,
        start_from_step: Option<&str>,
    ) -> PipelineResult<RunSummary> {
        let start_index = match start_from_step {
            Some(step) => {
                let index = self.pipeline.position(step).ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "start step '{}' is not part of pipeline '{}'",
                        step,
                        self.pipeline.name()
                    ))
                })?;
                self.check_resume_point(&context, step, index)?;
                info!(
                    pipeline = %self.pipeline.name(),
                    step = %step,
                    skipped = index,
                    "Resuming pipeline from step"
                );
                index
            }
            None => 0,
        };

        let store = &mut self.store;
        let summary = self.pipeline.run_from(context, start_index, |index, result, ctx| {
            if !result.is_success() {
                return;
            }
            let saved = if save_after_each_step {
                let mut metadata = Metadata::new();
                metadata.insert("step_index".into(), index.into());
                metadata.insert("step_status".into(), result.status.as_str().into());
                metadata.insert("step_message".into(), result.message.clone().into());

                match store.save_checkpoint(ctx, &result.step_name, metadata) {
                    Ok(name) => Some(name),
                    Err(err) => {
                        error!(step = %result.step_name, error = %err, "Failed to save checkpoint");
                        ctx.add_warning(format!(
                            "Checkpoint after step '{}' was not saved: {}",
                            result.step_name, err
                        ));
                        None
                    }
                }
            } else {
                None
            };
            ctx.advance_restore_point(&result.step_name, saved);
        });

        Ok(summary)
    }

    /// Load a checkpoint and continue the pipeline from `start_from_step`
    pub fn resume_from_checkpoint(
        &mut self,
        checkpoint_name: &str,
        start_from_step: &str,
        save_checkpoints: bool,
    ) -> PipelineResult<RunSummary> {
        let context = self.store.load_checkpoint(checkpoint_name)?;
        info!(checkpoint = %checkpoint_name, step = %start_from_step, "Resuming from checkpoint");
        self.execute_with_checkpoint(context, save_checkpoints, Some(start_from_step))
    }

    /// Compare the start step against the step the context was saved after
    fn check_resume_point(&self, context: &Context, step: &str, index: usize) -> PipelineResult<()> {
        let Some(point) = context.restored_from() else {
            return Ok(());
        };

        let problem = match self.pipeline.position(&point.step_name) {
            Some(saved) if index == saved + 1 => return Ok(()),
            Some(saved) if index <= saved => format!(
                "step '{}' was already applied in checkpoint '{}' (saved after '{}')",
                step, point.checkpoint_name, point.step_name
            ),
            Some(_) => {
                // A gap cannot re-apply work, so it is never fatal
                warn!(
                    checkpoint = %point.checkpoint_name,
                    saved_after = %point.step_name,
                    start = %step,
                    "Resume skips steps the checkpoint does not reflect"
                );
                return Ok(());
            }
            None => format!(
                "checkpoint '{}' was saved after '{}', which is not in pipeline '{}'",
                point.checkpoint_name,
                point.step_name,
                self.pipeline.name()
            ),
        };

        match self.resume_policy {
            ResumePolicy::Strict => Err(PipelineError::InconsistentResume(problem)),
            ResumePolicy::Lenient => {
                warn!(start = %step, "{}", problem);
                Ok(())
            }
        }
    }
}

/// Run `pipeline` with a file store under `checkpoint_dir`
pub fn execute_with_checkpoint(
    pipeline: &mut Pipeline,
    context: Context,
    checkpoint_dir: impl AsRef<Path>,
    save_checkpoints: bool,
) -> PipelineResult<RunSummary> {
    let store = FileCheckpointStore::new(checkpoint_dir)?;
    CheckpointedPipeline::new(pipeline, store).execute_with_checkpoint(context, save_checkpoints, None)
}

/// Load `checkpoint_name` from `checkpoint_dir` and run `pipeline` from
/// `start_from_step`
pub fn resume_from_checkpoint(
    checkpoint_name: &str,
    start_from_step: &str,
    pipeline: &mut Pipeline,
    checkpoint_dir: impl AsRef<Path>,
    save_checkpoints: bool,
) -> PipelineResult<RunSummary> {
    let store = FileCheckpointStore::new(checkpoint_dir)?;
    CheckpointedPipeline::new(pipeline, store).resume_from_checkpoint(
        checkpoint_name,
        start_from_step,
        save_checkpoints,
    )
}

/// Checkpoints under `checkpoint_dir`, newest first
pub fn list_available_checkpoints(
    checkpoint_dir: impl AsRef<Path>,
    task_name: Option<&str>,
) -> CheckpointResult<Vec<CheckpointInfo>> {
    FileCheckpointStore::new(checkpoint_dir)?.list_checkpoints(task_name)
}

/// Re-run from `step_name` on a checkpoint without saving new checkpoints
pub fn quick_test_step(
    checkpoint_name: &str,
    step_name: &str,
    pipeline: &mut Pipeline,
    checkpoint_dir: impl AsRef<Path>,
) -> PipelineResult<RunSummary> {
    resume_from_checkpoint(checkpoint_name, step_name, pipeline, checkpoint_dir, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{FunctionStep, PipelineBuilder, StepError, StepOutput};
    use crate::utils::MemoryCheckpointStore;

    fn counting_step(name: &'static str) -> FunctionStep {
        FunctionStep::new(name, move |ctx: &mut Context| {
            let seen = ctx.get_variable("seen", Scalar::from("")).as_str().unwrap_or("").to_string();
            ctx.set_variable("seen", format!("{}{}", seen, name));
            Ok(StepOutput::success(format!("ran {}", name)))
        })
    }

    fn abc() -> Pipeline {
        PipelineBuilder::new("abc")
            .step(counting_step("A"))
            .step(counting_step("B"))
            .step(counting_step("C"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_saves_after_successful_steps_only() {
        let mut pipeline = PipelineBuilder::new("p")
            .stop_on_error(false)
            .step(counting_step("A"))
            .step(FunctionStep::new("B", |_ctx: &mut Context| Err(StepError::new("boom"))))
            .step(counting_step("C"))
            .build()
            .unwrap();

        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new());
        let summary = runner
            .execute_with_checkpoint(Context::new("T", "K"), true, None)
            .unwrap();
        assert!(!summary.success);

        let mut names: Vec<_> = runner
            .store()
            .list_checkpoints(None)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["T_K_after_A", "T_K_after_C"]);
    }

    #[test]
    fn test_no_checkpoint_after_skipped_step() {
        let mut pipeline = PipelineBuilder::new("p")
            .step(FunctionStep::new("A", |_ctx: &mut Context| {
                Ok(StepOutput::skipped("nothing to do"))
            }))
            .step(counting_step("B"))
            .build()
            .unwrap();

        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new());
        let summary = runner
            .execute_with_checkpoint(Context::new("T", "K"), true, None)
            .unwrap();
        assert!(summary.success);
        assert_eq!(summary.skipped_steps, 1);

        let names: Vec<_> = runner
            .store()
            .list_checkpoints(None)
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["T_K_after_B"]);
    }

    #[test]
    fn test_no_saves_when_disabled() {
        let mut pipeline = abc();
        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new());
        runner
            .execute_with_checkpoint(Context::new("T", "K"), false, None)
            .unwrap();
        assert!(runner.store().is_empty().unwrap());
    }

    #[test]
    fn test_unknown_start_step_runs_nothing() {
        let mut pipeline = abc();
        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new());
        let err = runner
            .execute_with_checkpoint(Context::new("T", "K"), true, Some("Z"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(runner.store().is_empty().unwrap());
        drop(runner);
        assert_eq!(pipeline.statistics().total_executions, 0);
    }

    #[test]
    fn test_resume_runs_from_named_step() {
        let mut pipeline = abc();
        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new());
        runner
            .execute_with_checkpoint(Context::new("T", "K"), true, None)
            .unwrap();

        let summary = runner
            .resume_from_checkpoint("T_K_after_A", "B", false)
            .unwrap();
        assert_eq!(summary.executed_step_names(), vec!["B", "C"]);
        assert_eq!(summary.context.variable("seen"), Some(&Scalar::from("ABC")));
    }

    #[test]
    fn test_strict_policy_rejects_rerun() {
        let mut pipeline = abc();
        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new())
            .with_resume_policy(ResumePolicy::Strict);
        runner
            .execute_with_checkpoint(Context::new("T", "K"), true, None)
            .unwrap();

        let err = runner
            .resume_from_checkpoint("T_K_after_B", "B", false)
            .unwrap_err();
        assert!(matches!(err, PipelineError::InconsistentResume(_)));

        assert!(runner.resume_from_checkpoint("T_K_after_B", "C", false).is_ok());
        // Skipping ahead is only warned about
        assert!(runner.resume_from_checkpoint("T_K_after_A", "C", false).is_ok());
    }

    #[test]
    fn test_restore_point_follows_resumed_run() {
        let mut pipeline = abc();
        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new())
            .with_resume_policy(ResumePolicy::Strict);
        runner
            .execute_with_checkpoint(Context::new("T", "K"), true, None)
            .unwrap();

        let first = runner
            .resume_from_checkpoint("T_K_after_A", "B", false)
            .unwrap();
        let point = first.context.restored_from().unwrap();
        assert_eq!(point.step_name, "C");
        assert_eq!(point.checkpoint_name, "T_K_after_A");

        // C was applied by the resumed run, so starting there again is a rerun
        let err = runner
            .execute_with_checkpoint(first.context, false, Some("C"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InconsistentResume(_)));

        let saving = runner
            .resume_from_checkpoint("T_K_after_A", "B", true)
            .unwrap();
        let point = saving.context.restored_from().unwrap();
        assert_eq!(point.checkpoint_name, "T_K_after_C");
    }

    #[test]
    fn test_lenient_policy_allows_rerun() {
        let mut pipeline = abc();
        let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new());
        runner
            .execute_with_checkpoint(Context::new("T", "K"), true, None)
            .unwrap();

        let summary = runner
            .resume_from_checkpoint("T_K_after_B", "B", false)
            .unwrap();
        assert_eq!(summary.context.variable("seen"), Some(&Scalar::from("ABBC")));
    }
}
