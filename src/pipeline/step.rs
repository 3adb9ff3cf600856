//! Step results and the invocation framework around `Step::execute`

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::pipeline::Context;
use crate::traits::Step;
use crate::types::*;
use crate::utils::StepMetadataBuilder;

/// Per-step execution options
#[derive(Debug, Clone, PartialEq)]
pub struct StepOptions {
    /// A required step fails (instead of being skipped) when its input
    /// validation does not pass
    pub required: bool,
    /// Extra attempts after the first failure
    pub retry_count: u32,
    /// Base delay between attempts, doubled after each attempt
    pub retry_backoff: Duration,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            required: true,
            retry_count: 0,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Successful outcome of `Step::execute`
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    skipped: bool,
    message: String,
    metadata: Metadata,
}

impl StepOutput {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            skipped: false,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    /// The step opted out of doing any work in this run
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            skipped: true,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Merge a prepared metadata map
    pub fn with_metadata_map(mut self, metadata: Metadata) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }
}

/// Failed outcome of `Step::execute`
///
/// Any `std::error::Error` converts into a `StepError`, so step bodies can use
/// `?` freely.
#[derive(Debug, Clone, PartialEq)]
pub struct StepError {
    pub message: String,
    pub detail: Option<String>,
    pub metadata: Metadata,
}

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error> From<E> for StepError {
    fn from(err: E) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        let mut step_error = StepError::new(err.to_string());
        if !chain.is_empty() {
            step_error.detail = Some(chain.join(": "));
        }
        step_error
    }
}

/// Return type of `Step::execute`
pub type StepOutcome = Result<StepOutput, StepError>;

/// Immutable record of one step invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Name of the step that produced this result
    pub step_name: String,
    /// Outcome status
    pub status: StepStatus,
    /// Human-readable outcome message
    pub message: String,
    /// Error detail for failed steps
    pub error: Option<String>,
    /// Wall-clock time spent in the step, including retries
    pub duration_secs: f64,
    /// Step-supplied metadata, plus `attempts` on failure
    pub metadata: Metadata,
}

impl StepResult {
    pub fn success(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(step_name, StepStatus::Success, message, None)
    }

    pub fn skipped(step_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(step_name, StepStatus::Skipped, message, None)
    }

    pub fn failed(
        step_name: impl Into<String>,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self::new(step_name, StepStatus::Failed, message, error)
    }

    fn new(
        step_name: impl Into<String>,
        status: StepStatus,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            status,
            message: message.into(),
            error,
            duration_secs: 0.0,
            metadata: Metadata::new(),
        }
    }

    fn from_output(step_name: &str, output: StepOutput) -> Self {
        let status = if output.skipped {
            StepStatus::Skipped
        } else {
            StepStatus::Success
        };
        let mut result = Self::new(step_name, status, output.message, None);
        result.metadata = output.metadata;
        result
    }

    fn from_error(step_name: &str, err: StepError, attempts: u32) -> Self {
        let error = err.detail.or_else(|| Some(err.message.clone()));
        let mut result = Self::failed(step_name, err.message, error);
        result.metadata = err.metadata;
        result
            .metadata
            .insert("attempts".to_string(), attempts.into());
        result
    }

    fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = duration.as_secs_f64();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == StepStatus::Skipped
    }

    /// Re-express this result as the outcome of an enclosing step
    pub fn into_outcome(self) -> StepOutcome {
        match self.status {
            StepStatus::Success => {
                Ok(StepOutput::success(self.message).with_metadata_map(self.metadata))
            }
            StepStatus::Skipped => {
                Ok(StepOutput::skipped(self.message).with_metadata_map(self.metadata))
            }
            StepStatus::Failed => Err(StepError {
                message: self.message,
                detail: self.error,
                metadata: self.metadata,
            }),
        }
    }
}

/// Run a step with input validation, retries and panic capture
///
/// Order: `validate_input`, `run_prerequisites` once, `execute` with retries,
/// then `run_post_actions` once after an `Ok` outcome. A panic in a hook fails
/// the step like a panic in `execute`.
///
/// Always returns a result; nothing raised inside the step escapes. A failed
/// step may have partially mutated the context.
pub fn invoke_step(step: &dyn Step, context: &mut Context) -> StepResult {
    let started = Instant::now();
    let name = step.name().to_string();
    let options = step.options();

    if !step.validate_input(context) {
        let result = if options.required {
            StepResult::failed(
                &name,
                "Input validation failed",
                Some(format!("Input validation failed for step {}", name)),
            )
        } else {
            warn!(step = %name, "Skipping step due to validation failure");
            StepResult::skipped(&name, "Input validation failed")
        };
        return result.with_duration(started.elapsed());
    }

    if let Err(err) = guarded(context, |ctx| {
        step.run_prerequisites(ctx);
        Ok(())
    }) {
        error!(step = %name, error = %err, "Step prerequisite failed");
        return StepResult::from_error(&name, err, 0).with_duration(started.elapsed());
    }

    let mut attempt: u32 = 0;
    let result = loop {
        match guarded(context, |ctx| step.execute(ctx)) {
            Ok(output) => {
                let post = guarded(context, |ctx| {
                    step.run_post_actions(ctx);
                    Ok(())
                });
                break match post {
                    Ok(()) => StepResult::from_output(&name, output),
                    Err(err) => {
                        error!(step = %name, error = %err, "Step post-action failed");
                        StepResult::from_error(&name, err, attempt + 1)
                    }
                };
            }
            Err(err) if attempt < options.retry_count => {
                let delay = options
                    .retry_backoff
                    .saturating_mul(2u32.saturating_pow(attempt));
                attempt += 1;
                warn!(
                    step = %name,
                    attempt,
                    retries = options.retry_count,
                    error = %err,
                    "Step failed, retrying"
                );
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
            Err(err) => {
                if options.retry_count > 0 {
                    error!(step = %name, attempts = attempt + 1, "Step failed after all attempts");
                }
                break StepResult::from_error(&name, err, attempt + 1);
            }
        }
    };

    debug!(step = %name, status = %result.status, "Step invocation finished");
    result.with_duration(started.elapsed())
}

fn guarded<T>(
    context: &mut Context,
    body: impl FnOnce(&mut Context) -> Result<T, StepError>,
) -> Result<T, StepError> {
    match panic::catch_unwind(AssertUnwindSafe(|| body(context))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            // Captured where the panic was caught; the panic hook reports the origin.
            let trace = Backtrace::force_capture().to_string();
            Err(StepError::new(format!("Step panicked: {}", message))
                .with_detail(message.clone())
                .with_metadata("panic", message)
                .with_metadata("trace", trace))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

type StepFn = Box<dyn Fn(&mut Context) -> StepOutcome>;
type Predicate = Box<dyn Fn(&Context) -> bool>;
/// Side-effecting action attached before or after a step
pub type StepHook = Box<dyn Fn(&mut Context)>;

/// Step backed by a closure
pub struct FunctionStep {
    name: String,
    description: String,
    options: StepOptions,
    func: StepFn,
    prerequisites: Vec<StepHook>,
    post_actions: Vec<StepHook>,
}

impl FunctionStep {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&mut Context) -> StepOutcome + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            options: StepOptions::default(),
            func: Box::new(func),
            prerequisites: Vec::new(),
            post_actions: Vec::new(),
        }
    }

    /// Step that computes a new primary dataset from the context
    pub fn transform<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Context) -> Result<Frame, StepError> + 'static,
    {
        Self::new(name, move |ctx: &mut Context| {
            let input_rows = ctx.data().num_rows();
            let data = func(ctx)?;
            let metadata = StepMetadataBuilder::new()
                .row_counts(input_rows, data.num_rows())
                .custom("output_columns", data.columns.len())
                .build();
            ctx.update_data(data);
            Ok(StepOutput::success("Function executed successfully").with_metadata_map(metadata))
        })
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.options.required = required;
        self
    }

    pub fn retries(mut self, retry_count: u32, backoff: Duration) -> Self {
        self.options.retry_count = retry_count;
        self.options.retry_backoff = backoff;
        self
    }

    /// Run `action` after input validation and before the step body
    pub fn add_prerequisite<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut Context) + 'static,
    {
        self.prerequisites.push(Box::new(action));
        self
    }

    /// Run `action` after the step body returns successfully
    pub fn add_post_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&mut Context) + 'static,
    {
        self.post_actions.push(Box::new(action));
        self
    }
}

impl Step for FunctionStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn options(&self) -> StepOptions {
        self.options.clone()
    }

    fn run_prerequisites(&self, context: &mut Context) {
        for action in &self.prerequisites {
            action(context);
        }
    }

    fn execute(&self, context: &mut Context) -> StepOutcome {
        (self.func)(context)
    }

    fn run_post_actions(&self, context: &mut Context) {
        for action in &self.post_actions {
            action(context);
        }
    }
}

/// Step that runs one of two branches depending on a predicate
pub struct ConditionalStep {
    name: String,
    condition: Predicate,
    then_step: Box<dyn Step>,
    else_step: Option<Box<dyn Step>>,
}

impl ConditionalStep {
    pub fn new<F>(name: impl Into<String>, condition: F, then_step: Box<dyn Step>) -> Self
    where
        F: Fn(&Context) -> bool + 'static,
    {
        Self {
            name: name.into(),
            condition: Box::new(condition),
            then_step,
            else_step: None,
        }
    }

    pub fn otherwise(mut self, else_step: Box<dyn Step>) -> Self {
        self.else_step = Some(else_step);
        self
    }
}

impl Step for ConditionalStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, context: &mut Context) -> StepOutcome {
        let branch = if (self.condition)(context) {
            info!(step = %self.name, branch = %self.then_step.name(), "Condition met");
            self.then_step.as_ref()
        } else if let Some(else_step) = &self.else_step {
            info!(step = %self.name, branch = %else_step.name(), "Condition not met");
            else_step.as_ref()
        } else {
            info!(step = %self.name, "Condition not met, skipping");
            return Ok(StepOutput::skipped(
                "Condition not met, no else step defined",
            ));
        };

        let branch_name = branch.name().to_string();
        match invoke_step(branch, context).into_outcome() {
            Ok(output) => Ok(output.with_metadata("branch", branch_name)),
            Err(err) => Err(err.with_metadata("branch", branch_name)),
        }
    }
}

/// Step that runs nested steps in order
pub struct SequentialStep {
    name: String,
    steps: Vec<Box<dyn Step>>,
    stop_on_failure: bool,
}

impl SequentialStep {
    pub fn new(name: impl Into<String>, steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps,
            stop_on_failure: true,
        }
    }

    pub fn stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }
}

impl Step for SequentialStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate_input(&self, _context: &Context) -> bool {
        !self.steps.is_empty()
    }

    fn execute(&self, context: &mut Context) -> StepOutcome {
        let mut completed: Vec<String> = Vec::new();
        let mut failed: Vec<String> = Vec::new();

        for step in &self.steps {
            info!(step = %self.name, nested = %step.name(), "Executing nested step");
            let result = invoke_step(step.as_ref(), context);
            completed.push(result.step_name.clone());

            if result.is_failed() {
                failed.push(result.step_name.clone());
                if self.stop_on_failure {
                    return Err(StepError::new(format!("Step {} failed", result.step_name))
                        .with_detail(result.error.unwrap_or(result.message))
                        .with_metadata("failed_at", result.step_name)
                        .with_metadata("completed", completed));
                }
            }
        }

        if !failed.is_empty() {
            return Err(
                StepError::new(format!("Some steps failed: {}", failed.join(", ")))
                    .with_metadata("failed", failed)
                    .with_metadata("total", self.steps.len()),
            );
        }

        Ok(StepOutput::success(format!(
            "All {} steps completed successfully",
            self.steps.len()
        ))
        .with_metadata("completed_steps", completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as Counter;
    use std::rc::Rc;

    fn ok_step(name: &str) -> Box<dyn Step> {
        Box::new(FunctionStep::new(name, |_| Ok(StepOutput::success("done"))))
    }

    fn failing_step(name: &str) -> Box<dyn Step> {
        Box::new(FunctionStep::new(name, |_| Err(StepError::new("bank file missing"))))
    }

    #[test]
    fn test_success_and_skip_statuses() {
        let mut ctx = Context::new("recon", "transform");
        let step = FunctionStep::new("load", |ctx: &mut Context| {
            ctx.set_variable("loaded", true);
            Ok(StepOutput::success("loaded").with_metadata("rows", 3))
        });
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_success());
        assert_eq!(result.metadata["rows"], 3);
        assert_eq!(ctx.variable("loaded"), Some(&Scalar::Bool(true)));

        let skip = FunctionStep::new("optional", |_| Ok(StepOutput::skipped("no UB file this month")));
        assert!(invoke_step(&skip, &mut ctx).is_skipped());
    }

    #[test]
    fn test_error_becomes_failed_result() {
        let mut ctx = Context::new("recon", "transform");
        let step = FunctionStep::new("parse", |_| {
            let _n: i64 = "not-a-number".parse()?;
            Ok(StepOutput::success("parsed"))
        });
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_failed());
        assert!(result.message.contains("invalid digit"));
        assert_eq!(result.metadata["attempts"], 1);
    }

    #[test]
    fn test_panic_is_contained() {
        let mut ctx = Context::new("recon", "transform");
        let step = FunctionStep::new("explode", |_| panic!("division by zero in fee table"));
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_failed());
        assert!(result.message.contains("division by zero in fee table"));
        assert!(result.metadata.contains_key("trace"));
        assert_eq!(result.metadata["panic"], "division by zero in fee table");
    }

    #[test]
    fn test_retries_until_success() {
        let calls = Rc::new(Counter::new(0));
        let seen = Rc::clone(&calls);
        let step = FunctionStep::new("flaky", move |_| {
            seen.set(seen.get() + 1);
            if seen.get() < 3 {
                Err(StepError::new("sheet service unavailable"))
            } else {
                Ok(StepOutput::success("fetched"))
            }
        })
        .retries(2, Duration::ZERO);

        let mut ctx = Context::new("recon", "transform");
        assert!(invoke_step(&step, &mut ctx).is_success());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retries_exhausted() {
        let step = FunctionStep::new("flaky", |_| Err(StepError::new("still down")))
            .retries(1, Duration::ZERO);
        let mut ctx = Context::new("recon", "transform");
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_failed());
        assert_eq!(result.metadata["attempts"], 2);
    }

    #[test]
    fn test_conditional_branches() {
        let mut ctx = Context::new("recon", "report");
        let step = ConditionalStep::new(
            "maybe_escrow",
            |ctx: &Context| ctx.has_variable("escrow"),
            ok_step("aggregate_escrow"),
        );
        assert!(invoke_step(&step, &mut ctx).is_skipped());

        ctx.set_variable("escrow", true);
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_success());
        assert_eq!(result.metadata["branch"], "aggregate_escrow");

        let step = ConditionalStep::new("pick", |_: &Context| false, ok_step("a"))
            .otherwise(failing_step("b"));
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_failed());
        assert_eq!(result.step_name, "pick");
    }

    #[test]
    fn test_sequential_stops_on_failure() {
        let mut ctx = Context::new("recon", "transform");
        let seq = SequentialStep::new(
            "banks",
            vec![ok_step("cub"), failing_step("ctbc"), ok_step("nccc")],
        );
        let result = invoke_step(&seq, &mut ctx);
        assert!(result.is_failed());
        assert_eq!(result.metadata["failed_at"], "ctbc");
        assert_eq!(result.metadata["completed"], serde_json::json!(["cub", "ctbc"]));

        let seq = SequentialStep::new("banks", vec![failing_step("ctbc"), ok_step("nccc")])
            .stop_on_failure(false);
        let result = invoke_step(&seq, &mut ctx);
        assert_eq!(result.metadata["failed"], serde_json::json!(["ctbc"]));
    }

    #[test]
    fn test_hooks_run_around_execute() {
        let order = Rc::new(std::cell::RefCell::new(Vec::new()));
        let (pre, body, post) = (Rc::clone(&order), Rc::clone(&order), Rc::clone(&order));
        let step = FunctionStep::new("match_ub", move |ctx: &mut Context| {
            body.borrow_mut().push("execute");
            assert!(ctx.has_variable("ub_loaded"));
            Ok(StepOutput::success("matched"))
        })
        .add_prerequisite(move |ctx| {
            pre.borrow_mut().push("prerequisite");
            ctx.set_variable("ub_loaded", true);
        })
        .add_post_action(move |ctx| {
            post.borrow_mut().push("post_action");
            ctx.set_variable("matched", true);
        });

        let mut ctx = Context::new("recon", "compare");
        assert!(invoke_step(&step, &mut ctx).is_success());
        assert_eq!(*order.borrow(), vec!["prerequisite", "execute", "post_action"]);
        assert_eq!(ctx.variable("matched"), Some(&Scalar::Bool(true)));
    }

    #[test]
    fn test_post_actions_skipped_when_execute_fails() {
        let calls = Rc::new(Counter::new(0));
        let (pre, post) = (Rc::clone(&calls), Rc::clone(&calls));

        let step = FunctionStep::new("parse", |_| Err(StepError::new("bad sheet")))
            .retries(2, Duration::ZERO)
            .add_prerequisite(move |_| pre.set(pre.get() + 1))
            .add_post_action(move |_| post.set(post.get() + 100));
        let mut ctx = Context::new("recon", "transform");
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_failed());
        assert_eq!(result.metadata["attempts"], 3);
        // prerequisites run once across all attempts
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_panicking_prerequisite_fails_step() {
        let ran = Rc::new(Counter::new(false));
        let body = Rc::clone(&ran);
        let step = FunctionStep::new("load", move |_| {
            body.set(true);
            Ok(StepOutput::success("loaded"))
        })
        .add_prerequisite(|_| panic!("credentials file missing"));

        let mut ctx = Context::new("recon", "transform");
        let result = invoke_step(&step, &mut ctx);
        assert!(result.is_failed());
        assert_eq!(result.metadata["panic"], "credentials file missing");
        assert!(!ran.get());
    }

    #[test]
    fn test_empty_sequence_fails_validation() {
        let mut ctx = Context::new("recon", "transform");
        let result = invoke_step(&SequentialStep::new("nothing", Vec::new()), &mut ctx);
        assert!(result.is_failed());
        assert_eq!(result.message, "Input validation failed");
    }
}
