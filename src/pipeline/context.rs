//! Processing context threaded through every step of a run

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, warn};

use crate::types::*;

/// Identity of the task a context belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    /// Task name, first component of checkpoint names
    pub task_name: String,
    /// Task kind (transform, compare, report, ...)
    pub task_type: String,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

impl ContextMetadata {
    pub fn new(task_name: impl Into<String>, task_type: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            task_name: task_name.into(),
            task_type: task_type.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh the update timestamp
    pub fn touch(&mut self) {
        self.updated_at = Local::now();
    }
}

/// One entry of the append-only step history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Local>,
}

/// Outcome of a named validation performed by a step
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// A passing result with no messages
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    /// Record an error; the result becomes invalid
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Where a context was reconstructed from
///
/// Advanced as a resumed run completes steps, so a context handed on from
/// one run to the next is checked against the last step actually applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePoint {
    /// Checkpoint loaded, or the latest one saved since
    pub checkpoint_name: String,
    /// Last step whose work the context reflects
    pub step_name: String,
}

/// Mutable state shared by all steps of one run
///
/// Lookups never fail: a missing variable or auxiliary dataset is a normal
/// case and yields `None` or the caller's default.
#[derive(Debug, Clone)]
pub struct Context {
    data: Frame,
    pub metadata: ContextMetadata,
    auxiliary: HashMap<String, Frame>,
    variables: HashMap<String, Scalar>,
    warnings: Vec<String>,
    errors: Vec<String>,
    history: Vec<HistoryEntry>,
    validations: HashMap<String, ValidationResult>,
    restored_from: Option<RestorePoint>,
}

impl Context {
    /// Create a context with an empty primary dataset
    pub fn new(task_name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self::with_data(Frame::empty(), task_name, task_type)
    }

    /// Create a context around a primary dataset
    pub fn with_data(
        data: Frame,
        task_name: impl Into<String>,
        task_type: impl Into<String>,
    ) -> Self {
        Self {
            data,
            metadata: ContextMetadata::new(task_name, task_type),
            auxiliary: HashMap::new(),
            variables: HashMap::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            history: Vec::new(),
            validations: HashMap::new(),
            restored_from: None,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.metadata.task_name
    }

    pub fn task_type(&self) -> &str {
        &self.metadata.task_type
    }

    // Primary dataset

    pub fn data(&self) -> &Frame {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Frame {
        self.metadata.touch();
        &mut self.data
    }

    /// Replace the primary dataset
    pub fn update_data(&mut self, data: Frame) {
        self.data = data;
        self.metadata.touch();
    }

    // Auxiliary datasets

    /// Add or replace a named auxiliary dataset
    pub fn add_auxiliary_data(&mut self, name: impl Into<String>, data: Frame) {
        let name = name.into();
        debug!(name = %name, rows = data.num_rows(), "Added auxiliary data");
        self.auxiliary.insert(name, data);
    }

    pub fn get_auxiliary_data(&self, name: &str) -> Option<&Frame> {
        self.auxiliary.get(name)
    }

    pub fn has_auxiliary_data(&self, name: &str) -> bool {
        self.auxiliary.contains_key(name)
    }

    /// Names of all auxiliary datasets, sorted
    pub fn list_auxiliary_data(&self) -> Vec<String> {
        let mut names: Vec<String> = self.auxiliary.keys().cloned().collect();
        names.sort();
        names
    }

    // Variables

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Look up a variable, falling back to `default` when absent
    pub fn get_variable(&self, name: &str, default: Scalar) -> Scalar {
        self.variables.get(name).cloned().unwrap_or(default)
    }

    pub fn variable(&self, name: &str) -> Option<&Scalar> {
        self.variables.get(name)
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn variables(&self) -> &HashMap<String, Scalar> {
        &self.variables
    }

    // Warnings and errors

    pub fn add_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(task = %self.metadata.task_name, "{}", message);
        self.warnings.push(message);
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(task = %self.metadata.task_name, "{}", message);
        self.errors.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.clear();
    }

    // Validations

    /// Record a named validation, copying its messages into the context
    pub fn add_validation(&mut self, name: impl Into<String>, result: ValidationResult) {
        let name = name.into();
        for message in &result.errors {
            self.add_error(format!("[{}] {}", name, message));
        }
        for message in &result.warnings {
            self.add_warning(format!("[{}] {}", name, message));
        }
        self.validations.insert(name, result);
    }

    pub fn get_validation(&self, name: &str) -> Option<&ValidationResult> {
        self.validations.get(name)
    }

    /// True when every recorded validation passed
    pub fn is_valid(&self) -> bool {
        self.validations.values().all(|v| v.is_valid)
    }

    // History

    pub fn add_history(&mut self, step_name: impl Into<String>, status: StepStatus) {
        self.history.push(HistoryEntry {
            step: step_name.into(),
            status,
            timestamp: Local::now(),
        });
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn last_step(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    /// Checkpoint this context was loaded from, if any
    pub fn restored_from(&self) -> Option<&RestorePoint> {
        self.restored_from.as_ref()
    }

    /// Counts snapshot for logs and run reports
    pub fn summary(&self) -> ContextSummary {
        let mut variables: Vec<String> = self.variables.keys().cloned().collect();
        variables.sort();
        let mut validations: Vec<String> = self.validations.keys().cloned().collect();
        validations.sort();

        ContextSummary {
            task_name: self.metadata.task_name.clone(),
            task_type: self.metadata.task_type.clone(),
            data_shape: self.data.shape(),
            auxiliary_data: self.list_auxiliary_data(),
            variables,
            errors: self.errors.len(),
            warnings: self.warnings.len(),
            validations,
            history_steps: self.history.len(),
        }
    }

    // Checkpoint restoration; messages are restored verbatim without re-logging

    pub(crate) fn restore_messages(&mut self, warnings: Vec<String>, errors: Vec<String>) {
        self.warnings = warnings;
        self.errors = errors;
    }

    pub(crate) fn restore_history(&mut self, history: Vec<HistoryEntry>) {
        self.history = history;
    }

    pub(crate) fn set_restored_from(&mut self, point: RestorePoint) {
        self.restored_from = Some(point);
    }

    /// Move the restore point past `step_name`; no-op for fresh contexts
    pub(crate) fn advance_restore_point(&mut self, step_name: &str, saved_as: Option<String>) {
        if let Some(point) = self.restored_from.as_mut() {
            point.step_name = step_name.to_string();
            if let Some(name) = saved_as {
                point.checkpoint_name = name;
            }
        }
    }
}
