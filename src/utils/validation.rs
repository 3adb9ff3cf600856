//! Validation utilities

use crate::traits::*;
use crate::types::*;

const MAX_STEP_NAME_LEN: usize = 100;
const MAX_CHECKPOINT_NAME_LEN: usize = 255;

fn is_path_safe(name: &str) -> bool {
    name != "."
        && name != ".."
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control())
}

/// Validate that a checkpoint name can be used as a directory name
pub fn validate_checkpoint_name(name: &str) -> CheckpointResult<()> {
    if name.trim().is_empty() {
        return Err(CheckpointError::InvalidName(
            "Checkpoint name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_CHECKPOINT_NAME_LEN {
        return Err(CheckpointError::InvalidName(format!(
            "Checkpoint name cannot exceed {} bytes: {}",
            MAX_CHECKPOINT_NAME_LEN, name
        )));
    }

    if !is_path_safe(name) {
        return Err(CheckpointError::InvalidName(format!(
            "Checkpoint name contains path separators or control characters: {}",
            name
        )));
    }

    Ok(())
}

/// Validate that an auxiliary dataset name can be used as a file stem
pub fn validate_dataset_name(name: &str) -> CheckpointResult<()> {
    if name.is_empty() || !is_path_safe(name) {
        return Err(CheckpointError::InvalidName(format!(
            "Dataset name is not usable as a file name: {:?}",
            name
        )));
    }
    Ok(())
}

/// Validate that a step name is valid
pub fn validate_step_name(name: &str) -> PipelineResult<()> {
    if name.trim().is_empty() {
        return Err(PipelineError::Configuration(
            "Step name cannot be empty".to_string(),
        ));
    }

    if name.chars().count() > MAX_STEP_NAME_LEN {
        return Err(PipelineError::Configuration(format!(
            "Step name cannot exceed {} characters",
            MAX_STEP_NAME_LEN
        )));
    }

    // Step names end up in checkpoint directory names
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(PipelineError::Configuration(format!(
            "Step name '{}' can only contain alphanumeric characters, dots, dashes, and underscores",
            name
        )));
    }

    Ok(())
}

/// Stricter step naming: bounded length and file-name-safe characters
pub struct EnhancedStepNameValidator;

impl StepNameValidator for EnhancedStepNameValidator {
    fn validate_step_name(&self, name: &str) -> PipelineResult<()> {
        DefaultStepNameValidator.validate_step_name(name)?;
        validate_step_name(name)
    }
}
