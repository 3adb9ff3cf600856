//! Checkpoint metadata record (`checkpoint_info.json`) and naming

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

use crate::pipeline::{Context, HistoryEntry, RestorePoint};
use crate::types::*;

/// Name of the metadata file inside a checkpoint directory
pub const SIDECAR_FILE: &str = "checkpoint_info.json";
/// Subdirectory holding auxiliary datasets
pub const AUXILIARY_DIR: &str = "auxiliary_data";
/// File stem of the primary dataset
pub const DATA_STEM: &str = "data";
/// Layout of the second-resolution `timestamp` field
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Checkpoint name for a task after a step: `<task>_<type>_after_<step>`
///
/// An empty task name is written as `unknown`.
pub fn checkpoint_name(task_name: &str, task_type: &str, step_name: &str) -> String {
    let task = if task_name.is_empty() { "unknown" } else { task_name };
    format!("{}_{}_after_{}", task, task_type, step_name)
}

fn unknown() -> String {
    "unknown".to_string()
}

/// Everything about a checkpoint except its datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSidecar {
    pub step_name: String,
    #[serde(default = "unknown")]
    pub task_name: String,
    #[serde(default = "unknown")]
    pub task_type: String,
    /// Persisted variable values
    #[serde(default)]
    pub variables: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    /// Local wall-clock time, `YYYYMMDD_HHMMSS`
    pub timestamp: String,
    /// Sub-second save time, orders checkpoints saved within one second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Local>>,
    #[serde(default)]
    pub auxiliary_data_list: Vec<String>,
    /// `[rows, columns]` of the primary dataset
    #[serde(default)]
    pub data_shape: [usize; 2],
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl CheckpointSidecar {
    /// Describe `context` as saved after `step_name`
    pub fn capture(context: &Context, step_name: &str, metadata: Metadata) -> Self {
        let now = Local::now();
        let mut names: Vec<&String> = context.variables().keys().collect();
        names.sort();
        let variables = names
            .into_iter()
            .filter_map(|name| {
                context
                    .variable(name)
                    .map(|value| (name.clone(), value.to_persisted()))
            })
            .collect();
        let (rows, cols) = context.data().shape();

        Self {
            step_name: step_name.to_string(),
            task_name: context.task_name().to_string(),
            task_type: context.task_type().to_string(),
            variables,
            warnings: context.warnings().to_vec(),
            errors: context.errors().to_vec(),
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            saved_at: Some(now),
            auxiliary_data_list: context.list_auxiliary_data(),
            data_shape: [rows, cols],
            metadata,
            history: context.history().to_vec(),
        }
    }

    /// Rebuild a context around the loaded primary dataset
    ///
    /// Auxiliary datasets are added by the caller.
    pub fn into_context(self, data: Frame, checkpoint_name: &str) -> Context {
        let mut context = Context::with_data(data, self.task_name, self.task_type);
        for (name, value) in self.variables {
            context.set_variable(name, Scalar::from_persisted(value));
        }
        context.restore_messages(self.warnings, self.errors);
        context.restore_history(self.history);
        context.set_restored_from(RestorePoint {
            checkpoint_name: checkpoint_name.to_string(),
            step_name: self.step_name,
        });
        context
    }

    /// Listing entry for this record
    pub fn describe(&self, name: impl Into<String>) -> CheckpointInfo {
        CheckpointInfo {
            name: name.into(),
            step: self.step_name.clone(),
            task_name: self.task_name.clone(),
            task_type: self.task_type.clone(),
            timestamp: self.timestamp.clone(),
            saved_at: self.saved_at,
            data_shape: self.data_shape,
        }
    }
}

/// Summary of a stored checkpoint, as returned by listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub name: String,
    /// Step the checkpoint was saved after
    pub step: String,
    pub task_name: String,
    pub task_type: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Local>>,
    pub data_shape: [usize; 2],
}

/// Order newest first by `timestamp`, then by `saved_at`
pub fn sort_newest_first(checkpoints: &mut [CheckpointInfo]) {
    checkpoints.sort_by(|a, b| {
        (Reverse(&a.timestamp), Reverse(a.saved_at)).cmp(&(Reverse(&b.timestamp), Reverse(b.saved_at)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_checkpoint_name() {
        assert_eq!(
            checkpoint_name("CUB", "transform", "load_statement"),
            "CUB_transform_after_load_statement"
        );
        assert_eq!(checkpoint_name("", "compare", "diff"), "unknown_compare_after_diff");
    }

    #[test]
    fn test_capture_and_restore() {
        let mut ctx = Context::with_data(
            Frame::new(["amount"]).with_row(vec![Cell::Int(10)]),
            "CTBC",
            "transform",
        );
        ctx.set_variable("period", "202501");
        ctx.set_variable("rows", 1i64);
        ctx.add_warning("fee missing");
        ctx.add_history("load", StepStatus::Success);
        ctx.add_auxiliary_data("ub", Frame::new(["x"]));

        let sidecar = CheckpointSidecar::capture(&ctx, "load", Metadata::new());
        assert_eq!(sidecar.data_shape, [1, 1]);
        assert_eq!(sidecar.timestamp.len(), 15);
        assert_eq!(sidecar.auxiliary_data_list, vec!["ub"]);

        let json = serde_json::to_string(&sidecar).unwrap();
        let parsed: CheckpointSidecar = serde_json::from_str(&json).unwrap();
        let restored = parsed.into_context(ctx.data().clone(), "CTBC_transform_after_load");

        assert_eq!(restored.variable("period"), Some(&Scalar::from("202501")));
        assert_eq!(restored.variable("rows"), Some(&Scalar::Int(1)));
        assert_eq!(restored.warnings(), ["fee missing"]);
        assert_eq!(restored.history().len(), 1);
        assert_eq!(restored.restored_from().unwrap().step_name, "load");
    }

    #[test]
    fn test_minimal_sidecar_parses() {
        let parsed: CheckpointSidecar =
            serde_json::from_str(r#"{"step_name":"a","timestamp":"20250101_120000"}"#).unwrap();
        assert_eq!(parsed.task_name, "unknown");
        assert!(parsed.history.is_empty());
        assert!(parsed.saved_at.is_none());
    }

    #[test]
    fn test_sort_newest_first() {
        let now = Local::now();
        let info = |name: &str, ts: &str, offset_ms: i64| CheckpointInfo {
            name: name.to_string(),
            step: name.to_string(),
            task_name: "t".to_string(),
            task_type: "k".to_string(),
            timestamp: ts.to_string(),
            saved_at: Some(now + Duration::milliseconds(offset_ms)),
            data_shape: [0, 0],
        };
        let mut list = vec![
            info("old", "20250101_000000", 0),
            info("same_a", "20250102_000000", 1),
            info("same_b", "20250102_000000", 5),
        ];
        sort_newest_first(&mut list);
        let names: Vec<_> = list.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["same_b", "same_a", "old"]);
    }
}
