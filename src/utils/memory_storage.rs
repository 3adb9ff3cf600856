//! In-memory checkpoint storage for testing

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{error, info};

use crate::checkpoint::{checkpoint_name, sort_newest_first, CheckpointInfo, CheckpointSidecar};
use crate::pipeline::Context;
use crate::traits::*;
use crate::types::*;
use crate::utils::{validate_checkpoint_name, validate_dataset_name};

#[derive(Debug, Clone)]
struct StoredCheckpoint {
    sidecar: CheckpointSidecar,
    data: Frame,
    auxiliary: HashMap<String, Frame>,
}

fn poisoned<T>(_: PoisonError<T>) -> CheckpointError {
    CheckpointError::Storage("checkpoint map lock poisoned".to_string())
}

/// In-memory checkpoint store for testing and development
///
/// Clones share the same checkpoints.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<String, StoredCheckpoint>>>,
}

impl MemoryCheckpointStore {
    /// Create a new memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored checkpoints
    pub fn len(&self) -> CheckpointResult<usize> {
        Ok(self.checkpoints.read().map_err(poisoned)?.len())
    }

    pub fn is_empty(&self) -> CheckpointResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Clear all checkpoints (useful for testing)
    pub fn clear(&self) -> CheckpointResult<()> {
        self.checkpoints.write().map_err(poisoned)?.clear();
        Ok(())
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save_checkpoint(
        &mut self,
        context: &Context,
        step_name: &str,
        metadata: Metadata,
    ) -> CheckpointResult<String> {
        let name = checkpoint_name(context.task_name(), context.task_type(), step_name);
        validate_checkpoint_name(&name)?;

        let auxiliary = context
            .list_auxiliary_data()
            .into_iter()
            .filter_map(|aux| {
                if let Err(err) = validate_dataset_name(&aux) {
                    error!(checkpoint = %name, dataset = %aux, error = %err, "Failed to save auxiliary data");
                    return None;
                }
                let frame = context.get_auxiliary_data(&aux)?.clone();
                Some((aux, frame))
            })
            .collect();

        let stored = StoredCheckpoint {
            sidecar: CheckpointSidecar::capture(context, step_name, metadata),
            data: context.data().clone(),
            auxiliary,
        };
        self.checkpoints
            .write()
            .map_err(poisoned)?
            .insert(name.clone(), stored);

        info!(checkpoint = %name, "Checkpoint saved in memory");
        Ok(name)
    }

    fn load_checkpoint(&self, checkpoint_name: &str) -> CheckpointResult<Context> {
        let stored = self
            .checkpoints
            .read()
            .map_err(poisoned)?
            .get(checkpoint_name)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(checkpoint_name.to_string()))?;

        let mut context = stored.sidecar.into_context(stored.data, checkpoint_name);
        for (name, frame) in stored.auxiliary {
            context.add_auxiliary_data(name, frame);
        }
        Ok(context)
    }

    fn list_checkpoints(&self, filter_task: Option<&str>) -> CheckpointResult<Vec<CheckpointInfo>> {
        let checkpoints = self.checkpoints.read().map_err(poisoned)?;
        let mut listed: Vec<CheckpointInfo> = checkpoints
            .iter()
            .filter(|(_, stored)| filter_task.is_none_or(|task| stored.sidecar.task_name == task))
            .map(|(name, stored)| stored.sidecar.describe(name.clone()))
            .collect();
        sort_newest_first(&mut listed);
        Ok(listed)
    }

    fn delete_checkpoint(&mut self, checkpoint_name: &str) -> CheckpointResult<bool> {
        Ok(self
            .checkpoints
            .write()
            .map_err(poisoned)?
            .remove(checkpoint_name)
            .is_some())
    }
}
