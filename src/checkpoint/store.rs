//! Directory-per-checkpoint storage on the local filesystem
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/checkpoints/<name>/data.<ext>
//! <root>/checkpoints/<name>/auxiliary_data/<dataset>.<ext>
//! <root>/checkpoints/<name>/checkpoint_info.json
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::checkpoint::codec::{self, BLOB_EXT, COLUMNAR_EXT};
use crate::checkpoint::sidecar::*;
use crate::config::EngineConfig;
use crate::pipeline::Context;
use crate::traits::CheckpointStore;
use crate::types::*;
use crate::utils::{validate_checkpoint_name, validate_dataset_name};

/// Which encoding a dataset was written with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetForm {
    Columnar,
    Blob,
}

/// Filesystem checkpoint store
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Open a store under `base_dir`, creating `<base_dir>/checkpoints`
    pub fn new(base_dir: impl AsRef<Path>) -> CheckpointResult<Self> {
        let root = base_dir.as_ref().join("checkpoints");
        fs::create_dir_all(&root)
            .map_err(|e| CheckpointError::io(format!("creating {}", root.display()), e))?;
        debug!(root = %root.display(), "Opened checkpoint store");
        Ok(Self { root })
    }

    /// Open the store at the configured checkpoint root
    pub fn from_config(config: &EngineConfig) -> CheckpointResult<Self> {
        Self::new(&config.checkpoint_root)
    }

    /// Directory holding all checkpoints
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a named checkpoint (which may not exist)
    pub fn checkpoint_path(&self, checkpoint_name: &str) -> PathBuf {
        self.root.join(checkpoint_name)
    }

    /// Read the metadata record of a checkpoint
    pub fn read_sidecar(&self, checkpoint_name: &str) -> CheckpointResult<CheckpointSidecar> {
        validate_checkpoint_name(checkpoint_name)?;
        let path = self.checkpoint_path(checkpoint_name).join(SIDECAR_FILE);
        if !path.is_file() {
            return Err(CheckpointError::NotFound(checkpoint_name.to_string()));
        }
        read_sidecar_file(&path)
    }
}

fn read_sidecar_file(path: &Path) -> CheckpointResult<CheckpointSidecar> {
    let raw = fs::read(path).map_err(|e| CheckpointError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_slice(&raw)
        .map_err(|e| CheckpointError::Serialization(format!("{}: {}", path.display(), e)))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> CheckpointResult<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes)
        .map_err(|e| CheckpointError::io(format!("writing {}", temp_path.display()), e))?;
    fs::rename(&temp_path, path)
        .map_err(|e| CheckpointError::io(format!("renaming to {}", path.display()), e))
}

fn dataset_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    dir.join(format!("{}.{}", stem, ext))
}

/// Write a dataset in columnar form, falling back to blob form
fn write_dataset(dir: &Path, stem: &str, frame: &Frame) -> CheckpointResult<DatasetForm> {
    match codec::encode_columnar(frame) {
        Ok(bytes) => match write_atomic(&dataset_path(dir, stem, COLUMNAR_EXT), &bytes) {
            Ok(()) => return Ok(DatasetForm::Columnar),
            Err(err) => warn!(dataset = %stem, error = %err, "Columnar write failed, falling back to blob"),
        },
        Err(reason) => {
            warn!(dataset = %stem, reason = %reason, "Columnar encoding failed, writing blob")
        }
    }

    let bytes = codec::encode_blob(frame)?;
    write_atomic(&dataset_path(dir, stem, BLOB_EXT), &bytes)?;
    Ok(DatasetForm::Blob)
}

/// Read a dataset, preferring the columnar file
///
/// Returns `None` when no readable file exists for `stem`.
fn read_dataset(dir: &Path, stem: &str) -> Option<Frame> {
    let columnar = dataset_path(dir, stem, COLUMNAR_EXT);
    if columnar.is_file() {
        match fs::read(&columnar)
            .map_err(|e| CheckpointError::io(format!("reading {}", columnar.display()), e))
            .and_then(|bytes| codec::decode_columnar(&bytes))
        {
            Ok(frame) => return Some(frame),
            Err(err) => warn!(path = %columnar.display(), error = %err, "Unreadable columnar dataset"),
        }
    }

    let blob = dataset_path(dir, stem, BLOB_EXT);
    if blob.is_file() {
        match fs::read(&blob)
            .map_err(|e| CheckpointError::io(format!("reading {}", blob.display()), e))
            .and_then(|bytes| codec::decode_blob(&bytes))
        {
            Ok(frame) => return Some(frame),
            Err(err) => warn!(path = %blob.display(), error = %err, "Unreadable blob dataset"),
        }
    }

    None
}

/// Dataset stems present in `dir` with the given extension, sorted
fn stems_with_ext(dir: &Path, ext: &str) -> Vec<String> {
    let suffix = format!(".{}", ext);
    let mut stems: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter_map(|file| file.strip_suffix(&suffix).map(str::to_string))
            .filter(|stem| !stem.is_empty())
            .collect(),
        Err(_) => Vec::new(),
    };
    stems.sort();
    stems
}

impl CheckpointStore for FileCheckpointStore {
    fn save_checkpoint(
        &mut self,
        context: &Context,
        step_name: &str,
        metadata: Metadata,
    ) -> CheckpointResult<String> {
        let name = checkpoint_name(context.task_name(), context.task_type(), step_name);
        validate_checkpoint_name(&name)?;

        let path = self.checkpoint_path(&name);
        if path.exists() {
            fs::remove_dir_all(&path)
                .map_err(|e| CheckpointError::io(format!("replacing {}", path.display()), e))?;
        }
        let aux_dir = path.join(AUXILIARY_DIR);
        fs::create_dir_all(&aux_dir)
            .map_err(|e| CheckpointError::io(format!("creating {}", aux_dir.display()), e))?;

        if !context.data().is_empty() {
            match write_dataset(&path, DATA_STEM, context.data()) {
                Ok(form) => debug!(checkpoint = %name, ?form, "Saved primary data"),
                Err(err) => error!(checkpoint = %name, error = %err, "Failed to save primary data"),
            }
        }

        for aux_name in context.list_auxiliary_data() {
            let Some(frame) = context.get_auxiliary_data(&aux_name) else {
                continue;
            };
            let written = validate_dataset_name(&aux_name)
                .and_then(|()| write_dataset(&aux_dir, &aux_name, frame));
            match written {
                Ok(form) => debug!(checkpoint = %name, dataset = %aux_name, ?form, "Saved auxiliary data"),
                Err(err) => error!(
                    checkpoint = %name,
                    dataset = %aux_name,
                    error = %err,
                    "Failed to save auxiliary data"
                ),
            }
        }

        let sidecar = CheckpointSidecar::capture(context, step_name, metadata);
        let bytes = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        write_atomic(&path.join(SIDECAR_FILE), &bytes)?;

        info!(checkpoint = %name, path = %path.display(), "Checkpoint saved");
        Ok(name)
    }

    fn load_checkpoint(&self, checkpoint_name: &str) -> CheckpointResult<Context> {
        let sidecar = self.read_sidecar(checkpoint_name)?;
        let path = self.checkpoint_path(checkpoint_name);

        let data = read_dataset(&path, DATA_STEM).unwrap_or_default();
        let mut context = sidecar.into_context(data, checkpoint_name);

        let aux_dir = path.join(AUXILIARY_DIR);
        let mut auxiliary = HashMap::new();
        for stem in stems_with_ext(&aux_dir, COLUMNAR_EXT)
            .into_iter()
            .chain(stems_with_ext(&aux_dir, BLOB_EXT))
        {
            if auxiliary.contains_key(&stem) {
                continue;
            }
            if let Some(frame) = read_dataset(&aux_dir, &stem) {
                auxiliary.insert(stem, frame);
            }
        }
        for (name, frame) in auxiliary {
            context.add_auxiliary_data(name, frame);
        }

        info!(checkpoint = %checkpoint_name, "Checkpoint loaded");
        Ok(context)
    }

    fn list_checkpoints(&self, filter_task: Option<&str>) -> CheckpointResult<Vec<CheckpointInfo>> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| CheckpointError::io(format!("listing {}", self.root.display()), e))?;

        let mut checkpoints = Vec::new();
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            let sidecar_path = path.join(SIDECAR_FILE);
            if !path.is_dir() || !sidecar_path.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            match read_sidecar_file(&sidecar_path) {
                Ok(sidecar) => {
                    if filter_task.is_none_or(|task| sidecar.task_name == task) {
                        checkpoints.push(sidecar.describe(name));
                    }
                }
                Err(err) => warn!(checkpoint = %name, error = %err, "Skipping unreadable checkpoint"),
            }
        }

        sort_newest_first(&mut checkpoints);
        Ok(checkpoints)
    }

    fn delete_checkpoint(&mut self, checkpoint_name: &str) -> CheckpointResult<bool> {
        validate_checkpoint_name(checkpoint_name)?;
        let path = self.checkpoint_path(checkpoint_name);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&path)
            .map_err(|e| CheckpointError::io(format!("deleting {}", path.display()), e))?;
        info!(checkpoint = %checkpoint_name, "Checkpoint deleted");
        Ok(true)
    }
}
