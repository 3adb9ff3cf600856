//! # Recon Pipeline
//!
//! Step pipeline execution with checkpoint and resume support for batch
//! bank reconciliation jobs.
//!
//! ## Features
//!
//! - **Processing context**: primary dataset, named auxiliary datasets, variables, messages and step history
//! - **Step framework**: required/optional steps, retries with backoff, panic containment
//! - **Sequential runner**: stop-on-error or continue, per-run summaries
//! - **Checkpoints**: a snapshot after each successful step, stored in columnar form with a lossless fallback
//! - **Resume**: restart a pipeline from any named step using a saved checkpoint
//! - **Storage abstraction**: filesystem and in-memory checkpoint stores behind one trait
//!
//! ## Quick Start
//!
//! ```rust
//! use recon_pipeline::{Context, FunctionStep, MemoryCheckpointStore, PipelineBuilder, StepOutput};
//! use recon_pipeline::CheckpointedPipeline;
//!
//! let mut pipeline = PipelineBuilder::new("cub_statement")
//!     .step(FunctionStep::new("load", |ctx: &mut Context| {
//!         ctx.set_variable("period", "202501");
//!         Ok(StepOutput::success("loaded"))
//!     }))
//!     .build()
//!     .unwrap();
//!
//! let mut runner = CheckpointedPipeline::new(&mut pipeline, MemoryCheckpointStore::new());
//! let summary = runner
//!     .execute_with_checkpoint(Context::new("CUB", "transform"), true, None)
//!     .unwrap();
//! assert!(summary.success);
//! ```

pub mod checkpoint;
pub mod config;
pub mod pipeline;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use checkpoint::*;
pub use config::*;
pub use pipeline::*;
pub use traits::*;
pub use types::*;
pub use utils::{EnhancedStepNameValidator, MemoryCheckpointStore, StepMetadataBuilder};
