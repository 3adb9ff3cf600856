//! Checkpoint persistence and checkpoint-aware execution

pub mod codec;
pub mod executor;
pub mod sidecar;
pub mod store;

pub use codec::{ColumnarError, BLOB_EXT, COLUMNAR_EXT};
pub use executor::*;
pub use sidecar::*;
pub use store::*;
