//! Utility modules

pub mod memory_storage;
pub mod metadata;
pub mod validation;

pub use memory_storage::*;
pub use metadata::*;
pub use validation::*;
