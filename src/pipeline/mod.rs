//! Pipeline module containing the context, step framework and sequential runner

pub mod context;
pub mod runner;
pub mod registry;
pub mod step;

pub use context::*;
pub use runner::*;
pub use registry::*;
pub use step::*;
