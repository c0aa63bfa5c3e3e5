//! Offline checks over statically discovered asset references.

pub mod checker;
pub mod stamp;

pub use checker::CircularDependencyChecker;
pub use stamp::{AnalyzerError, Stamp, StampList};
