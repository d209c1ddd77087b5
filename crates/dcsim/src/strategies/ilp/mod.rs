//! Integer-linear-program consolidation.

pub mod consolidator;
pub mod model;
pub mod solver;

pub use consolidator::IlpConsolidator;
