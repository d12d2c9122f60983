//! # MPS Cache
//!
//! 髒標記與增量計算模組

pub mod dirty_tracking;
pub mod incremental;

// Re-export 主要類型
pub use dirty_tracking::{DirtyQueue, DirtyRange};
pub use incremental::{CancelToken, IncrementalPlanner, PlanningContext, PropagationReport};
