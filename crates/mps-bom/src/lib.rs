//! # MPS BOM
//!
//! 物料清單圖：父件消耗子件的有向圖，支援套件（kit）展平與變體過濾

pub mod graph;

// Re-export 主要類型
pub use graph::{BomEdge, BomGraph, Resolution, ResolvedComponent};

/// BOM 錯誤類型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BomError {
    #[error("BOM 循環引用: {}", chain.join(" → "))]
    CycleDetected { chain: Vec<String> },

    #[error("無法解析變體 BOM: {parent} → {child}（變體 {variant:?}，符合 {matches} 筆）")]
    UnresolvedVariantBom {
        parent: String,
        child: String,
        variant: Option<String>,
        matches: usize,
    },

    #[error("無效的用量: {0}")]
    InvalidQuantity(String),
}

pub type Result<T> = std::result::Result<T, BomError>;
