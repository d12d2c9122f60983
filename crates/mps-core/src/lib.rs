//! # MPS Core
//!
//! 核心資料模型與類型定義

pub mod calendar;
pub mod config;
pub mod external;
pub mod schedule;
pub mod store;
pub mod view;

// Re-export 主要類型
pub use calendar::{Bucket, Granularity};
pub use config::{IndirectDemandTiming, MpsConfig};
pub use external::{InventoryLookup, LeadTimeSource, ProcurementSink, ReplenishmentRequest, SourceType};
pub use schedule::{ForecastCell, ProductionSchedule, ReplenishState};
pub use store::{ScheduleStore, SharedSchedule};
pub use view::{BucketView, ScheduleView};

use chrono::NaiveDate;
use mps_bom::BomError;
use uuid::Uuid;

/// MPS 錯誤類型
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MpsError {
    #[error("找不到排程: {0}")]
    ScheduleNotFound(Uuid),

    #[error("排程已存在: 物料 {product_id} / 倉庫 {warehouse_id}")]
    DuplicateSchedule {
        product_id: String,
        warehouse_id: String,
    },

    #[error("找不到 BOM 邊: {0}")]
    EdgeNotFound(Uuid),

    #[error("套件不可建立獨立排程: {0}")]
    KitSchedule(String),

    #[error("時間桶索引超出範圍: {index}（共 {len} 個）")]
    BucketOutOfRange { index: usize, len: usize },

    #[error("無效的數量: {0}")]
    InvalidQuantity(String),

    #[error("無效的配置: {0}")]
    InvalidConfig(String),

    #[error("無效的日期: {0}")]
    InvalidDate(String),

    #[error("BOM 循環引用: {}", chain.join(" → "))]
    CycleDetected { chain: Vec<String> },

    #[error("無法解析變體 BOM: {parent} → {child}（變體 {variant:?}，符合 {matches} 筆）")]
    UnresolvedVariantBom {
        parent: String,
        child: String,
        variant: Option<String>,
        matches: usize,
    },

    #[error("外部查詢失敗: 物料 {product_id} / 倉庫 {warehouse_id}: {reason}")]
    ExternalLookupFailure {
        product_id: String,
        warehouse_id: String,
        reason: String,
    },

    #[error("補貨請求被拒: 物料 {product_id} / 倉庫 {warehouse_id} / 到期 {due_date}: {reason}")]
    DispatchFailure {
        product_id: String,
        warehouse_id: String,
        due_date: NaiveDate,
        reason: String,
    },
}

impl MpsError {
    /// 需要回報給使用者修正的錯誤（不會自動重試）
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            MpsError::CycleDetected { .. } | MpsError::UnresolvedVariantBom { .. }
        )
    }

    /// 下一次觸發時會自動重試的錯誤
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MpsError::ExternalLookupFailure { .. } | MpsError::DispatchFailure { .. }
        )
    }
}

impl From<BomError> for MpsError {
    fn from(err: BomError) -> Self {
        match err {
            BomError::CycleDetected { chain } => MpsError::CycleDetected { chain },
            BomError::UnresolvedVariantBom {
                parent,
                child,
                variant,
                matches,
            } => MpsError::UnresolvedVariantBom {
                parent,
                child,
                variant,
                matches,
            },
            BomError::InvalidQuantity(msg) => MpsError::InvalidQuantity(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, MpsError>;
