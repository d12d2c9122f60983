//! # MPS Calculation Engine
//!
//! 主生產排程的純計算邏輯：分桶、淨需求、交期、BOM 展開、補貨狀態與派送

pub mod bucketing;
pub mod dispatch;
pub mod explosion;
pub mod lead_time;
pub mod netting;
pub mod replenish_state;

// Re-export 主要類型
pub use bucketing::BucketingCalculator;
pub use dispatch::{
    DispatchGroup, DispatchLine, DispatchReport, DispatchSelection, DispatchedRequest, Dispatcher,
    OpenRequestLedger, RequestKey,
};
pub use explosion::{BomExploder, Explosion};
pub use lead_time::LeadTimeCalculator;
pub use netting::{NettingCalculator, NettingOutcome, ReplenishRule};
pub use replenish_state::ReplenishStateEvaluator;
