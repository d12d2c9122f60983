//! 外部協作者介面
//!
//! 庫存、提前期與採購/生產請求由外部系統提供，引擎只透過這些 trait 存取。

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 補貨來源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// 採購
    Buy,
    /// 自製
    Manufacture,
}

/// 現有庫存查詢
pub trait InventoryLookup: Send + Sync {
    fn on_hand_quantity(&self, product_id: &str, warehouse_id: &str) -> anyhow::Result<Decimal>;
}

/// 提前期與補貨來源查詢
pub trait LeadTimeSource: Send + Sync {
    /// 提前期（天）
    fn lead_time_days(&self, product_id: &str, warehouse_id: &str) -> anyhow::Result<u32>;

    fn source_type(&self, product_id: &str, warehouse_id: &str) -> anyhow::Result<SourceType>;
}

/// 補貨請求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplenishmentRequest {
    pub product_id: String,
    pub warehouse_id: String,

    /// 到期日（下單日）
    pub due_date: NaiveDate,

    /// 建立時為數量，更新時為增減量
    pub quantity: Decimal,

    pub source_type: SourceType,

    /// 已存在的請求參考（有值時表示更新）
    pub existing_request: Option<String>,
}

impl ReplenishmentRequest {
    pub fn is_update(&self) -> bool {
        self.existing_request.is_some()
    }
}

/// 採購/生產請求下游
pub trait ProcurementSink: Send + Sync {
    /// 建立或更新請求，返回請求參考
    fn create_or_update_request(&self, request: &ReplenishmentRequest) -> anyhow::Result<String>;
}
