//! 排程讀取模型

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Bucket, ProductionSchedule, ReplenishState};

/// 單一時間桶的顯示資料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketView {
    pub index: usize,
    pub date_start: NaiveDate,
    /// 最後一天（含）
    pub date_stop: NaiveDate,
    pub forecast_qty: Decimal,
    pub indirect_demand_qty: Decimal,
    pub starting_inventory_qty: Decimal,
    pub safety_stock_qty: Decimal,
    pub replenish_qty: Decimal,
    /// 補貨量為手動設定
    pub replenish_qty_updated: bool,
    pub launched_qty: Option<Decimal>,
    pub state: ReplenishState,
    pub forced_replenish: bool,
}

/// 排程顯示資料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleView {
    pub schedule_id: Uuid,
    pub product_id: String,
    pub warehouse_id: String,
    pub lead_time_days: u32,
    pub max_to_replenish_qty: Decimal,
    pub has_indirect_demand: bool,
    /// 庫存或提前期使用的是舊值
    pub stale: bool,
    pub buckets: Vec<BucketView>,
}

impl ScheduleView {
    /// 由排程與時間桶投影出顯示資料
    pub fn project(schedule: &ProductionSchedule, buckets: &[Bucket]) -> Self {
        let buckets = buckets
            .iter()
            .zip(&schedule.cells)
            .map(|(bucket, cell)| BucketView {
                index: bucket.index,
                date_start: bucket.start,
                date_stop: bucket.last_day(),
                forecast_qty: cell.forecast_qty,
                indirect_demand_qty: cell.indirect_demand_qty,
                starting_inventory_qty: cell.starting_inventory_qty,
                safety_stock_qty: cell.safety_stock_qty,
                replenish_qty: cell.replenish_qty,
                replenish_qty_updated: cell.replenish_override.is_some(),
                launched_qty: cell.launched_qty,
                state: cell.state,
                forced_replenish: cell.forced_replenish,
            })
            .collect();

        Self {
            schedule_id: schedule.id,
            product_id: schedule.product_id.clone(),
            warehouse_id: schedule.warehouse_id.clone(),
            lead_time_days: schedule.lead_time_days(),
            max_to_replenish_qty: schedule.max_to_replenish_qty,
            has_indirect_demand: schedule.has_indirect_demand(),
            stale: schedule.stale,
            buckets,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
