//! 生產排程模型

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// 補貨狀態
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplenishState {
    /// 無需補貨
    #[default]
    Idle,
    /// 需補貨但尚未進入下單窗口
    Planned,
    /// 待下單
    ToLaunch,
    /// 已下單且數量相符
    Launched,
    /// 已下單但數量不足，需補單
    ToRelaunch,
    /// 已下單但數量過多（僅提示）
    ToCorrect,
}

impl ReplenishState {
    /// 是否需要派送補貨請求
    pub fn is_actionable(&self) -> bool {
        matches!(self, ReplenishState::ToLaunch | ReplenishState::ToRelaunch)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplenishState::Idle => "idle",
            ReplenishState::Planned => "planned",
            ReplenishState::ToLaunch => "to_launch",
            ReplenishState::Launched => "launched",
            ReplenishState::ToRelaunch => "to_relaunch",
            ReplenishState::ToCorrect => "to_correct",
        }
    }
}

/// 單一時間桶的預測格
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastCell {
    /// 直接（獨立）需求
    pub forecast_qty: Decimal,

    /// 間接需求（來自消耗此物料的父件排程）
    pub indirect_demand_qty: Decimal,

    /// 期初庫存
    pub starting_inventory_qty: Decimal,

    /// 期末庫存（可為負）
    pub safety_stock_qty: Decimal,

    /// 補貨量
    pub replenish_qty: Decimal,

    /// 手動設定的補貨量
    pub replenish_override: Option<Decimal>,

    /// 已下單數量（None 表示尚未下單）
    pub launched_qty: Option<Decimal>,

    pub state: ReplenishState,

    /// 下單窗口已開啟且有未滿足數量
    pub forced_replenish: bool,
}

impl ForecastCell {
    /// 總需求 = 直接需求 + 間接需求
    pub fn total_demand(&self) -> Decimal {
        self.forecast_qty + self.indirect_demand_qty
    }

    /// 尚未下單的補貨量（負值表示已下單過多）
    pub fn unmet_qty(&self) -> Decimal {
        self.replenish_qty - self.launched_qty.unwrap_or(Decimal::ZERO)
    }

    pub fn is_procurement_launched(&self) -> bool {
        self.launched_qty.is_some()
    }

    /// 合併另一格的使用者輸入（重新分桶時使用）
    pub fn absorb_inputs(&mut self, other: &ForecastCell) {
        self.forecast_qty += other.forecast_qty;
        if let Some(qty) = other.replenish_override {
            self.replenish_override = Some(self.replenish_override.unwrap_or(Decimal::ZERO) + qty);
        }
        if let Some(qty) = other.launched_qty {
            self.launched_qty = Some(self.launched_qty.unwrap_or(Decimal::ZERO) + qty);
        }
    }
}

/// 生產排程：每個（物料, 倉庫）唯一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionSchedule {
    /// 排程ID
    pub id: Uuid,

    /// 物料ID
    pub product_id: String,

    /// 倉庫
    pub warehouse_id: String,

    /// 物料變體（用於變體 BOM 過濾）
    pub variant: Option<String>,

    /// 每個時間桶一格
    pub cells: Vec<ForecastCell>,

    /// 每期最大補貨量（0 表示不限）
    pub max_to_replenish_qty: Decimal,

    /// 每期最小補貨量
    pub min_to_replenish_qty: Decimal,

    /// 安全庫存目標
    pub safety_stock_target: Decimal,

    /// 提前期覆寫（天）
    pub lead_time_override: Option<u32>,

    /// 最近一次取得的現有庫存
    pub on_hand_snapshot: Option<Decimal>,

    /// 最近一次取得的提前期
    pub lead_time_snapshot: Option<u32>,

    /// 外部查詢失敗，使用的是舊值
    pub stale: bool,

    /// 來源排程 → 各時間桶的間接需求貢獻
    pub indirect_sources: BTreeMap<Uuid, Vec<Decimal>>,

    /// 本排程目前貢獻間接需求的下游排程
    pub downstream: BTreeSet<Uuid>,
}

impl ProductionSchedule {
    /// 創建新的生產排程
    pub fn new(product_id: String, warehouse_id: String, bucket_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            warehouse_id,
            variant: None,
            cells: vec![ForecastCell::default(); bucket_count],
            max_to_replenish_qty: Decimal::ZERO,
            min_to_replenish_qty: Decimal::ZERO,
            safety_stock_target: Decimal::ZERO,
            lead_time_override: None,
            on_hand_snapshot: None,
            lead_time_snapshot: None,
            stale: false,
            indirect_sources: BTreeMap::new(),
            downstream: BTreeSet::new(),
        }
    }

    /// 建構器模式：設置變體
    pub fn with_variant(mut self, variant: String) -> Self {
        self.variant = Some(variant);
        self
    }

    /// 建構器模式：設置每期最大補貨量
    pub fn with_max_to_replenish(mut self, qty: Decimal) -> Self {
        self.max_to_replenish_qty = qty;
        self
    }

    /// 建構器模式：設置每期最小補貨量
    pub fn with_min_to_replenish(mut self, qty: Decimal) -> Self {
        self.min_to_replenish_qty = qty;
        self
    }

    /// 建構器模式：設置安全庫存目標
    pub fn with_safety_stock_target(mut self, qty: Decimal) -> Self {
        self.safety_stock_target = qty;
        self
    }

    /// 建構器模式：設置提前期覆寫
    pub fn with_lead_time_override(mut self, days: u32) -> Self {
        self.lead_time_override = Some(days);
        self
    }

    /// 有效提前期：覆寫值優先，其次為最近一次查詢結果
    pub fn lead_time_days(&self) -> u32 {
        self.lead_time_override
            .or(self.lead_time_snapshot)
            .unwrap_or(0)
    }

    /// 第一個時間桶的期初庫存
    pub fn opening_inventory(&self) -> Decimal {
        self.on_hand_snapshot.unwrap_or(Decimal::ZERO)
    }

    pub fn bucket_count(&self) -> usize {
        self.cells.len()
    }

    pub fn has_indirect_demand(&self) -> bool {
        self.cells
            .iter()
            .any(|cell| cell.indirect_demand_qty != Decimal::ZERO)
    }

    /// 各時間桶的補貨量
    pub fn replenish_quantities(&self) -> Vec<Decimal> {
        self.cells.iter().map(|cell| cell.replenish_qty).collect()
    }

    /// 設置來源排程的間接需求貢獻
    ///
    /// 返回間接需求有變動的時間桶範圍（含兩端）
    pub fn set_indirect_contribution(
        &mut self,
        source: Uuid,
        contribution: Vec<Decimal>,
    ) -> Option<(usize, usize)> {
        let empty = vec![Decimal::ZERO; self.cells.len()];
        let previous = self.indirect_sources.get(&source).unwrap_or(&empty);
        let range = changed_range(previous, &contribution);

        if contribution.iter().all(|qty| qty.is_zero()) {
            self.indirect_sources.remove(&source);
        } else {
            self.indirect_sources.insert(source, contribution);
        }

        if let Some((first, last)) = range {
            self.recompute_indirect_demand(first, last);
        }
        range
    }

    /// 移除來源排程的間接需求貢獻
    pub fn remove_indirect_contribution(&mut self, source: Uuid) -> Option<(usize, usize)> {
        self.set_indirect_contribution(source, vec![Decimal::ZERO; self.cells.len()])
    }

    fn recompute_indirect_demand(&mut self, first: usize, last: usize) {
        for index in first..=last.min(self.cells.len().saturating_sub(1)) {
            self.cells[index].indirect_demand_qty = self
                .indirect_sources
                .values()
                .filter_map(|contribution| contribution.get(index))
                .copied()
                .sum();
        }
    }

    /// 以新的預測格取代（重新分桶），間接需求貢獻一併清除待重算
    pub fn replace_cells(&mut self, cells: Vec<ForecastCell>) {
        self.cells = cells;
        self.indirect_sources.clear();
    }
}

/// 兩個向量第一個與最後一個不同的位置
fn changed_range(previous: &[Decimal], current: &[Decimal]) -> Option<(usize, usize)> {
    let len = previous.len().max(current.len());
    let at = |values: &[Decimal], i: usize| values.get(i).copied().unwrap_or(Decimal::ZERO);

    let first = (0..len).find(|&i| at(previous, i) != at(current, i))?;
    let last = (0..len)
        .rev()
        .find(|&i| at(previous, i) != at(current, i))
        .unwrap_or(first);
    Some((first, last))
}
