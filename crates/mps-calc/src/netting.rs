//! 淨需求計算
//!
//! 逐時間桶推算期初庫存、總需求、補貨量與期末庫存。

use mps_core::ProductionSchedule;
use rust_decimal::Decimal;

/// 補貨規則參數
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplenishRule {
    /// 安全庫存目標
    pub target: Decimal,
    /// 每期最小補貨量
    pub min: Decimal,
    /// 每期最大補貨量（0 表示不限）
    pub max: Decimal,
}

impl ReplenishRule {
    pub fn of(schedule: &ProductionSchedule) -> Self {
        Self {
            target: schedule.safety_stock_target,
            min: schedule.min_to_replenish_qty,
            max: schedule.max_to_replenish_qty,
        }
    }

    /// 計算單一時間桶的補貨量
    pub fn replenish_qty(&self, starting_inventory: Decimal, total_demand: Decimal) -> Decimal {
        let optimal = self.target - (starting_inventory - total_demand);

        if !self.max.is_zero() && optimal > self.max {
            self.max
        } else if optimal <= Decimal::ZERO {
            Decimal::ZERO
        } else if optimal < self.min {
            if self.max.is_zero() {
                self.min
            } else {
                self.min.min(self.max)
            }
        } else {
            optimal
        }
    }
}

/// 局部重算結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NettingOutcome {
    /// 補貨量有變動的時間桶範圍（含兩端）
    pub replenish_changed: Option<(usize, usize)>,

    /// 實際走訪的時間桶數
    pub visited: usize,
}

/// 淨需求計算器
pub struct NettingCalculator;

impl NettingCalculator {
    /// 從 `floor` 開始逐桶重算
    ///
    /// 走到 `ceiling` 之後，一旦某桶的輸出與原值相同即停止，後續時間桶不受影響。
    pub fn recompute(schedule: &mut ProductionSchedule, floor: usize, ceiling: usize) -> NettingOutcome {
        let mut outcome = NettingOutcome::default();
        let len = schedule.cells.len();
        if floor >= len {
            return outcome;
        }

        let rule = ReplenishRule::of(schedule);
        let mut starting = match floor {
            0 => schedule.opening_inventory(),
            i => schedule.cells[i - 1].safety_stock_qty,
        };

        for index in floor..len {
            let cell = &mut schedule.cells[index];
            let demand = cell.total_demand();
            let replenish = cell
                .replenish_override
                .unwrap_or_else(|| rule.replenish_qty(starting, demand));
            let ending = starting + replenish - demand;

            let unchanged = cell.starting_inventory_qty == starting
                && cell.replenish_qty == replenish
                && cell.safety_stock_qty == ending;

            if cell.replenish_qty != replenish {
                outcome.replenish_changed = Some(match outcome.replenish_changed {
                    Some((first, _)) => (first, index),
                    None => (index, index),
                });
            }

            cell.starting_inventory_qty = starting;
            cell.replenish_qty = replenish;
            cell.safety_stock_qty = ending;
            outcome.visited += 1;

            if unchanged && index >= ceiling {
                break;
            }
            starting = ending;
        }

        outcome
    }

    /// 全部時間桶重算
    pub fn recompute_all(schedule: &mut ProductionSchedule) -> NettingOutcome {
        let last = schedule.cells.len().saturating_sub(1);
        Self::recompute(schedule, 0, last)
    }
}
