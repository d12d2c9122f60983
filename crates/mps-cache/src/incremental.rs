//! 增量計算
//!
//! 從髒排程出發逐一局部重算，將補貨量換算成子件排程的間接需求，
//! 子件需求有變動才標記為髒，直到佇列清空為止。

use chrono::NaiveDate;
use mps_bom::BomGraph;
use mps_calc::{BomExploder, LeadTimeCalculator, NettingCalculator, ReplenishStateEvaluator};
use mps_core::{
    Bucket, IndirectDemandTiming, InventoryLookup, LeadTimeSource, MpsError, ScheduleStore,
};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::dirty_tracking::{DirtyQueue, DirtyRange};

/// 取消標記，可跨執行緒共享
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// 一次串聯計算所需的唯讀資料
#[derive(Clone, Copy)]
pub struct PlanningContext<'a> {
    pub store: &'a ScheduleStore,
    pub graph: &'a BomGraph,
    pub buckets: &'a [Bucket],
    pub timing: IndirectDemandTiming,
    pub inventory: &'a dyn InventoryLookup,
    pub lead_times: &'a dyn LeadTimeSource,
    pub now: NaiveDate,
}

/// 串聯計算結果
#[derive(Debug, Clone, Default)]
pub struct PropagationReport {
    /// 依走訪順序（同一排程可能出現多次）
    pub visited: Vec<Uuid>,

    /// 有任何預測格變動的排程
    pub changed: BTreeSet<Uuid>,

    pub errors: Vec<MpsError>,

    /// 取消時尚未處理的排程
    pub pending: Vec<Uuid>,

    pub cancelled: bool,
}

impl PropagationReport {
    /// 需要使用者處理的錯誤
    pub fn user_errors(&self) -> impl Iterator<Item = &MpsError> {
        self.errors.iter().filter(|err| err.is_user_visible())
    }

    pub fn merge(&mut self, other: PropagationReport) {
        self.visited.extend(other.visited);
        self.changed.extend(other.changed);
        self.errors.extend(other.errors);
        self.pending.extend(other.pending);
        self.cancelled |= other.cancelled;
    }
}

struct Lookup {
    on_hand: Option<Decimal>,
    lead_time: Option<u32>,
    errors: Vec<MpsError>,
}

/// 增量計算器
pub struct IncrementalPlanner<'a> {
    ctx: PlanningContext<'a>,
    queue: DirtyQueue,
    cancel: Option<CancelToken>,
}

impl<'a> IncrementalPlanner<'a> {
    pub fn new(ctx: PlanningContext<'a>) -> Self {
        Self {
            ctx,
            queue: DirtyQueue::new(),
            cancel: None,
        }
    }

    /// 建構器模式：設置取消標記
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn mark_dirty(&mut self, schedule_id: Uuid, range: DirtyRange) {
        self.queue.mark_dirty(schedule_id, range);
    }

    /// 整個排程重算
    pub fn mark_all(&mut self, schedule_id: Uuid) {
        let last = self.ctx.buckets.len().saturating_sub(1);
        self.queue.mark_dirty(schedule_id, DirtyRange::new(0, last));
    }

    /// 處理到佇列清空（或被取消）
    pub fn run(mut self) -> PropagationReport {
        let mut report = PropagationReport::default();

        while let Some((schedule_id, range)) = self.queue.pop() {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                report.cancelled = true;
                report.pending.push(schedule_id);
                report.pending.extend(self.queue.drain());
                tracing::warn!("串聯計算已取消，剩餘 {} 個排程", report.pending.len());
                break;
            }
            self.visit(schedule_id, range, &mut report);
        }

        tracing::debug!(
            "串聯計算完成: 走訪 {} 次，變動 {} 個排程，錯誤 {} 筆",
            report.visited.len(),
            report.changed.len(),
            report.errors.len()
        );
        report
    }

    fn visit(&mut self, schedule_id: Uuid, range: DirtyRange, report: &mut PropagationReport) {
        let ctx = self.ctx;
        let Some(shared) = ctx.store.get(schedule_id) else {
            tracing::debug!("排程 {} 已移除，略過", schedule_id);
            return;
        };
        report.visited.push(schedule_id);

        // 外部查詢不持有排程鎖
        let (product_id, warehouse_id, has_override) = {
            let schedule = shared.lock();
            (
                schedule.product_id.clone(),
                schedule.warehouse_id.clone(),
                schedule.lead_time_override.is_some(),
            )
        };
        let lookup = self.lookup(&product_id, &warehouse_id, has_override);

        let (replenish, lead_time, variant, previous_downstream) = {
            let mut schedule = shared.lock();
            let before = schedule.cells.clone();
            let mut floor = range.floor;

            if let Some(on_hand) = lookup.on_hand {
                if schedule.on_hand_snapshot != Some(on_hand) {
                    schedule.on_hand_snapshot = Some(on_hand);
                    floor = 0;
                }
            }
            if let Some(days) = lookup.lead_time {
                schedule.lead_time_snapshot = Some(days);
            }
            schedule.stale = !lookup.errors.is_empty();

            let outcome = NettingCalculator::recompute(&mut schedule, floor, range.ceiling);
            ReplenishStateEvaluator::evaluate(&mut schedule, ctx.buckets, ctx.now);

            if schedule.cells != before {
                report.changed.insert(schedule_id);
            }
            tracing::debug!(
                "重算 {} / {}: 時間桶 {}..={}，走訪 {} 桶",
                product_id,
                warehouse_id,
                floor,
                range.ceiling,
                outcome.visited
            );

            (
                schedule.replenish_quantities(),
                schedule.lead_time_days(),
                schedule.variant.clone(),
                schedule.downstream.clone(),
            )
        };

        for err in lookup.errors {
            tracing::warn!("沿用上次的外部資料: {}", err);
            report.errors.push(err);
        }

        let exploder = BomExploder::new(ctx.graph, |child: &str| {
            ctx.store
                .find(child, &warehouse_id)
                .filter(|found| *found != schedule_id)
        });
        let explosion = match exploder.explode(&product_id, variant.as_deref()) {
            Ok(explosion) => explosion,
            Err(err) => {
                // 整個分支不往下傳，保留先前的間接需求
                tracing::warn!("物料 {} 展開失敗: {}", product_id, err);
                report.errors.push(err);
                return;
            }
        };
        report.errors.extend(explosion.unresolved);

        let mut downstream = BTreeSet::new();
        for (target, ratio) in explosion.targets {
            let demand = LeadTimeCalculator::component_demand(
                ctx.buckets,
                &replenish,
                ratio,
                lead_time,
                ctx.timing,
            );
            self.push_contribution(schedule_id, target, Some(demand));
            downstream.insert(target);
        }

        for target in previous_downstream.difference(&downstream) {
            self.push_contribution(schedule_id, *target, None);
        }

        // 排程可能已在串聯期間被移除
        let _ = ctx.store.update(schedule_id, |schedule| schedule.downstream = downstream);
    }

    /// 更新子件排程的間接需求，有變動時標記為髒
    fn push_contribution(&mut self, source: Uuid, target: Uuid, demand: Option<Vec<Decimal>>) {
        let changed = self.ctx.store.update(target, |schedule| match demand {
            Some(demand) => schedule.set_indirect_contribution(source, demand),
            None => schedule.remove_indirect_contribution(source),
        });

        if let Ok(Some((first, last))) = changed {
            self.queue.mark_dirty(target, DirtyRange::new(first, last));
        }
    }

    fn lookup(&self, product_id: &str, warehouse_id: &str, has_override: bool) -> Lookup {
        let failure = |e: anyhow::Error| MpsError::ExternalLookupFailure {
            product_id: product_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            reason: e.to_string(),
        };
        let mut errors = Vec::new();

        let on_hand = match self.ctx.inventory.on_hand_quantity(product_id, warehouse_id) {
            Ok(qty) => Some(qty),
            Err(e) => {
                errors.push(failure(e));
                None
            }
        };

        let lead_time = if has_override {
            None
        } else {
            match self.ctx.lead_times.lead_time_days(product_id, warehouse_id) {
                Ok(days) => Some(days),
                Err(e) => {
                    errors.push(failure(e));
                    None
                }
            }
        };

        Lookup {
            on_hand,
            lead_time,
            errors,
        }
    }
}
