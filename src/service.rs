//! MPS 服務
//!
//! 對外的操作入口。每次修改在所屬 BOM 連通分量的互斥區內同步完成串聯計算，
//! 返回時讀取到的排程即為一致狀態。
//!
//! 加鎖順序：BOM 圖 → 連通分量 → 時間桶/配置 → 單一排程。

use chrono::NaiveDate;
use mps_bom::{BomEdge, BomGraph};
use mps_cache::{CancelToken, DirtyRange, IncrementalPlanner, PlanningContext, PropagationReport};
use mps_calc::{
    BucketingCalculator, DispatchGroup, DispatchLine, DispatchReport, DispatchSelection,
    Dispatcher, OpenRequestLedger, ReplenishStateEvaluator,
};
use mps_core::{
    Bucket, Granularity, InventoryLookup, LeadTimeSource, MpsConfig, MpsError, ProcurementSink,
    ProductionSchedule, Result, ScheduleStore, ScheduleView,
};
use parking_lot::{RwLock, RwLockWriteGuard};
use rayon::prelude::*;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::locks::ComponentLocks;

/// 外部協作者
#[derive(Clone)]
pub struct Collaborators {
    pub inventory: Arc<dyn InventoryLookup>,
    pub lead_times: Arc<dyn LeadTimeSource>,
    pub sink: Arc<dyn ProcurementSink>,
}

/// 單格預測修改
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastEdit {
    pub schedule_id: Uuid,
    pub bucket: usize,
    pub qty: Decimal,
}

/// 批次結果
#[derive(Debug, Default)]
pub struct BatchReport {
    /// 狀態有變動的預測格數
    pub reevaluated: usize,

    /// 時間桶已過期而重新產生時的串聯結果
    pub rolled: Option<PropagationReport>,

    pub dispatch: DispatchReport,
}

/// MPS 服務
pub struct MpsService {
    config: RwLock<MpsConfig>,
    buckets: RwLock<Vec<Bucket>>,
    graph: RwLock<BomGraph>,
    store: ScheduleStore,
    locks: ComponentLocks,
    ledger: OpenRequestLedger,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
}

impl MpsService {
    /// 創建服務，以今天產生時間桶
    pub fn new(config: MpsConfig, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let buckets = BucketingCalculator::generate_buckets(
            config.granularity,
            config.horizon_buckets,
            clock.today(),
        )?;

        tracing::info!(
            "MPS 服務啟動: {:?} × {}，起始 {}",
            config.granularity,
            config.horizon_buckets,
            buckets[0].start
        );

        Ok(Self {
            store: ScheduleStore::new(buckets.len()),
            config: RwLock::new(config),
            buckets: RwLock::new(buckets),
            graph: RwLock::new(BomGraph::new()),
            locks: ComponentLocks::new(),
            ledger: OpenRequestLedger::new(),
            collaborators,
            clock,
        })
    }

    pub fn config(&self) -> MpsConfig {
        self.config.read().clone()
    }

    pub fn buckets(&self) -> Vec<Bucket> {
        self.buckets.read().clone()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn find_schedule(&self, product_id: &str, warehouse_id: &str) -> Option<Uuid> {
        self.store.find(product_id, warehouse_id)
    }

    pub fn schedule_ids(&self) -> Vec<Uuid> {
        self.store.ids()
    }

    pub fn schedule(&self, schedule_id: Uuid) -> Result<ProductionSchedule> {
        self.store.snapshot(schedule_id)
    }

    pub fn ledger(&self) -> &OpenRequestLedger {
        &self.ledger
    }

    /// 物料所屬的 BOM 連通分量
    pub fn component_key(&self, product_id: &str) -> String {
        self.graph.read().component_key(product_id)
    }

    // ------------------------------------------------------------------
    // 排程
    // ------------------------------------------------------------------

    /// 建立排程
    pub fn create_schedule(&self, product_id: &str, warehouse_id: &str) -> Result<Uuid> {
        self.create(product_id, warehouse_id, None)
    }

    /// 建立指定變體的排程
    pub fn create_variant_schedule(
        &self,
        product_id: &str,
        warehouse_id: &str,
        variant: &str,
    ) -> Result<Uuid> {
        self.create(product_id, warehouse_id, Some(variant.to_string()))
    }

    /// 建立排程並一併建立一階子件（套件已展開）的排程，返回新建立的排程
    pub fn create_schedule_with_components(
        &self,
        product_id: &str,
        warehouse_id: &str,
    ) -> Result<Vec<Uuid>> {
        let components = {
            let graph = self.graph.read();
            if graph.is_kit(product_id) {
                return Err(MpsError::KitSchedule(product_id.to_string()));
            }
            let resolution = graph.resolve_components(product_id, None)?;
            let products: BTreeSet<String> = resolution
                .components
                .into_iter()
                .map(|component| component.child_id)
                .filter(|child| !graph.is_kit(child))
                .collect();
            products
        };

        let mut created = Vec::new();
        for product in std::iter::once(product_id.to_string()).chain(components) {
            if self.store.find(&product, warehouse_id).is_none() {
                created.push(self.create(&product, warehouse_id, None)?);
            }
        }
        Ok(created)
    }

    fn create(&self, product_id: &str, warehouse_id: &str, variant: Option<String>) -> Result<Uuid> {
        let graph = self.graph.read();
        if graph.is_kit(product_id) {
            return Err(MpsError::KitSchedule(product_id.to_string()));
        }

        self.exclusive(&graph, [product_id.to_string()], || {
            let config = self.config.read().clone();
            let mut schedule = ProductionSchedule::new(
                product_id.to_string(),
                warehouse_id.to_string(),
                self.store.bucket_count(),
            )
            .with_max_to_replenish(config.default_max_to_replenish_qty)
            .with_min_to_replenish(config.default_min_to_replenish_qty)
            .with_safety_stock_target(config.default_safety_stock_target);
            schedule.variant = variant;

            let schedule_id = self.store.insert(schedule)?;
            tracing::info!("建立排程 {}: {} / {}", schedule_id, product_id, warehouse_id);

            // 上層排程原本穿透此物料，改為對此排程產生需求
            let mut seeds = vec![(schedule_id, self.full_range())];
            seeds.extend(self.reexplode_seeds(&graph, product_id, Some(warehouse_id)));
            let report = self.propagate(&graph, seeds, None);
            self.log_report("建立排程", &report);
            Ok(schedule_id)
        })
    }

    /// 移除排程並收回它對子件的間接需求
    pub fn remove_schedule(&self, schedule_id: Uuid) -> Result<PropagationReport> {
        let graph = self.graph.read();
        let product_id = self.store.read(schedule_id, |s| s.product_id.clone())?;

        self.exclusive(&graph, [product_id.clone()], || {
            let removed = self.store.remove(schedule_id)?;

            let mut seeds = Vec::new();
            for target in &removed.downstream {
                let retracted = self
                    .store
                    .update(*target, |s| s.remove_indirect_contribution(removed.id));
                if let Ok(Some((first, last))) = retracted {
                    seeds.push((*target, DirtyRange::new(first, last)));
                }
            }
            seeds.extend(self.reexplode_seeds(&graph, &product_id, Some(&removed.warehouse_id)));

            tracing::info!(
                "移除排程 {}: {} / {}",
                schedule_id,
                removed.product_id,
                removed.warehouse_id
            );
            let report = self.propagate(&graph, seeds, None);
            self.log_report("移除排程", &report);
            Ok(report)
        })
    }

    /// 設置直接需求
    pub fn set_forecast(&self, schedule_id: Uuid, bucket: usize, qty: Decimal) -> Result<PropagationReport> {
        self.edit(schedule_id, |store| {
            let previous = store.set_forecast(schedule_id, bucket, qty)?;
            Ok((previous != qty).then(|| DirtyRange::single(bucket)))
        })
    }

    /// 設置每期最大補貨量（0 表示不限）
    pub fn set_max_replenish(&self, schedule_id: Uuid, qty: Decimal) -> Result<PropagationReport> {
        self.edit(schedule_id, |store| {
            let changed = store.set_max_replenish(schedule_id, qty)?;
            Ok(changed.then(|| self.full_range()))
        })
    }

    /// 設置每期最小補貨量（不可超過非零的最大補貨量）
    pub fn set_min_replenish(&self, schedule_id: Uuid, qty: Decimal) -> Result<PropagationReport> {
        self.edit(schedule_id, |store| {
            let changed = store.set_min_replenish(schedule_id, qty)?;
            Ok(changed.then(|| self.full_range()))
        })
    }

    /// 設置安全庫存目標
    pub fn set_safety_stock_target(&self, schedule_id: Uuid, qty: Decimal) -> Result<PropagationReport> {
        self.edit(schedule_id, |store| {
            let changed = store.set_safety_stock_target(schedule_id, qty)?;
            Ok(changed.then(|| self.full_range()))
        })
    }

    /// 設置提前期覆寫（None 表示使用外部提前期）
    pub fn set_lead_time_override(
        &self,
        schedule_id: Uuid,
        days: Option<u32>,
    ) -> Result<PropagationReport> {
        self.edit(schedule_id, |store| {
            let changed = store.set_lead_time_override(schedule_id, days)?;
            Ok(changed.then(|| self.full_range()))
        })
    }

    /// 手動設定補貨量（None 表示恢復自動計算）
    pub fn set_replenish_override(
        &self,
        schedule_id: Uuid,
        bucket: usize,
        qty: Option<Decimal>,
    ) -> Result<PropagationReport> {
        self.edit(schedule_id, |store| {
            let previous = store.set_replenish_override(schedule_id, bucket, qty)?;
            Ok((previous != qty).then(|| DirtyRange::single(bucket)))
        })
    }

    /// 批次套用預測修改；不同連通分量並行處理
    pub fn apply_forecasts(&self, edits: Vec<ForecastEdit>) -> Result<PropagationReport> {
        let graph = self.graph.read();

        let mut by_component: BTreeMap<String, Vec<ForecastEdit>> = BTreeMap::new();
        for edit in edits {
            let product_id = self.store.read(edit.schedule_id, |s| s.product_id.clone())?;
            by_component
                .entry(graph.component_key(&product_id))
                .or_default()
                .push(edit);
        }

        let report = by_component
            .into_par_iter()
            .map(|(key, edits)| {
                let handle = self.locks.handle(&key);
                let _guard = handle.lock();

                let mut errors = Vec::new();
                let mut seeds = Vec::new();
                for edit in edits {
                    match self.store.set_forecast(edit.schedule_id, edit.bucket, edit.qty) {
                        Ok(previous) if previous != edit.qty => {
                            seeds.push((edit.schedule_id, DirtyRange::single(edit.bucket)));
                        }
                        Ok(_) => {}
                        Err(err) => errors.push(err),
                    }
                }

                let mut report = self.propagate(&graph, seeds, None);
                report.errors.extend(errors);
                report
            })
            .reduce(PropagationReport::default, |mut acc, report| {
                acc.merge(report);
                acc
            });

        self.log_report("批次預測", &report);
        Ok(report)
    }

    /// 重新查詢外部資料並重算；可中途取消
    pub fn refresh(&self, schedule_ids: &[Uuid], cancel: Option<CancelToken>) -> Result<PropagationReport> {
        let graph = self.graph.read();
        let mut products = Vec::with_capacity(schedule_ids.len());
        for id in schedule_ids {
            products.push(self.store.read(*id, |s| s.product_id.clone())?);
        }

        self.exclusive(&graph, products, || {
            let range = self.full_range();
            let seeds = schedule_ids.iter().map(|id| (*id, range));
            Ok(self.propagate(&graph, seeds, cancel))
        })
    }

    // ------------------------------------------------------------------
    // BOM
    // ------------------------------------------------------------------

    /// 加入 BOM 邊
    pub fn add_bom_edge(&self, edge: BomEdge) -> Result<(Uuid, PropagationReport)> {
        let mut graph = self.graph.write();
        if edge.is_kit_passthrough && !self.store.ids_for_product(&edge.child_id).is_empty() {
            return Err(MpsError::KitSchedule(edge.child_id));
        }

        let parent = edge.parent_id.clone();
        let child = edge.child_id.clone();
        let edge_id = graph.add_edge(edge)?;

        let graph = RwLockWriteGuard::downgrade(graph);
        let report = self.exclusive(&graph, [parent.clone(), child], || {
            let seeds = self.reexplode_seeds(&graph, &parent, None);
            self.propagate(&graph, seeds, None)
        });
        self.log_report("加入 BOM 邊", &report);
        Ok((edge_id, report))
    }

    /// 移除 BOM 邊
    pub fn remove_bom_edge(&self, edge_id: Uuid) -> Result<PropagationReport> {
        let mut graph = self.graph.write();
        let edge = graph.remove_edge(edge_id).ok_or(MpsError::EdgeNotFound(edge_id))?;

        let graph = RwLockWriteGuard::downgrade(graph);
        let report = self.exclusive(&graph, [edge.parent_id.clone(), edge.child_id.clone()], || {
            let seeds = self.reexplode_seeds(&graph, &edge.parent_id, None);
            self.propagate(&graph, seeds, None)
        });
        self.log_report("移除 BOM 邊", &report);
        Ok(report)
    }

    /// 標記物料為套件（已有排程的物料不可標記）
    pub fn mark_kit(&self, product_id: &str) -> Result<PropagationReport> {
        let mut graph = self.graph.write();
        if !self.store.ids_for_product(product_id).is_empty() {
            return Err(MpsError::KitSchedule(product_id.to_string()));
        }
        graph.mark_kit(product_id);

        let graph = RwLockWriteGuard::downgrade(graph);
        let report = self.exclusive(&graph, [product_id.to_string()], || {
            let seeds = self.reexplode_seeds(&graph, product_id, None);
            self.propagate(&graph, seeds, None)
        });
        Ok(report)
    }

    // ------------------------------------------------------------------
    // 時間桶
    // ------------------------------------------------------------------

    /// 變更粒度或計劃時界，以今天重新產生時間桶並重新映射既有資料
    pub fn regenerate_buckets(
        &self,
        granularity: Granularity,
        horizon_buckets: usize,
    ) -> Result<PropagationReport> {
        // 持有 BOM 圖寫鎖期間沒有任何串聯計算在執行
        let graph = self.graph.write();

        let mut config = self.config.read().clone();
        config.granularity = granularity;
        config.horizon_buckets = horizon_buckets;
        config.validate()?;

        let new_buckets =
            BucketingCalculator::generate_buckets(granularity, horizon_buckets, self.clock.today())?;
        {
            let mut buckets = self.buckets.write();
            let old_buckets = buckets.clone();
            self.store.rebucket(new_buckets.len(), |schedule| {
                let cells = BucketingCalculator::remap_cells(&old_buckets, &schedule.cells, &new_buckets);
                schedule.replace_cells(cells);
                schedule.downstream.clear();
            });
            *buckets = new_buckets;
        }
        *self.config.write() = config;

        tracing::info!("重新產生時間桶: {:?} × {}", granularity, horizon_buckets);

        let graph = RwLockWriteGuard::downgrade(graph);
        let ids = self.store.ids();
        let mut products = Vec::with_capacity(ids.len());
        for id in &ids {
            if let Ok(product) = self.store.read(*id, |s| s.product_id.clone()) {
                products.push(product);
            }
        }

        let report = self.exclusive(&graph, products, || {
            let range = self.full_range();
            self.propagate(&graph, ids.iter().map(|id| (*id, range)), None)
        });
        self.log_report("重新產生時間桶", &report);
        Ok(report)
    }

    // ------------------------------------------------------------------
    // 查詢
    // ------------------------------------------------------------------

    /// 排程顯示資料
    pub fn get_schedule_view(&self, schedule_id: Uuid) -> Result<ScheduleView> {
        let buckets = self.buckets.read();
        self.store
            .read(schedule_id, |schedule| ScheduleView::project(schedule, &buckets))
    }

    /// 同倉庫中，上層與下層物料的排程
    pub fn impacted_schedules(&self, schedule_id: Uuid) -> Result<Vec<Uuid>> {
        let (product_id, warehouse_id) =
            self.store
                .read(schedule_id, |s| (s.product_id.clone(), s.warehouse_id.clone()))?;

        let graph = self.graph.read();
        let mut products = graph.ancestors(&product_id)?;
        products.extend(graph.descendants(&product_id)?);

        let impacted: BTreeSet<Uuid> = products
            .iter()
            .filter_map(|product| self.store.find(product, &warehouse_id))
            .filter(|id| *id != schedule_id)
            .collect();
        Ok(impacted.into_iter().collect())
    }

    // ------------------------------------------------------------------
    // 補貨
    // ------------------------------------------------------------------

    /// 手動觸發補貨
    ///
    /// `based_on_lead_time` 為 true 時只派送下單窗口已開的預測格；
    /// 否則每個排程派送最早一格有未滿足數量者。
    pub fn trigger_replenishment(
        &self,
        schedule_ids: &[Uuid],
        based_on_lead_time: bool,
    ) -> Result<DispatchReport> {
        let selection = if based_on_lead_time {
            DispatchSelection::Forced
        } else {
            DispatchSelection::Earliest
        };
        self.dispatch(schedule_ids, selection)
    }

    /// 送出已下單過多的修正
    pub fn reconcile_corrections(&self, schedule_ids: &[Uuid]) -> Result<DispatchReport> {
        self.dispatch(schedule_ids, DispatchSelection::Corrections)
    }

    /// 週期批次：時間桶過期時滾動，重新評估狀態並派送到期的補貨
    pub fn run_batch(&self) -> Result<BatchReport> {
        let today = self.clock.today();
        let expired = self
            .buckets
            .read()
            .first()
            .is_some_and(|first| today >= first.end);

        let rolled = if expired {
            let config = self.config();
            Some(self.regenerate_buckets(config.granularity, config.horizon_buckets)?)
        } else {
            None
        };

        let buckets = self.buckets();
        let ids = self.store.ids();
        let reevaluated: usize = ids
            .par_iter()
            .map(|id| {
                self.store
                    .update(*id, |s| ReplenishStateEvaluator::evaluate(s, &buckets, today))
                    .unwrap_or(0)
            })
            .sum();

        let dispatch = self.dispatch(&ids, DispatchSelection::Forced)?;
        tracing::info!(
            "批次完成: 狀態變動 {} 格，送出 {} 筆，失敗 {} 筆",
            reevaluated,
            dispatch.sent.len(),
            dispatch.failures.len()
        );

        Ok(BatchReport {
            reevaluated,
            rolled,
            dispatch,
        })
    }

    fn dispatch(&self, schedule_ids: &[Uuid], selection: DispatchSelection) -> Result<DispatchReport> {
        let graph = self.graph.read();
        let buckets = self.buckets();
        let today = self.clock.today();

        let mut by_component: BTreeMap<String, Vec<Uuid>> = BTreeMap::new();
        for id in schedule_ids {
            let product_id = self.store.read(*id, |s| s.product_id.clone())?;
            by_component
                .entry(graph.component_key(&product_id))
                .or_default()
                .push(*id);
        }

        let report = by_component
            .into_par_iter()
            .map(|(key, ids)| {
                let handle = self.locks.handle(&key);
                let _guard = handle.lock();

                let mut lines = Vec::new();
                for id in ids {
                    if let Ok(collected) = self.store.update(id, |s| {
                        ReplenishStateEvaluator::evaluate(s, &buckets, today);
                        DispatchLine::collect(s, &buckets, selection)
                    }) {
                        lines.extend(collected);
                    }
                }

                let dispatcher = Dispatcher::new(
                    self.collaborators.sink.as_ref(),
                    self.collaborators.lead_times.as_ref(),
                    &self.ledger,
                );
                let report = dispatcher.dispatch(DispatchGroup::group(lines));
                self.record_launches(&report, &buckets, today);
                report
            })
            .reduce(DispatchReport::default, |mut acc, report| {
                acc.merge(report);
                acc
            });

        Ok(report)
    }

    // ------------------------------------------------------------------
    // 內部
    // ------------------------------------------------------------------

    /// 將已確認的請求寫回預測格，返回寫回的明細數
    fn record_launches(&self, report: &DispatchReport, buckets: &[Bucket], today: NaiveDate) -> usize {
        let mut recorded = 0;
        for sent in &report.sent {
            for line in &sent.lines {
                let updated = self.store.update(line.schedule_id, |s| {
                    line.record_launch(s);
                    ReplenishStateEvaluator::evaluate(s, buckets, today);
                });
                match updated {
                    Ok(()) => recorded += 1,
                    // 排程已在派送期間移除，請求仍留在台帳
                    Err(err) => tracing::warn!(
                        "請求 {} 已送出但無法寫回下單數量: {}",
                        sent.request_id,
                        err
                    ),
                }
            }
        }
        recorded
    }

    /// 修改單一排程並串聯
    fn edit<F>(&self, schedule_id: Uuid, apply: F) -> Result<PropagationReport>
    where
        F: FnOnce(&ScheduleStore) -> Result<Option<DirtyRange>>,
    {
        let graph = self.graph.read();
        let product_id = self.store.read(schedule_id, |s| s.product_id.clone())?;

        self.exclusive(&graph, [product_id], || {
            let Some(range) = apply(&self.store)? else {
                return Ok(PropagationReport::default());
            };
            let report = self.propagate(&graph, [(schedule_id, range)], None);
            self.log_report("修改排程", &report);
            Ok(report)
        })
    }

    /// 在物料所屬連通分量的互斥區內執行
    fn exclusive<R>(
        &self,
        graph: &BomGraph,
        products: impl IntoIterator<Item = String>,
        f: impl FnOnce() -> R,
    ) -> R {
        let keys: BTreeSet<String> = products
            .into_iter()
            .map(|product| graph.component_key(&product))
            .collect();
        let handles = self.locks.handles(keys);
        let _guards: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();
        f()
    }

    /// 需要重新展開的排程：物料本身與所有上層物料（可限定倉庫）
    fn reexplode_seeds(
        &self,
        graph: &BomGraph,
        product_id: &str,
        warehouse_id: Option<&str>,
    ) -> Vec<(Uuid, DirtyRange)> {
        let mut products = vec![product_id.to_string()];
        match graph.ancestors(product_id) {
            Ok(ancestors) => products.extend(ancestors),
            // 循環由展開時回報
            Err(err) => tracing::warn!("查詢上層物料失敗: {}", err),
        }

        products
            .iter()
            .flat_map(|product| match warehouse_id {
                Some(warehouse) => self.store.find(product, warehouse).into_iter().collect(),
                None => self.store.ids_for_product(product),
            })
            .map(|id| (id, DirtyRange::single(0)))
            .collect()
    }

    fn full_range(&self) -> DirtyRange {
        DirtyRange::new(0, self.store.bucket_count().saturating_sub(1))
    }

    fn propagate(
        &self,
        graph: &BomGraph,
        seeds: impl IntoIterator<Item = (Uuid, DirtyRange)>,
        cancel: Option<CancelToken>,
    ) -> PropagationReport {
        let buckets = self.buckets.read();
        let timing = self.config.read().indirect_demand_timing;

        let mut planner = IncrementalPlanner::new(PlanningContext {
            store: &self.store,
            graph,
            buckets: buckets.as_slice(),
            timing,
            inventory: self.collaborators.inventory.as_ref(),
            lead_times: self.collaborators.lead_times.as_ref(),
            now: self.clock.today(),
        });
        if let Some(token) = cancel {
            planner = planner.with_cancel(token);
        }
        for (schedule_id, range) in seeds {
            planner.mark_dirty(schedule_id, range);
        }
        planner.run()
    }

    fn log_report(&self, operation: &str, report: &PropagationReport) {
        for err in report.user_errors() {
            tracing::warn!("{}: {}", operation, err);
        }
        tracing::info!(
            "{}: 走訪 {} 次，變動 {} 個排程",
            operation,
            report.visited.len(),
            report.changed.len()
        );
    }
}
