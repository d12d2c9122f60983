//! 補貨請求派送
//!
//! 依（物料, 倉庫, 到期日）合併待下單的預測格，透過開放請求台帳去重，
//! 已存在的請求以增減量更新而非重複建立。

use chrono::NaiveDate;
use mps_core::{
    Bucket, LeadTimeSource, MpsError, ProcurementSink, ProductionSchedule, ReplenishState,
    ReplenishmentRequest,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::lead_time::LeadTimeCalculator;

/// 選取哪些預測格派送
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSelection {
    /// 下單窗口已開且有未滿足數量（批次與依提前期觸發）
    Forced,
    /// 每個排程最早一格有未滿足數量者，不論窗口是否開啟
    Earliest,
    /// 已下單過多的格，送出負增減量
    Corrections,
}

/// 去重鍵
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub product_id: String,
    pub warehouse_id: String,
    pub due_date: NaiveDate,
}

/// 單一預測格的派送明細
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchLine {
    pub schedule_id: Uuid,
    pub bucket_index: usize,
    pub key: RequestKey,
    /// 相對於已下單數量的增減量
    pub quantity: Decimal,
}

impl DispatchLine {
    /// 從排程挑出需派送的明細
    pub fn collect(
        schedule: &ProductionSchedule,
        buckets: &[Bucket],
        selection: DispatchSelection,
    ) -> Vec<DispatchLine> {
        let lead_time = schedule.lead_time_days();
        let line = |index: usize, bucket: &Bucket| DispatchLine {
            schedule_id: schedule.id,
            bucket_index: index,
            key: RequestKey {
                product_id: schedule.product_id.clone(),
                warehouse_id: schedule.warehouse_id.clone(),
                due_date: LeadTimeCalculator::launch_date(bucket.start, lead_time),
            },
            quantity: schedule.cells[index].unmet_qty(),
        };

        let mut cells = schedule.cells.iter().zip(buckets).enumerate();
        match selection {
            DispatchSelection::Forced => cells
                .filter(|(_, (cell, _))| cell.forced_replenish)
                .map(|(index, (_, bucket))| line(index, bucket))
                .collect(),
            DispatchSelection::Earliest => cells
                .find(|(_, (cell, _))| {
                    matches!(
                        cell.state,
                        ReplenishState::Planned | ReplenishState::ToLaunch | ReplenishState::ToRelaunch
                    ) && cell.unmet_qty() > Decimal::ZERO
                })
                .map(|(index, (_, bucket))| line(index, bucket))
                .into_iter()
                .collect(),
            DispatchSelection::Corrections => cells
                .filter(|(_, (cell, _))| cell.state == ReplenishState::ToCorrect)
                .map(|(index, (_, bucket))| line(index, bucket))
                .collect(),
        }
    }

    /// 記錄已確認的下單數量
    pub fn record_launch(&self, schedule: &mut ProductionSchedule) {
        if let Some(cell) = schedule.cells.get_mut(self.bucket_index) {
            let launched = cell.launched_qty.unwrap_or(Decimal::ZERO) + self.quantity;
            cell.launched_qty = Some(launched);
        }
    }
}

/// 同一去重鍵的合併請求
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchGroup {
    pub key: RequestKey,
    pub quantity: Decimal,
    pub lines: Vec<DispatchLine>,
}

impl DispatchGroup {
    /// 依去重鍵合併，不跨到期日合併
    pub fn group(lines: Vec<DispatchLine>) -> Vec<DispatchGroup> {
        let mut groups: BTreeMap<RequestKey, DispatchGroup> = BTreeMap::new();
        for line in lines {
            let group = groups.entry(line.key.clone()).or_insert_with(|| DispatchGroup {
                key: line.key.clone(),
                quantity: Decimal::ZERO,
                lines: Vec::new(),
            });
            group.quantity += line.quantity;
            group.lines.push(line);
        }
        groups.into_values().collect()
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerEntry {
    request_id: Option<String>,
    quantity: Decimal,
    pending: bool,
}

/// 開放請求台帳
///
/// 送出前先保留去重鍵；其他批次遇到保留中的鍵會跳過，避免重複派送。
#[derive(Debug, Default)]
pub struct OpenRequestLedger {
    entries: Mutex<HashMap<RequestKey, LedgerEntry>>,
}

impl OpenRequestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保留去重鍵，返回已存在的請求參考；鍵已被保留時返回 None
    pub fn reserve(&self, key: &RequestKey) -> Option<Option<String>> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_default();
        if entry.pending {
            return None;
        }
        entry.pending = true;
        Some(entry.request_id.clone())
    }

    /// 請求已被接受
    pub fn confirm(&self, key: &RequestKey, request_id: String, delta: Decimal) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_default();
        entry.request_id = Some(request_id);
        entry.quantity += delta;
        entry.pending = false;
    }

    /// 請求失敗，釋放保留
    pub fn release(&self, key: &RequestKey) {
        let mut entries = self.entries.lock();
        let remove = match entries.get_mut(key) {
            Some(entry) => {
                entry.pending = false;
                entry.request_id.is_none()
            }
            None => false,
        };
        if remove {
            entries.remove(key);
        }
    }

    pub fn request_id(&self, key: &RequestKey) -> Option<String> {
        self.entries.lock().get(key).and_then(|entry| entry.request_id.clone())
    }

    /// 已確認的累計數量
    pub fn open_quantity(&self, key: &RequestKey) -> Decimal {
        self.entries
            .lock()
            .get(key)
            .map_or(Decimal::ZERO, |entry| entry.quantity)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.request_id.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 已送出的請求
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedRequest {
    pub request_id: String,
    pub request: ReplenishmentRequest,
    pub lines: Vec<DispatchLine>,
}

/// 派送結果
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub sent: Vec<DispatchedRequest>,
    /// 其他批次保留中而跳過的鍵
    pub skipped: Vec<RequestKey>,
    pub failures: Vec<MpsError>,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.sent.extend(other.sent);
        self.skipped.extend(other.skipped);
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty() && self.skipped.is_empty() && self.failures.is_empty()
    }
}

/// 補貨請求派送器
pub struct Dispatcher<'a> {
    sink: &'a dyn ProcurementSink,
    lead_times: &'a dyn LeadTimeSource,
    ledger: &'a OpenRequestLedger,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        sink: &'a dyn ProcurementSink,
        lead_times: &'a dyn LeadTimeSource,
        ledger: &'a OpenRequestLedger,
    ) -> Self {
        Self {
            sink,
            lead_times,
            ledger,
        }
    }

    /// 逐組派送；失敗的組不影響其他組
    pub fn dispatch(&self, groups: Vec<DispatchGroup>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for group in groups {
            if group.quantity.is_zero() {
                continue;
            }

            let Some(existing_request) = self.ledger.reserve(&group.key) else {
                tracing::debug!("請求 {:?} 已由其他批次處理中，跳過", group.key);
                report.skipped.push(group.key);
                continue;
            };

            match self.send(&group, existing_request) {
                Ok(dispatched) => {
                    self.ledger
                        .confirm(&group.key, dispatched.request_id.clone(), group.quantity);
                    tracing::info!(
                        "補貨請求 {}: {} / {} 到期 {} 數量 {}",
                        dispatched.request_id,
                        group.key.product_id,
                        group.key.warehouse_id,
                        group.key.due_date,
                        group.quantity
                    );
                    report.sent.push(dispatched);
                }
                Err(err) => {
                    self.ledger.release(&group.key);
                    tracing::warn!("補貨請求失敗，下次批次重試: {}", err);
                    report.failures.push(err);
                }
            }
        }

        report
    }

    fn send(
        &self,
        group: &DispatchGroup,
        existing_request: Option<String>,
    ) -> mps_core::Result<DispatchedRequest> {
        let key = &group.key;
        let source_type = self
            .lead_times
            .source_type(&key.product_id, &key.warehouse_id)
            .map_err(|e| MpsError::ExternalLookupFailure {
                product_id: key.product_id.clone(),
                warehouse_id: key.warehouse_id.clone(),
                reason: e.to_string(),
            })?;

        let request = ReplenishmentRequest {
            product_id: key.product_id.clone(),
            warehouse_id: key.warehouse_id.clone(),
            due_date: key.due_date,
            quantity: group.quantity,
            source_type,
            existing_request,
        };

        let request_id = self
            .sink
            .create_or_update_request(&request)
            .map_err(|e| MpsError::DispatchFailure {
                product_id: key.product_id.clone(),
                warehouse_id: key.warehouse_id.clone(),
                due_date: key.due_date,
                reason: e.to_string(),
            })?;

        Ok(DispatchedRequest {
            request_id,
            request,
            lines: group.lines.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketing::BucketingCalculator;
    use crate::replenish_state::ReplenishStateEvaluator;
    use mps_core::{Granularity, SourceType};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestSink {
        calls: Mutex<Vec<ReplenishmentRequest>>,
        counter: AtomicUsize,
        fail: AtomicBool,
    }

    impl TestSink {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl ProcurementSink for TestSink {
        fn create_or_update_request(&self, request: &ReplenishmentRequest) -> anyhow::Result<String> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("供應商系統離線");
            }
            self.calls.lock().push(request.clone());
            if let Some(existing) = &request.existing_request {
                return Ok(existing.clone());
            }
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("REQ-{n:04}"))
        }
    }

    struct Buy;

    impl LeadTimeSource for Buy {
        fn lead_time_days(&self, _: &str, _: &str) -> anyhow::Result<u32> {
            Ok(0)
        }

        fn source_type(&self, _: &str, _: &str) -> anyhow::Result<SourceType> {
            Ok(SourceType::Buy)
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup(replenish: &[i64]) -> (ProductionSchedule, Vec<Bucket>, NaiveDate) {
        let now = date(2025, 10, 8);
        let buckets =
            BucketingCalculator::generate_buckets(Granularity::Day, replenish.len(), now).unwrap();
        let mut schedule =
            ProductionSchedule::new("SCREW".to_string(), "WH-01".to_string(), replenish.len());
        for (cell, qty) in schedule.cells.iter_mut().zip(replenish) {
            cell.replenish_qty = Decimal::from(*qty);
        }
        ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now);
        (schedule, buckets, now)
    }

    #[test]
    fn test_collect_forced_and_earliest() {
        let (schedule, buckets, _) = setup(&[10, 0, 5]);

        // 每日時間桶，提前期 0：只有今天的窗口已開
        let forced = DispatchLine::collect(&schedule, &buckets, DispatchSelection::Forced);
        assert_eq!(forced.len(), 1);
        assert_eq!(forced[0].bucket_index, 0);
        assert_eq!(forced[0].key.due_date, date(2025, 10, 8));

        let mut later = schedule.clone();
        later.cells[0].replenish_qty = Decimal::ZERO;
        ReplenishStateEvaluator::evaluate(&mut later, &buckets, date(2025, 10, 8));
        let earliest = DispatchLine::collect(&later, &buckets, DispatchSelection::Earliest);
        assert_eq!(earliest.len(), 1);
        assert_eq!(earliest[0].bucket_index, 2);
        assert_eq!(earliest[0].quantity, Decimal::from(5));
    }

    #[test]
    fn test_group_by_due_date() {
        let key = |day| RequestKey {
            product_id: "SCREW".to_string(),
            warehouse_id: "WH-01".to_string(),
            due_date: date(2025, 10, day),
        };
        let line = |index, day, qty| DispatchLine {
            schedule_id: Uuid::nil(),
            bucket_index: index,
            key: key(day),
            quantity: Decimal::from(qty),
        };

        let groups = DispatchGroup::group(vec![line(0, 8, 10), line(1, 8, 5), line(2, 9, 7)]);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].quantity, Decimal::from(15));
        assert_eq!(groups[0].lines.len(), 2);
        assert_eq!(groups[1].quantity, Decimal::from(7));
    }

    #[test]
    fn test_dispatch_creates_then_updates() {
        let sink = TestSink::new();
        let ledger = OpenRequestLedger::new();
        let dispatcher = Dispatcher::new(&sink, &Buy, &ledger);
        let (mut schedule, buckets, now) = setup(&[10]);

        let lines = DispatchLine::collect(&schedule, &buckets, DispatchSelection::Forced);
        let report = dispatcher.dispatch(DispatchGroup::group(lines));
        assert_eq!(report.sent.len(), 1);
        assert_eq!(report.sent[0].request_id, "REQ-0001");
        assert!(!report.sent[0].request.is_update());
        for line in &report.sent[0].lines {
            line.record_launch(&mut schedule);
        }
        ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now);
        assert_eq!(schedule.cells[0].state, ReplenishState::Launched);

        // 需求增加後補單：以增減量更新同一請求
        schedule.cells[0].replenish_qty = Decimal::from(14);
        ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now);
        assert_eq!(schedule.cells[0].state, ReplenishState::ToRelaunch);

        let lines = DispatchLine::collect(&schedule, &buckets, DispatchSelection::Forced);
        let report = dispatcher.dispatch(DispatchGroup::group(lines));
        let request = &report.sent[0].request;
        assert_eq!(request.existing_request.as_deref(), Some("REQ-0001"));
        assert_eq!(request.quantity, Decimal::from(4));
        assert_eq!(ledger.open_quantity(&report.sent[0].lines[0].key), Decimal::from(14));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_failed_dispatch_is_retryable() {
        let sink = TestSink::new();
        sink.fail.store(true, Ordering::SeqCst);
        let ledger = OpenRequestLedger::new();
        let dispatcher = Dispatcher::new(&sink, &Buy, &ledger);
        let (schedule, buckets, _) = setup(&[10]);

        let lines = DispatchLine::collect(&schedule, &buckets, DispatchSelection::Forced);
        let report = dispatcher.dispatch(DispatchGroup::group(lines.clone()));

        assert!(report.sent.is_empty());
        assert!(matches!(report.failures[0], MpsError::DispatchFailure { .. }));
        assert!(report.failures[0].is_retryable());
        assert!(ledger.is_empty());

        sink.fail.store(false, Ordering::SeqCst);
        let report = dispatcher.dispatch(DispatchGroup::group(lines));
        assert_eq!(report.sent.len(), 1);
        assert!(!report.sent[0].request.is_update());
    }

    #[test]
    fn test_pending_reservation_is_skipped() {
        let sink = TestSink::new();
        let ledger = OpenRequestLedger::new();
        let dispatcher = Dispatcher::new(&sink, &Buy, &ledger);
        let (schedule, buckets, _) = setup(&[10]);

        let lines = DispatchLine::collect(&schedule, &buckets, DispatchSelection::Forced);
        let key = lines[0].key.clone();
        assert_eq!(ledger.reserve(&key), Some(None));

        let report = dispatcher.dispatch(DispatchGroup::group(lines));
        assert_eq!(report.skipped, vec![key.clone()]);
        assert!(sink.calls.lock().is_empty());

        ledger.release(&key);
        assert_eq!(ledger.reserve(&key), Some(None));
    }

    #[test]
    fn test_corrections_send_negative_delta() {
        let (mut schedule, buckets, now) = setup(&[6]);
        schedule.cells[0].launched_qty = Some(Decimal::from(10));
        ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now);
        assert_eq!(schedule.cells[0].state, ReplenishState::ToCorrect);

        let lines = DispatchLine::collect(&schedule, &buckets, DispatchSelection::Corrections);
        assert_eq!(lines[0].quantity, Decimal::from(-4));

        lines[0].record_launch(&mut schedule);
        ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now);
        assert_eq!(schedule.cells[0].state, ReplenishState::Launched);
    }
}
