//! 生產排程儲存
//!
//! 只負責排程與預測格的存取，不含業務邏輯。每個排程各自加鎖，
//! 讀寫只在單次操作期間持有鎖。

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::{MpsError, ProductionSchedule, Result};

pub type SharedSchedule = Arc<Mutex<ProductionSchedule>>;

#[derive(Default)]
struct StoreIndex {
    schedules: HashMap<Uuid, SharedSchedule>,
    by_key: HashMap<(String, String), Uuid>,
    bucket_count: usize,
}

/// 生產排程儲存
#[derive(Default)]
pub struct ScheduleStore {
    index: RwLock<StoreIndex>,
}

impl ScheduleStore {
    /// 創建新的儲存
    pub fn new(bucket_count: usize) -> Self {
        Self {
            index: RwLock::new(StoreIndex {
                bucket_count,
                ..StoreIndex::default()
            }),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.index.read().bucket_count
    }

    pub fn len(&self) -> usize {
        self.index.read().schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 建立排程
    pub fn create(&self, product_id: &str, warehouse_id: &str) -> Result<Uuid> {
        let bucket_count = self.bucket_count();
        self.insert(ProductionSchedule::new(
            product_id.to_string(),
            warehouse_id.to_string(),
            bucket_count,
        ))
    }

    /// 加入已建好的排程（預測格數量會對齊目前的時間桶數量）
    pub fn insert(&self, mut schedule: ProductionSchedule) -> Result<Uuid> {
        let mut index = self.index.write();
        let key = (schedule.product_id.clone(), schedule.warehouse_id.clone());
        if index.by_key.contains_key(&key) {
            return Err(MpsError::DuplicateSchedule {
                product_id: key.0,
                warehouse_id: key.1,
            });
        }

        let bucket_count = index.bucket_count;
        schedule.cells.resize(bucket_count, Default::default());
        let id = schedule.id;
        index.by_key.insert(key, id);
        index.schedules.insert(id, Arc::new(Mutex::new(schedule)));
        Ok(id)
    }

    /// 移除排程，返回移除前的內容
    pub fn remove(&self, id: Uuid) -> Result<ProductionSchedule> {
        let mut index = self.index.write();
        let shared = index
            .schedules
            .remove(&id)
            .ok_or(MpsError::ScheduleNotFound(id))?;
        let schedule = shared.lock().clone();
        index
            .by_key
            .remove(&(schedule.product_id.clone(), schedule.warehouse_id.clone()));
        Ok(schedule)
    }

    pub fn get(&self, id: Uuid) -> Option<SharedSchedule> {
        self.index.read().schedules.get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.read().schedules.contains_key(&id)
    }

    /// 依（物料, 倉庫）查找排程
    pub fn find(&self, product_id: &str, warehouse_id: &str) -> Option<Uuid> {
        self.index
            .read()
            .by_key
            .get(&(product_id.to_string(), warehouse_id.to_string()))
            .copied()
    }

    /// 某物料在所有倉庫的排程
    pub fn ids_for_product(&self, product_id: &str) -> Vec<Uuid> {
        let index = self.index.read();
        let mut ids: Vec<_> = index
            .by_key
            .iter()
            .filter(|((product, _), _)| product == product_id)
            .map(|((_, warehouse), id)| (warehouse.clone(), *id))
            .collect();
        ids.sort();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// 所有排程ID（依倉庫、物料排序）
    pub fn ids(&self) -> Vec<Uuid> {
        let index = self.index.read();
        let mut keyed: Vec<_> = index
            .by_key
            .iter()
            .map(|((product, warehouse), id)| ((warehouse.clone(), product.clone()), *id))
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, id)| id).collect()
    }

    /// 複製排程內容
    pub fn snapshot(&self, id: Uuid) -> Result<ProductionSchedule> {
        self.read(id, Clone::clone)
    }

    /// 讀取排程
    pub fn read<R>(&self, id: Uuid, f: impl FnOnce(&ProductionSchedule) -> R) -> Result<R> {
        let shared = self.get(id).ok_or(MpsError::ScheduleNotFound(id))?;
        let guard = shared.lock();
        Ok(f(&guard))
    }

    /// 修改排程
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut ProductionSchedule) -> R) -> Result<R> {
        let shared = self.get(id).ok_or(MpsError::ScheduleNotFound(id))?;
        let mut guard = shared.lock();
        Ok(f(&mut guard))
    }

    /// 設置直接需求，返回原值
    pub fn set_forecast(&self, id: Uuid, bucket: usize, qty: Decimal) -> Result<Decimal> {
        if qty < Decimal::ZERO {
            return Err(MpsError::InvalidQuantity(format!("預測數量不可為負: {qty}")));
        }
        self.update(id, |schedule| {
            let len = schedule.cells.len();
            let cell = schedule
                .cells
                .get_mut(bucket)
                .ok_or(MpsError::BucketOutOfRange { index: bucket, len })?;
            Ok(std::mem::replace(&mut cell.forecast_qty, qty))
        })?
    }

    /// 設置手動補貨量（None 表示恢復自動計算），返回原值
    pub fn set_replenish_override(
        &self,
        id: Uuid,
        bucket: usize,
        qty: Option<Decimal>,
    ) -> Result<Option<Decimal>> {
        if qty.is_some_and(|q| q < Decimal::ZERO) {
            return Err(MpsError::InvalidQuantity(format!("補貨量不可為負: {qty:?}")));
        }
        self.update(id, |schedule| {
            let len = schedule.cells.len();
            let cell = schedule
                .cells
                .get_mut(bucket)
                .ok_or(MpsError::BucketOutOfRange { index: bucket, len })?;
            Ok(std::mem::replace(&mut cell.replenish_override, qty))
        })?
    }

    /// 設置每期最大補貨量，返回是否變動
    pub fn set_max_replenish(&self, id: Uuid, qty: Decimal) -> Result<bool> {
        Self::check_non_negative(qty)?;
        self.update(id, |schedule| {
            Self::check_min_max(schedule.min_to_replenish_qty, qty)?;
            Ok(replace_if_changed(&mut schedule.max_to_replenish_qty, qty))
        })?
    }

    /// 設置每期最小補貨量，返回是否變動
    pub fn set_min_replenish(&self, id: Uuid, qty: Decimal) -> Result<bool> {
        Self::check_non_negative(qty)?;
        self.update(id, |schedule| {
            Self::check_min_max(qty, schedule.max_to_replenish_qty)?;
            Ok(replace_if_changed(&mut schedule.min_to_replenish_qty, qty))
        })?
    }

    /// 設置安全庫存目標，返回是否變動
    pub fn set_safety_stock_target(&self, id: Uuid, qty: Decimal) -> Result<bool> {
        Self::check_non_negative(qty)?;
        self.update(id, |schedule| {
            replace_if_changed(&mut schedule.safety_stock_target, qty)
        })
    }

    /// 設置提前期覆寫，返回有效提前期是否變動
    pub fn set_lead_time_override(&self, id: Uuid, days: Option<u32>) -> Result<bool> {
        self.update(id, |schedule| {
            let before = schedule.lead_time_days();
            schedule.lead_time_override = days;
            before != schedule.lead_time_days()
        })
    }

    /// 變更時間桶數量並逐一重新映射排程
    pub fn rebucket(&self, bucket_count: usize, mut remap: impl FnMut(&mut ProductionSchedule)) {
        let mut index = self.index.write();
        index.bucket_count = bucket_count;
        for shared in index.schedules.values() {
            remap(&mut shared.lock());
        }
    }

    fn check_non_negative(qty: Decimal) -> Result<()> {
        if qty < Decimal::ZERO {
            return Err(MpsError::InvalidQuantity(format!("數量不可為負: {qty}")));
        }
        Ok(())
    }

    /// 最大補貨量為 0 表示不限
    fn check_min_max(min: Decimal, max: Decimal) -> Result<()> {
        if !max.is_zero() && min > max {
            return Err(MpsError::InvalidQuantity(format!(
                "最小補貨量 {min} 大於最大補貨量 {max}"
            )));
        }
        Ok(())
    }
}

fn replace_if_changed(slot: &mut Decimal, value: Decimal) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_find() {
        let store = ScheduleStore::new(4);
        let id = store.create("TABLE", "WH-01").unwrap();

        assert_eq!(store.find("TABLE", "WH-01"), Some(id));
        assert_eq!(store.find("TABLE", "WH-02"), None);
        assert_eq!(store.snapshot(id).unwrap().bucket_count(), 4);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_schedule_rejected() {
        let store = ScheduleStore::new(4);
        store.create("TABLE", "WH-01").unwrap();

        assert!(matches!(
            store.create("TABLE", "WH-01"),
            Err(MpsError::DuplicateSchedule { .. })
        ));
        assert!(store.create("TABLE", "WH-02").is_ok());
    }

    #[test]
    fn test_set_forecast_returns_previous() {
        let store = ScheduleStore::new(3);
        let id = store.create("TABLE", "WH-01").unwrap();

        assert_eq!(store.set_forecast(id, 1, Decimal::from(10)).unwrap(), Decimal::ZERO);
        assert_eq!(
            store.set_forecast(id, 1, Decimal::from(25)).unwrap(),
            Decimal::from(10)
        );
        assert_eq!(
            store.snapshot(id).unwrap().cells[1].forecast_qty,
            Decimal::from(25)
        );
    }

    #[test]
    fn test_set_forecast_validation() {
        let store = ScheduleStore::new(3);
        let id = store.create("TABLE", "WH-01").unwrap();

        assert!(matches!(
            store.set_forecast(id, 3, Decimal::ONE),
            Err(MpsError::BucketOutOfRange { index: 3, len: 3 })
        ));
        assert!(matches!(
            store.set_forecast(id, 0, Decimal::from(-1)),
            Err(MpsError::InvalidQuantity(_))
        ));
        assert!(matches!(
            store.set_forecast(Uuid::new_v4(), 0, Decimal::ONE),
            Err(MpsError::ScheduleNotFound(_))
        ));
    }

    #[test]
    fn test_settings_report_changes() {
        let store = ScheduleStore::new(2);
        let id = store.create("TABLE", "WH-01").unwrap();

        assert!(store.set_max_replenish(id, Decimal::from(20)).unwrap());
        assert!(!store.set_max_replenish(id, Decimal::from(20)).unwrap());
        assert!(store.set_lead_time_override(id, Some(7)).unwrap());
        assert!(!store.set_lead_time_override(id, Some(7)).unwrap());
        assert!(store.set_lead_time_override(id, None).unwrap());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let store = ScheduleStore::new(2);
        let id = store.create("TABLE", "WH-01").unwrap();

        store.set_max_replenish(id, Decimal::from(10)).unwrap();
        assert!(matches!(
            store.set_min_replenish(id, Decimal::from(20)),
            Err(MpsError::InvalidQuantity(_))
        ));
        assert!(store.set_min_replenish(id, Decimal::from(10)).unwrap());
        assert!(matches!(
            store.set_max_replenish(id, Decimal::from(5)),
            Err(MpsError::InvalidQuantity(_))
        ));

        // 不限上限時任何下限皆可
        assert!(store.set_max_replenish(id, Decimal::ZERO).unwrap());
        assert!(store.set_min_replenish(id, Decimal::from(50)).unwrap());

        let schedule = store.snapshot(id).unwrap();
        assert_eq!(schedule.max_to_replenish_qty, Decimal::ZERO);
        assert_eq!(schedule.min_to_replenish_qty, Decimal::from(50));
    }

    #[test]
    fn test_remove_schedule() {
        let store = ScheduleStore::new(2);
        let id = store.create("TABLE", "WH-01").unwrap();

        let removed = store.remove(id).unwrap();
        assert_eq!(removed.product_id, "TABLE");
        assert!(store.find("TABLE", "WH-01").is_none());
        assert!(store.is_empty());
        assert!(store.remove(id).is_err());
    }

    #[test]
    fn test_ids_are_ordered() {
        let store = ScheduleStore::new(1);
        let b = store.create("B", "WH-01").unwrap();
        let a = store.create("A", "WH-01").unwrap();
        let a2 = store.create("A", "WH-02").unwrap();

        assert_eq!(store.ids(), vec![a, b, a2]);
        assert_eq!(store.ids_for_product("A"), vec![a, a2]);
    }

    #[test]
    fn test_rebucket_resizes() {
        let store = ScheduleStore::new(2);
        let id = store.create("TABLE", "WH-01").unwrap();

        store.rebucket(5, |schedule| schedule.cells.resize(5, Default::default()));
        assert_eq!(store.bucket_count(), 5);
        assert_eq!(store.snapshot(id).unwrap().bucket_count(), 5);
    }
}
