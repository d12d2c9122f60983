//! 記憶體內的外部協作者
//!
//! 供測試、基準測試與單機試算使用。

use mps_core::{InventoryLookup, LeadTimeSource, ProcurementSink, ReplenishmentRequest, SourceType};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// 記憶體庫存
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    on_hand: RwLock<HashMap<(String, String), Decimal>>,
    offline: RwLock<HashSet<String>>,
}

impl InMemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_hand(&self, product_id: &str, warehouse_id: &str, qty: Decimal) {
        self.on_hand
            .write()
            .insert((product_id.to_string(), warehouse_id.to_string()), qty);
    }

    /// 模擬查詢失敗
    pub fn set_offline(&self, product_id: &str, offline: bool) {
        let mut products = self.offline.write();
        if offline {
            products.insert(product_id.to_string());
        } else {
            products.remove(product_id);
        }
    }
}

impl InventoryLookup for InMemoryInventory {
    fn on_hand_quantity(&self, product_id: &str, warehouse_id: &str) -> anyhow::Result<Decimal> {
        if self.offline.read().contains(product_id) {
            anyhow::bail!("庫存查詢逾時: {product_id}");
        }
        Ok(self
            .on_hand
            .read()
            .get(&(product_id.to_string(), warehouse_id.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

/// 記憶體提前期（依物料，不分倉庫）
#[derive(Debug, Default)]
pub struct InMemoryLeadTimes {
    lead_times: RwLock<HashMap<String, u32>>,
    source_types: RwLock<HashMap<String, SourceType>>,
}

impl InMemoryLeadTimes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lead_time(&self, product_id: &str, days: u32) {
        self.lead_times.write().insert(product_id.to_string(), days);
    }

    pub fn set_source_type(&self, product_id: &str, source_type: SourceType) {
        self.source_types
            .write()
            .insert(product_id.to_string(), source_type);
    }
}

impl LeadTimeSource for InMemoryLeadTimes {
    fn lead_time_days(&self, product_id: &str, _warehouse_id: &str) -> anyhow::Result<u32> {
        Ok(self.lead_times.read().get(product_id).copied().unwrap_or(0))
    }

    fn source_type(&self, product_id: &str, _warehouse_id: &str) -> anyhow::Result<SourceType> {
        Ok(self
            .source_types
            .read()
            .get(product_id)
            .copied()
            .unwrap_or(SourceType::Buy))
    }
}

/// 記錄所有請求的下游
#[derive(Debug, Default)]
pub struct RecordingSink {
    requests: Mutex<Vec<(String, ReplenishmentRequest)>>,
    rejected: RwLock<HashSet<String>>,
    counter: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模擬拒絕某物料的請求
    pub fn reject(&self, product_id: &str, rejected: bool) {
        let mut products = self.rejected.write();
        if rejected {
            products.insert(product_id.to_string());
        } else {
            products.remove(product_id);
        }
    }

    /// 已接受的請求（請求參考, 內容）
    pub fn requests(&self) -> Vec<(String, ReplenishmentRequest)> {
        self.requests.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcurementSink for RecordingSink {
    fn create_or_update_request(&self, request: &ReplenishmentRequest) -> anyhow::Result<String> {
        if self.rejected.read().contains(&request.product_id) {
            anyhow::bail!("下游拒絕: {}", request.product_id);
        }

        let request_id = match &request.existing_request {
            Some(existing) => existing.clone(),
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("REQ-{n:05}")
            }
        };
        self.requests.lock().push((request_id.clone(), request.clone()));
        Ok(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn request(existing: Option<&str>) -> ReplenishmentRequest {
        ReplenishmentRequest {
            product_id: "LEG".to_string(),
            warehouse_id: "WH-01".to_string(),
            due_date: NaiveDate::from_ymd_opt(2025, 10, 13).unwrap(),
            quantity: Decimal::from(8),
            source_type: SourceType::Manufacture,
            existing_request: existing.map(str::to_string),
        }
    }

    #[test]
    fn test_inventory_offline() {
        let inventory = InMemoryInventory::new();
        inventory.set_on_hand("LEG", "WH-01", Decimal::from(5));
        assert_eq!(inventory.on_hand_quantity("LEG", "WH-01").unwrap(), Decimal::from(5));
        assert_eq!(inventory.on_hand_quantity("LEG", "WH-02").unwrap(), Decimal::ZERO);

        inventory.set_offline("LEG", true);
        assert!(inventory.on_hand_quantity("LEG", "WH-01").is_err());
        inventory.set_offline("LEG", false);
        assert!(inventory.on_hand_quantity("LEG", "WH-01").is_ok());
    }

    #[test]
    fn test_sink_keeps_existing_reference() {
        let sink = RecordingSink::new();
        let created = sink.create_or_update_request(&request(None)).unwrap();
        assert_eq!(created, "REQ-00001");

        let updated = sink.create_or_update_request(&request(Some(&created))).unwrap();
        assert_eq!(updated, created);
        assert_eq!(sink.len(), 2);

        sink.reject("LEG", true);
        assert!(sink.create_or_update_request(&request(None)).is_err());
        assert_eq!(sink.len(), 2);
    }
}
