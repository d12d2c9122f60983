//! BOM 連通分量的互斥區
//!
//! 同一連通分量內的串聯計算依序執行，不同分量可並行。

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ComponentLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ComponentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得分量的鎖
    pub fn handle(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// 依鍵排序取得多個分量的鎖，固定的加鎖順序避免死結
    pub fn handles(&self, keys: BTreeSet<String>) -> Vec<Arc<Mutex<()>>> {
        keys.iter().map(|key| self.handle(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
