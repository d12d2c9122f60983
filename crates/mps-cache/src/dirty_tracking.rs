//! 髒標記追蹤
//!
//! 待重算排程的工作佇列，每個排程記錄需要重算的時間桶範圍。

use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// 待重算的時間桶範圍（含兩端）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRange {
    /// 最早需要重算的時間桶
    pub floor: usize,
    /// 輸入有變動的最後一個時間桶
    pub ceiling: usize,
}

impl DirtyRange {
    pub fn new(floor: usize, ceiling: usize) -> Self {
        Self {
            floor: floor.min(ceiling),
            ceiling: floor.max(ceiling),
        }
    }

    pub fn single(index: usize) -> Self {
        Self::new(index, index)
    }

    pub fn merge(&mut self, other: DirtyRange) {
        self.floor = self.floor.min(other.floor);
        self.ceiling = self.ceiling.max(other.ceiling);
    }
}

/// 髒標記佇列
#[derive(Debug, Default)]
pub struct DirtyQueue {
    order: VecDeque<Uuid>,
    ranges: HashMap<Uuid, DirtyRange>,
}

impl DirtyQueue {
    /// 創建新的佇列
    pub fn new() -> Self {
        Self::default()
    }

    /// 標記排程為髒；已在佇列中時合併範圍
    pub fn mark_dirty(&mut self, schedule_id: Uuid, range: DirtyRange) {
        match self.ranges.get_mut(&schedule_id) {
            Some(existing) => existing.merge(range),
            None => {
                self.ranges.insert(schedule_id, range);
                self.order.push_back(schedule_id);
            }
        }
    }

    /// 檢查排程是否為髒
    pub fn is_dirty(&self, schedule_id: &Uuid) -> bool {
        self.ranges.contains_key(schedule_id)
    }

    pub fn range(&self, schedule_id: &Uuid) -> Option<DirtyRange> {
        self.ranges.get(schedule_id).copied()
    }

    /// 取出下一個待重算排程
    pub fn pop(&mut self) -> Option<(Uuid, DirtyRange)> {
        let schedule_id = self.order.pop_front()?;
        let range = self.ranges.remove(&schedule_id)?;
        Some((schedule_id, range))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 清空佇列，返回尚未處理的排程
    pub fn drain(&mut self) -> Vec<Uuid> {
        self.ranges.clear();
        self.order.drain(..).collect()
    }
}
