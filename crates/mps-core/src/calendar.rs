//! 時間桶模型

use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// 生產週期粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// 每日
    Day,
    /// 每週（週一起算）
    Week,
    /// 每月
    Month,
}

impl Granularity {
    /// 包含指定日期的週期起點
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => {
                let offset = u64::from(date.weekday().num_days_from_monday());
                date.checked_sub_days(Days::new(offset)).unwrap_or(date)
            }
            Granularity::Month => date.with_day(1).unwrap_or(date),
        }
    }

    /// 下一個週期起點（日期溢出時為 None）
    pub fn next_start(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Granularity::Day => start.succ_opt(),
            Granularity::Week => start.checked_add_days(Days::new(7)),
            Granularity::Month => start.checked_add_months(Months::new(1)),
        }
    }
}

/// 時間桶：[start, end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub index: usize,

    /// 起始日（含）
    pub start: NaiveDate,

    /// 結束日（不含），等於下一個時間桶的起始日
    pub end: NaiveDate,

    pub granularity: Granularity,
}

impl Bucket {
    /// 檢查日期是否落在此時間桶
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// 最後一天（含）
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(self.start)
    }

    /// 天數
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// 與另一個時間桶重疊的天數
    pub fn overlap_days(&self, other: &Bucket) -> i64 {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (end - start).num_days().max(0)
    }
}

/// 找出包含指定日期的時間桶索引
pub fn bucket_index_for(buckets: &[Bucket], date: NaiveDate) -> Option<usize> {
    buckets.iter().position(|bucket| bucket.contains(date))
}
