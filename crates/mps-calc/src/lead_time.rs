//! 交期計算

use chrono::{Days, NaiveDate};
use mps_core::{calendar::bucket_index_for, Bucket, IndirectDemandTiming};
use rust_decimal::Decimal;

/// 交期計算器
pub struct LeadTimeCalculator;

impl LeadTimeCalculator {
    /// 計算下單日期（時間桶起始日往前推提前期）
    pub fn launch_date(bucket_start: NaiveDate, lead_time_days: u32) -> NaiveDate {
        bucket_start
            .checked_sub_days(Days::new(u64::from(lead_time_days)))
            .unwrap_or(NaiveDate::MIN)
    }

    /// 下單窗口 [起始日 − 提前期, 起始日]
    pub fn launch_window(bucket: &Bucket, lead_time_days: u32) -> (NaiveDate, NaiveDate) {
        (Self::launch_date(bucket.start, lead_time_days), bucket.start)
    }

    /// 下單窗口是否已開啟（包含已過起始日的時間桶）
    pub fn is_window_open(bucket: &Bucket, lead_time_days: u32, now: NaiveDate) -> bool {
        Self::launch_date(bucket.start, lead_time_days) <= now
    }

    /// 父件第 `index` 桶的補貨所產生的子件需求落在哪個時間桶
    pub fn indirect_demand_bucket(
        buckets: &[Bucket],
        index: usize,
        parent_lead_time_days: u32,
        timing: IndirectDemandTiming,
    ) -> usize {
        match timing {
            IndirectDemandTiming::SameBucket => index,
            IndirectDemandTiming::LeadTimeOffset => {
                let (Some(bucket), Some(first)) = (buckets.get(index), buckets.first()) else {
                    return index;
                };
                let date = Self::launch_date(bucket.start, parent_lead_time_days).max(first.start);
                bucket_index_for(buckets, date).unwrap_or(index)
            }
        }
    }

    /// 將父件各桶補貨量乘上用量，轉成子件各桶的間接需求
    pub fn component_demand(
        buckets: &[Bucket],
        replenish: &[Decimal],
        ratio: Decimal,
        parent_lead_time_days: u32,
        timing: IndirectDemandTiming,
    ) -> Vec<Decimal> {
        let mut demand = vec![Decimal::ZERO; replenish.len()];
        for (index, qty) in replenish.iter().enumerate() {
            if qty.is_zero() {
                continue;
            }
            let target = Self::indirect_demand_bucket(buckets, index, parent_lead_time_days, timing);
            if let Some(slot) = demand.get_mut(target) {
                *slot += *qty * ratio;
            }
        }
        demand
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketing::BucketingCalculator;
    use mps_core::Granularity;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weeks() -> Vec<Bucket> {
        BucketingCalculator::generate_buckets(Granularity::Week, 4, date(2025, 10, 6)).unwrap()
    }

    #[test]
    fn test_launch_window() {
        let buckets = weeks();
        let (open, close) = LeadTimeCalculator::launch_window(&buckets[1], 7);

        assert_eq!(open, date(2025, 10, 6));
        assert_eq!(close, date(2025, 10, 13));
        assert!(LeadTimeCalculator::is_window_open(&buckets[1], 7, date(2025, 10, 6)));
        assert!(!LeadTimeCalculator::is_window_open(&buckets[1], 3, date(2025, 10, 6)));
        // 已開始的時間桶窗口仍視為開啟
        assert!(LeadTimeCalculator::is_window_open(&buckets[0], 0, date(2025, 10, 8)));
    }

    #[test]
    fn test_indirect_demand_bucket() {
        let buckets = weeks();

        assert_eq!(
            LeadTimeCalculator::indirect_demand_bucket(&buckets, 3, 10, IndirectDemandTiming::SameBucket),
            3
        );
        // 10/27 − 10 天 = 10/17，落在第 1 桶
        assert_eq!(
            LeadTimeCalculator::indirect_demand_bucket(&buckets, 3, 10, IndirectDemandTiming::LeadTimeOffset),
            1
        );
        // 不早於計劃時界起點
        assert_eq!(
            LeadTimeCalculator::indirect_demand_bucket(&buckets, 1, 30, IndirectDemandTiming::LeadTimeOffset),
            0
        );
    }

    #[test]
    fn test_component_demand() {
        let buckets = weeks();
        let replenish = vec![Decimal::from(2), Decimal::ZERO, Decimal::from(3), Decimal::from(1)];

        let same = LeadTimeCalculator::component_demand(
            &buckets,
            &replenish,
            Decimal::from(4),
            7,
            IndirectDemandTiming::SameBucket,
        );
        assert_eq!(same, vec![Decimal::from(8), Decimal::ZERO, Decimal::from(12), Decimal::from(4)]);

        let shifted = LeadTimeCalculator::component_demand(
            &buckets,
            &replenish,
            Decimal::from(4),
            7,
            IndirectDemandTiming::LeadTimeOffset,
        );
        assert_eq!(shifted, vec![Decimal::from(8), Decimal::from(12), Decimal::from(4), Decimal::ZERO]);
    }
}
