//! 時間分桶

use chrono::NaiveDate;
use mps_core::{Bucket, ForecastCell, Granularity, MpsError};

/// 時間分桶計算器
pub struct BucketingCalculator;

impl BucketingCalculator {
    /// 從包含參考日期的週期起點開始，產生連續的時間桶
    pub fn generate_buckets(
        granularity: Granularity,
        horizon_buckets: usize,
        reference: NaiveDate,
    ) -> mps_core::Result<Vec<Bucket>> {
        if horizon_buckets == 0 {
            return Err(MpsError::InvalidConfig("計劃時界至少需要 1 個時間桶".to_string()));
        }

        let mut buckets = Vec::with_capacity(horizon_buckets);
        let mut start = granularity.period_start(reference);

        for index in 0..horizon_buckets {
            let end = granularity
                .next_start(start)
                .ok_or_else(|| MpsError::InvalidDate(format!("日期溢出: {start}")))?;
            buckets.push(Bucket {
                index,
                start,
                end,
                granularity,
            });
            start = end;
        }

        Ok(buckets)
    }

    /// 將舊時間桶的使用者輸入映射到新時間桶
    ///
    /// 每格歸入重疊天數最多的新時間桶；完全不重疊時歸入最近的一端，不丟棄資料。
    pub fn remap_cells(
        old_buckets: &[Bucket],
        old_cells: &[ForecastCell],
        new_buckets: &[Bucket],
    ) -> Vec<ForecastCell> {
        let mut cells = vec![ForecastCell::default(); new_buckets.len()];
        if new_buckets.is_empty() {
            return cells;
        }

        for (old_bucket, old_cell) in old_buckets.iter().zip(old_cells) {
            let target = Self::nearest_bucket(old_bucket, new_buckets);
            cells[target].absorb_inputs(old_cell);
        }

        cells
    }

    fn nearest_bucket(old: &Bucket, new_buckets: &[Bucket]) -> usize {
        let mut best: Option<(usize, i64)> = None;
        for (index, bucket) in new_buckets.iter().enumerate() {
            let overlap = old.overlap_days(bucket);
            if overlap > 0 && best.map_or(true, |(_, days)| overlap > days) {
                best = Some((index, overlap));
            }
        }

        match best {
            Some((index, _)) => index,
            None if new_buckets.first().is_some_and(|first| old.end <= first.start) => 0,
            None => new_buckets.len() - 1,
        }
    }
}
