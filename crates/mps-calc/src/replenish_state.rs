//! 補貨狀態機
//!
//! 狀態完全由補貨量、已下單數量、下單窗口與 `now` 推導，不讀取系統時間。

use chrono::NaiveDate;
use mps_core::{Bucket, ForecastCell, ProductionSchedule, ReplenishState};
use rust_decimal::Decimal;

use crate::lead_time::LeadTimeCalculator;

/// 補貨狀態評估器
pub struct ReplenishStateEvaluator;

impl ReplenishStateEvaluator {
    /// 評估單一預測格，返回（狀態, 是否強制補貨）
    pub fn evaluate_cell(
        cell: &ForecastCell,
        bucket: &Bucket,
        lead_time_days: u32,
        now: NaiveDate,
    ) -> (ReplenishState, bool) {
        let window_open = LeadTimeCalculator::is_window_open(bucket, lead_time_days, now);

        let state = match cell.launched_qty {
            None if cell.replenish_qty <= Decimal::ZERO => ReplenishState::Idle,
            None if window_open => ReplenishState::ToLaunch,
            None => ReplenishState::Planned,
            Some(launched) if launched < cell.replenish_qty => ReplenishState::ToRelaunch,
            Some(launched) if launched > cell.replenish_qty => ReplenishState::ToCorrect,
            Some(_) => ReplenishState::Launched,
        };

        let forced = state.is_actionable() && cell.unmet_qty() > Decimal::ZERO && window_open;
        (state, forced)
    }

    /// 重新評估整個排程，返回狀態有變動的格數
    pub fn evaluate(schedule: &mut ProductionSchedule, buckets: &[Bucket], now: NaiveDate) -> usize {
        let lead_time = schedule.lead_time_days();
        let mut changed = 0;

        for (cell, bucket) in schedule.cells.iter_mut().zip(buckets) {
            let (state, forced) = Self::evaluate_cell(cell, bucket, lead_time, now);
            if cell.state != state || cell.forced_replenish != forced {
                cell.state = state;
                cell.forced_replenish = forced;
                changed += 1;
            }
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucketing::BucketingCalculator;
    use mps_core::Granularity;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn cell(replenish: i64, launched: Option<i64>) -> ForecastCell {
        ForecastCell {
            replenish_qty: Decimal::from(replenish),
            launched_qty: launched.map(Decimal::from),
            ..ForecastCell::default()
        }
    }

    #[rstest]
    #[case(cell(0, None), 0, ReplenishState::Idle, false)]
    #[case(cell(100, None), 0, ReplenishState::ToLaunch, true)]
    #[case(cell(100, None), 1, ReplenishState::Planned, false)]
    #[case(cell(100, Some(100)), 0, ReplenishState::Launched, false)]
    #[case(cell(120, Some(100)), 0, ReplenishState::ToRelaunch, true)]
    #[case(cell(120, Some(100)), 1, ReplenishState::ToRelaunch, false)]
    #[case(cell(80, Some(100)), 0, ReplenishState::ToCorrect, false)]
    #[case(cell(0, Some(100)), 0, ReplenishState::ToCorrect, false)]
    fn test_state_transitions(
        #[case] cell: ForecastCell,
        #[case] bucket_index: usize,
        #[case] expected_state: ReplenishState,
        #[case] expected_forced: bool,
    ) {
        // 週三，提前期 0：本週窗口已開，下週未開
        let now = date(2025, 10, 8);
        let buckets = BucketingCalculator::generate_buckets(Granularity::Week, 2, now).unwrap();

        let (state, forced) =
            ReplenishStateEvaluator::evaluate_cell(&cell, &buckets[bucket_index], 0, now);
        assert_eq!(state, expected_state);
        assert_eq!(forced, expected_forced);
    }

    #[test]
    fn test_lead_time_opens_later_windows() {
        let now = date(2025, 10, 8);
        let buckets = BucketingCalculator::generate_buckets(Granularity::Week, 3, now).unwrap();
        let mut schedule = ProductionSchedule::new("LEG".to_string(), "WH-01".to_string(), 3)
            .with_lead_time_override(7);
        for cell in &mut schedule.cells {
            cell.replenish_qty = Decimal::from(10);
        }

        let changed = ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now);

        // 10/13 − 7 天 = 10/6 ≤ 10/8；10/20 − 7 天 = 10/13 > 10/8
        assert_eq!(changed, 3);
        assert!(schedule.cells[0].forced_replenish);
        assert!(schedule.cells[1].forced_replenish);
        assert_eq!(schedule.cells[2].state, ReplenishState::Planned);

        // 時間前進一週，第 2 桶窗口開啟
        ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, date(2025, 10, 15));
        assert_eq!(schedule.cells[2].state, ReplenishState::ToLaunch);
        assert!(schedule.cells[2].forced_replenish);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let now = date(2025, 10, 8);
        let buckets = BucketingCalculator::generate_buckets(Granularity::Week, 2, now).unwrap();
        let mut schedule = ProductionSchedule::new("LEG".to_string(), "WH-01".to_string(), 2);
        schedule.cells[0].replenish_qty = Decimal::from(5);

        assert_eq!(ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now), 1);
        assert_eq!(ReplenishStateEvaluator::evaluate(&mut schedule, &buckets, now), 0);
    }
}
